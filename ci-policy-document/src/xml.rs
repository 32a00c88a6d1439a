//! XML (de)serialization for [`Document`] using `quick-xml`.
//!
//! Comments, processing instructions and the DOCTYPE are not retained. Element names,
//! attribute order and text content round-trip.

use std::borrow::Cow;
use std::io::Write;
use std::path::Path;

use log::debug;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{DocumentError, DocumentResult};
use crate::tree::{Document, NodeId};

impl Document {
    /// Parse a document from XML text.
    pub fn parse(xml: &str) -> DocumentResult<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut document: Option<Document> = None;
        let mut stack: Vec<NodeId> = Vec::new();

        loop {
            let position = u64::try_from(reader.buffer_position()).unwrap_or_default();
            let event = reader.read_event().map_err(|e| DocumentError::Parse {
                position,
                message: e.to_string(),
            })?;

            match event {
                Event::Start(start) => {
                    let node = open_element(&mut document, &stack, &start, position)?;
                    stack.push(node);
                }
                Event::Empty(start) => {
                    open_element(&mut document, &stack, &start, position)?;
                }
                Event::End(_) => {
                    if stack.pop().is_none() {
                        return Err(DocumentError::malformed("closing tag without a matching opening tag"));
                    }
                }
                Event::Text(text) => {
                    let value = text.unescape().map_err(|e| DocumentError::Parse {
                        position,
                        message: e.to_string(),
                    })?;
                    append_text(&mut document, &stack, &value)?;
                }
                Event::CData(data) => {
                    let raw = data.into_inner();
                    append_text(&mut document, &stack, &String::from_utf8_lossy(&raw))?;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(DocumentError::malformed(format!(
                "{} element(s) left unclosed at end of input",
                stack.len()
            )));
        }

        document.ok_or_else(|| DocumentError::malformed("document has no root element"))
    }

    /// Load and parse a document from disk.
    pub fn load(path: impl AsRef<Path>) -> DocumentResult<Self> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path).map_err(|e| DocumentError::io("read", path, e))?;
        debug!("Document::load: read {} bytes from {}", xml.len(), path.display());
        Self::parse(&xml)
    }

    /// Serialize the document as indented XML with a UTF-8 declaration.
    pub fn to_xml_string(&self) -> DocumentResult<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(|e| DocumentError::Write(e.to_string()))?;
        self.write_element(&mut writer, self.root())?;

        let mut bytes = writer.into_inner();
        bytes.push(b'\n');
        String::from_utf8(bytes).map_err(|e| DocumentError::Write(e.to_string()))
    }

    /// Save the document to `path`.
    ///
    /// The XML is written to a temporary file in the target directory and then renamed
    /// over `path`, so a failed save leaves any existing file untouched.
    pub fn save(&self, path: impl AsRef<Path>) -> DocumentResult<()> {
        let path = path.as_ref();
        let xml = self.to_xml_string()?;

        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir().map_err(|e| DocumentError::io("resolve directory of", path, e))?,
        };

        let mut temp = tempfile::NamedTempFile::new_in(&directory)
            .map_err(|e| DocumentError::io("create temporary file in", &directory, e))?;
        temp.write_all(xml.as_bytes())
            .map_err(|e| DocumentError::io("write temporary file for", path, e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| DocumentError::io("flush temporary file for", path, e))?;
        temp.persist(path)
            .map_err(|e| DocumentError::io("replace", path, e.error))?;

        debug!("Document::save: wrote {} bytes to {}", xml.len(), path.display());
        Ok(())
    }

    fn write_element(&self, writer: &mut Writer<Vec<u8>>, node: NodeId) -> DocumentResult<()> {
        let name = self.name(node);
        let mut start = BytesStart::new(name);
        for (key, value) in self.attributes(node) {
            start.push_attribute((key, value));
        }

        let children = self.children(node);
        let text = self.text(node).filter(|t| !t.is_empty());

        if children.is_empty() && text.is_none() {
            return writer
                .write_event(Event::Empty(start))
                .map_err(|e| DocumentError::Write(e.to_string()));
        }

        writer
            .write_event(Event::Start(start))
            .map_err(|e| DocumentError::Write(e.to_string()))?;
        if let Some(text) = text {
            writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(|e| DocumentError::Write(e.to_string()))?;
        }
        for child in children {
            self.write_element(writer, *child)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(|e| DocumentError::Write(e.to_string()))
    }
}

fn open_element(
    document: &mut Option<Document>,
    stack: &[NodeId],
    start: &BytesStart<'_>,
    position: u64,
) -> DocumentResult<NodeId> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();

    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| DocumentError::Parse {
            position,
            message: e.to_string(),
        })?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value: Cow<'_, str> = attribute.unescape_value().map_err(|e| DocumentError::Parse {
            position,
            message: e.to_string(),
        })?;
        attributes.push((key, value.into_owned()));
    }

    let parent = match (document.is_some(), stack.last()) {
        (false, _) => None,
        (true, Some(parent)) => Some(*parent),
        (true, None) => {
            return Err(DocumentError::malformed(format!(
                "second root element <{name}> found"
            )));
        }
    };

    let doc = document.get_or_insert_with(|| Document::new(name.clone()));
    let node = match parent {
        None => doc.root(),
        Some(parent) => {
            let node = doc.create_element(name);
            doc.append_child(parent, node);
            node
        }
    };

    for (key, value) in attributes {
        doc.set_attribute(node, &key, value);
    }
    Ok(node)
}

fn append_text(document: &mut Option<Document>, stack: &[NodeId], text: &str) -> DocumentResult<()> {
    match (document.as_mut(), stack.last()) {
        (Some(doc), Some(node)) => {
            doc.append_text(*node, text);
            Ok(())
        }
        _ if text.trim().is_empty() => Ok(()),
        _ => Err(DocumentError::malformed("text content outside of the root element")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<SiPolicy xmlns="urn:schemas-microsoft-com:sipolicy" PolicyType="Base Policy">
  <!-- a comment that is dropped -->
  <VersionEx>10.0.0.0</VersionEx>
  <FileRules>
    <Allow ID="ID_ALLOW_A_1" FriendlyName="a &amp; b" Hash="AB12" />
  </FileRules>
  <Signers />
</SiPolicy>
"#;

    #[test]
    fn test_parse_reads_elements_attributes_and_text() {
        let doc = Document::parse(POLICY).unwrap();
        let root = doc.root();
        assert_eq!(doc.name(root), "SiPolicy");
        assert_eq!(doc.attribute(root, "PolicyType"), Some("Base Policy"));

        let version = doc.first_child(root, "VersionEx").unwrap();
        assert_eq!(doc.text(version), Some("10.0.0.0"));

        let allow = doc.select_single(root, "FileRules/Allow").unwrap();
        assert_eq!(doc.attribute(allow, "FriendlyName"), Some("a & b"));
    }

    #[test]
    fn test_serialize_round_trips_structure() {
        let doc = Document::parse(POLICY).unwrap();
        let xml = doc.to_xml_string().unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(xml.contains("<VersionEx>10.0.0.0</VersionEx>"));
        assert!(xml.contains("FriendlyName=\"a &amp; b\""));
        assert!(!xml.contains("comment"));

        let reparsed = Document::parse(&xml).unwrap();
        assert_eq!(reparsed.to_xml_string().unwrap(), xml);
    }

    #[test]
    fn test_parse_rejects_two_roots() {
        let err = Document::parse("<A/><B/>").unwrap_err();
        assert!(matches!(err, DocumentError::Malformed(_)));
    }

    #[test]
    fn test_parse_rejects_empty_input() {
        let err = Document::parse("").unwrap_err();
        assert!(matches!(err, DocumentError::Malformed(_)));
    }

    #[test]
    fn test_parse_rejects_unclosed_elements() {
        assert!(Document::parse("<A><B></B>").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("policy.xml");
        let doc = Document::parse(POLICY).unwrap();
        doc.save(&path).unwrap();

        let loaded = Document::load(&path).unwrap();
        assert_eq!(loaded.to_xml_string().unwrap(), doc.to_xml_string().unwrap());
    }

    #[test]
    fn test_load_missing_file_reports_path() {
        let err = Document::load("does/not/exist.xml").unwrap_err();
        assert!(matches!(err, DocumentError::Io { .. }));
        assert!(err.to_string().contains("does/not/exist.xml"));
    }
}
