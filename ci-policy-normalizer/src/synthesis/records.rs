//! Intermediate synthesis records handed from the synthesizer to the materializer.

use serde::{Deserialize, Serialize};

use crate::policy::schema::{FILE_DESCRIPTION, FILE_NAME, INTERNAL_NAME, PRODUCT_NAME};
use crate::types::{is_blank, SigningScenario};

/// Certificate identity of one signer chain: intermediate (issuer) plus leaf (publisher).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CertificateIdentity {
    #[serde(rename = "IssuerTBSHash")]
    pub issuer_tbs_hash: String,
    pub issuer_name: String,
    #[serde(rename = "PublisherTBSHash")]
    pub publisher_tbs_hash: String,
    pub publisher_name: String,
}

/// A signed file trusted by publisher plus file attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FilePublisherRecord {
    pub certificates: Vec<CertificateIdentity>,
    pub file_version: String,
    pub original_file_name: Option<String>,
    pub internal_name: Option<String>,
    pub file_description: Option<String>,
    pub product_name: Option<String>,
    pub file_path: Option<String>,
    #[serde(rename = "SHA256Hash")]
    pub sha256_hash: Option<String>,
    #[serde(rename = "SHA1Hash")]
    pub sha1_hash: Option<String>,
    pub scenario: SigningScenario,
}

impl FilePublisherRecord {
    /// The `FileAttrib` naming attribute and value: first non-blank of the original file
    /// name (`FileName`), `InternalName`, `FileDescription` and `ProductName`.
    pub fn naming_attribute(&self) -> Option<(&'static str, &str)> {
        [
            (FILE_NAME, &self.original_file_name),
            (INTERNAL_NAME, &self.internal_name),
            (FILE_DESCRIPTION, &self.file_description),
            (PRODUCT_NAME, &self.product_name),
        ]
        .into_iter()
        .find_map(|(attribute, value)| {
            value
                .as_deref()
                .filter(|v| !is_blank(Some(v)))
                .map(|v| (attribute, v))
        })
    }
}

/// A signed file trusted by publisher alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublisherRecord {
    pub certificates: Vec<CertificateIdentity>,
    pub file_path: Option<String>,
    #[serde(rename = "SHA256Hash")]
    pub sha256_hash: Option<String>,
    #[serde(rename = "SHA1Hash")]
    pub sha1_hash: Option<String>,
    pub scenario: SigningScenario,
}

/// A file trusted by content hash. All fields are non-blank.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HashRecord {
    #[serde(rename = "SHA256Hash")]
    pub sha256_hash: String,
    #[serde(rename = "SHA1Hash")]
    pub sha1_hash: String,
    pub file_path: String,
    pub scenario: SigningScenario,
}

impl HashRecord {
    /// Final path component, used in friendly names.
    pub fn file_name(&self) -> &str {
        self.file_path
            .rsplit(['\\', '/'])
            .next()
            .unwrap_or(&self.file_path)
    }
}

/// Output of [`super::synthesize`]: three independent, ordered sequences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SynthesisBundle {
    pub file_publishers: Vec<FilePublisherRecord>,
    pub publishers: Vec<PublisherRecord>,
    pub hashes: Vec<HashRecord>,
}

impl SynthesisBundle {
    pub fn is_empty(&self) -> bool {
        self.file_publishers.is_empty() && self.publishers.is_empty() && self.hashes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some("app.exe"), Some("app"), ("FileName", "app.exe"))]
    #[case(Some("  "), Some("app"), ("InternalName", "app"))]
    #[case(None, None, ("FileDescription", "Contoso App"))]
    fn test_naming_attribute_fallback(
        #[case] original: Option<&str>,
        #[case] internal: Option<&str>,
        #[case] expected: (&str, &str),
    ) {
        let record = FilePublisherRecord {
            original_file_name: original.map(str::to_string),
            internal_name: internal.map(str::to_string),
            file_description: Some("Contoso App".to_string()),
            product_name: Some("Contoso".to_string()),
            ..Default::default()
        };
        assert_eq!(record.naming_attribute(), Some(expected));
    }

    #[test]
    fn test_naming_attribute_absent() {
        assert_eq!(FilePublisherRecord::default().naming_attribute(), None);
    }

    #[test]
    fn test_hash_record_file_name() {
        let record = HashRecord {
            file_path: r"C:\Program Files\Contoso\app.exe".to_string(),
            ..Default::default()
        };
        assert_eq!(record.file_name(), "app.exe");
    }
}
