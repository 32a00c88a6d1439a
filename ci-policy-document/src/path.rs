//! Minimal element path selection (`FileRules/FileAttrib`, `FileRules//Allow`).

use std::collections::HashSet;

use crate::tree::{Document, NodeId};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Child(String),
    Descendant(String),
}

/// A parsed `/`-separated path of local element names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ElementPath {
    steps: Vec<Step>,
}

impl ElementPath {
    pub(crate) fn parse(path: &str) -> Self {
        let mut steps = Vec::new();
        let mut descend = false;
        for segment in path.trim_matches('/').split('/') {
            let segment = segment.trim();
            if segment.is_empty() {
                descend = true;
                continue;
            }
            let name = segment.to_string();
            steps.push(if descend {
                Step::Descendant(name)
            } else {
                Step::Child(name)
            });
            descend = false;
        }
        Self { steps }
    }

    pub(crate) fn select(&self, doc: &Document, from: NodeId) -> Vec<NodeId> {
        let mut current = vec![from];
        for step in &self.steps {
            let mut next = Vec::new();
            for node in current {
                match step {
                    Step::Child(name) => next.extend(doc.child_elements(node, name)),
                    Step::Descendant(name) => next.extend(
                        doc.descendants(node)
                            .into_iter()
                            .filter(|d| doc.local_name(*d) == name),
                    ),
                }
            }
            let mut seen = HashSet::new();
            next.retain(|node| seen.insert(*node));
            current = next;
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn policy() -> Document {
        Document::parse(
            r#"<SiPolicy>
                 <FileRules>
                   <Allow ID="A1"/>
                   <FileAttrib ID="F1"/>
                   <Group><Allow ID="A2"/></Group>
                 </FileRules>
                 <Signers/>
               </SiPolicy>"#,
        )
        .unwrap()
    }

    #[rstest]
    #[case("FileRules/Allow", vec!["A1"])]
    #[case("FileRules//Allow", vec!["A1", "A2"])]
    #[case("FileRules/FileAttrib", vec!["F1"])]
    #[case("Signers/Signer", vec![])]
    #[case("Missing/Allow", vec![])]
    fn test_select_paths(#[case] path: &str, #[case] expected: Vec<&str>) {
        let doc = policy();
        let ids: Vec<_> = doc
            .select_all(doc.root(), path)
            .into_iter()
            .filter_map(|n| doc.attribute(n, "ID"))
            .collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_select_single_container() {
        let doc = policy();
        let signers = doc.select_single(doc.root(), "Signers");
        assert!(signers.is_some());
        assert_eq!(doc.local_name(signers.unwrap()), "Signers");
    }
}
