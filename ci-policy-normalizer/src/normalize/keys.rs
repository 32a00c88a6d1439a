//! Identity keys and lookups shared by the merge and dedup stages.

use std::collections::{HashMap, HashSet};

use ci_policy_document::{Document, NodeId};

use crate::materialize::{FILE_PUBLISHER_SIGNER_PREFIX, PUBLISHER_SIGNER_PREFIX};
use crate::policy::schema::{
    ALLOWED_SIGNER, CERT_PUBLISHER, CERT_ROOT, DENIED_SIGNER, FILE_ATTRIB_REF, FILE_DESCRIPTION, FILE_NAME,
    FILE_PATH, FILE_RULE_REF, HASH, INTERNAL_NAME, MINIMUM_FILE_VERSION, NAME, PACKAGE_FAMILY_NAME,
    PRODUCT_NAME, RULE_ID, SIGNER_ID, SUPPLEMENTAL_POLICY_SIGNER, UPDATE_POLICY_SIGNER, VALUE,
};
use crate::policy::CiPolicy;
use crate::types::SigningScenario;

/// Signer identity: `(CertRoot value, Name, CertPublisher value)`.
///
/// Absent `CertRoot`/`CertPublisher` values compare equal to each other, so two signers
/// lacking both but sharing a `Name` collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SignerIdentityKey {
    cert_root: Option<String>,
    name: String,
    cert_publisher: Option<String>,
}

impl SignerIdentityKey {
    pub(crate) fn from_signer(doc: &Document, signer: NodeId) -> Self {
        let child_value = |child: &str| {
            doc.first_child(signer, child)
                .and_then(|node| doc.attribute(node, VALUE))
                .map(str::to_string)
        };
        Self {
            cert_root: child_value(CERT_ROOT),
            name: doc.attribute(signer, NAME).unwrap_or_default().to_string(),
            cert_publisher: child_value(CERT_PUBLISHER),
        }
    }
}

/// Publisher signers carry no `FileAttribRef`; FilePublisher signers carry at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum SignerKind {
    FilePublisher,
    Publisher,
}

impl SignerKind {
    pub(crate) fn id_prefix(self) -> &'static str {
        match self {
            Self::FilePublisher => FILE_PUBLISHER_SIGNER_PREFIX,
            Self::Publisher => PUBLISHER_SIGNER_PREFIX,
        }
    }
}

/// Which scenario each signer ID is activated in, by `AllowedSigners` membership.
#[derive(Debug, Default)]
pub(crate) struct ScenarioIndex {
    kernel: HashSet<String>,
    user: HashSet<String>,
}

impl ScenarioIndex {
    pub(crate) fn from_policy(policy: &CiPolicy) -> Self {
        let doc = policy.document();
        let collect = |scenario: SigningScenario| -> HashSet<String> {
            policy
                .allowed_signers(scenario)
                .map(|container| {
                    doc.child_elements(container, ALLOWED_SIGNER)
                        .into_iter()
                        .filter_map(|node| doc.attribute(node, SIGNER_ID))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };
        Self {
            kernel: collect(SigningScenario::Kernel),
            user: collect(SigningScenario::User),
        }
    }

    /// Kernel membership wins when a signer is listed in both scenarios.
    pub(crate) fn scenario_of(&self, signer_id: &str) -> Option<SigningScenario> {
        if self.kernel.contains(signer_id) {
            Some(SigningScenario::Kernel)
        } else if self.user.contains(signer_id) {
            Some(SigningScenario::User)
        } else {
            None
        }
    }
}

/// `RuleID` → referencing `FileAttribRef` nodes and their owning signers, in document order.
pub(crate) fn file_attrib_ref_index(
    doc: &Document,
    signers: &[NodeId],
) -> HashMap<String, Vec<(NodeId, NodeId)>> {
    let mut index: HashMap<String, Vec<(NodeId, NodeId)>> = HashMap::new();
    for signer in signers {
        for reference in doc.child_elements(*signer, FILE_ATTRIB_REF) {
            if let Some(rule_id) = doc.attribute(reference, RULE_ID) {
                index
                    .entry(rule_id.to_string())
                    .or_default()
                    .push((*signer, reference));
            }
        }
    }
    index
}

/// `RuleID` → `FileRuleRef` nodes under one scenario's `FileRulesRef`, in document order.
pub(crate) fn file_rule_ref_index(doc: &Document, container: Option<NodeId>) -> HashMap<String, Vec<NodeId>> {
    let mut index: HashMap<String, Vec<NodeId>> = HashMap::new();
    if let Some(container) = container {
        for reference in doc.child_elements(container, FILE_RULE_REF) {
            if let Some(rule_id) = doc.attribute(reference, RULE_ID) {
                index.entry(rule_id.to_string()).or_default().push(reference);
            }
        }
    }
    index
}

/// Attributes compared when deduplicating `FileAttrib` nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FileAttribFingerprint {
    minimum_file_version: Option<String>,
    file_name: Option<String>,
    internal_name: Option<String>,
    file_description: Option<String>,
    file_path: Option<String>,
    product_name: Option<String>,
}

impl FileAttribFingerprint {
    pub(crate) fn from_node(doc: &Document, node: NodeId) -> Self {
        let read = |attribute: &str| {
            doc.attribute(node, attribute)
                .filter(|value| !value.trim().is_empty())
                .map(str::to_string)
        };
        Self {
            minimum_file_version: read(MINIMUM_FILE_VERSION),
            file_name: read(FILE_NAME),
            internal_name: read(INTERNAL_NAME),
            file_description: read(FILE_DESCRIPTION),
            file_path: read(FILE_PATH),
            product_name: read(PRODUCT_NAME),
        }
    }

    /// Same minimum version and at least one naming field present and equal on both.
    pub(crate) fn is_duplicate_of(&self, other: &Self) -> bool {
        fn same(a: &Option<String>, b: &Option<String>) -> bool {
            matches!((a, b), (Some(a), Some(b)) if a == b)
        }

        self.minimum_file_version == other.minimum_file_version
            && (same(&self.file_name, &other.file_name)
                || same(&self.internal_name, &other.internal_name)
                || same(&self.file_description, &other.file_description)
                || same(&self.file_path, &other.file_path)
                || same(&self.product_name, &other.product_name))
    }
}

/// What an `Allow` rule matches on. Hashes compare case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum AllowKey {
    Hash(String),
    FilePath(String),
    PackageFamilyName(String),
    FileName {
        name: String,
        minimum_version: Option<String>,
    },
}

impl AllowKey {
    /// `None` when the rule carries no recognised selector.
    pub(crate) fn from_node(doc: &Document, node: NodeId) -> Option<Self> {
        let read = |attribute: &str| {
            doc.attribute(node, attribute)
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };

        if let Some(hash) = read(HASH) {
            return Some(Self::Hash(hash.to_ascii_uppercase()));
        }
        if let Some(path) = read(FILE_PATH) {
            return Some(Self::FilePath(path.to_string()));
        }
        if let Some(family) = read(PACKAGE_FAMILY_NAME) {
            return Some(Self::PackageFamilyName(family.to_string()));
        }
        read(FILE_NAME).map(|name| Self::FileName {
            name: name.to_string(),
            minimum_version: read(MINIMUM_FILE_VERSION).map(str::to_string),
        })
    }
}

/// `DeniedSigner`, `UpdatePolicySigner` and `SupplementalPolicySigner` nodes anywhere in
/// the document.
pub(crate) fn external_signer_references(doc: &Document) -> Vec<NodeId> {
    doc.descendants(doc.root())
        .into_iter()
        .filter(|node| {
            matches!(
                doc.local_name(*node),
                DENIED_SIGNER | UPDATE_POLICY_SIGNER | SUPPLEMENTAL_POLICY_SIGNER
            )
        })
        .collect()
}

/// Signer IDs referenced from anywhere other than `AllowedSigners` and `CiSigners`.
pub(crate) fn externally_referenced_signers(doc: &Document) -> HashSet<String> {
    external_signer_references(doc)
        .into_iter()
        .filter_map(|node| doc.attribute(node, SIGNER_ID))
        .map(str::to_string)
        .collect()
}
