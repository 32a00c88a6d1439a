//! Shared data types: scan records, scan levels, signing scenarios, pipeline configuration
//! and the per-stage summaries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{PolicyError, PolicyResult};

/// Execution context a rule applies to.
///
/// Scan records tag scenarios as `0` (kernel) / `1` (user); policy documents use the
/// `SigningScenario Value` attribute `131` / `12`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SigningScenario {
    Kernel,
    #[default]
    User,
}

impl SigningScenario {
    /// Both scenarios, kernel first. Kernel membership takes priority wherever a
    /// lookup could match both.
    pub const ALL: [Self; 2] = [Self::Kernel, Self::User];

    /// The `Value` attribute of the matching `<SigningScenario>` element.
    pub fn policy_value(self) -> &'static str {
        match self {
            Self::Kernel => "131",
            Self::User => "12",
        }
    }

    pub fn from_policy_value(value: &str) -> Option<Self> {
        match value.trim() {
            "131" => Some(Self::Kernel),
            "12" => Some(Self::User),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Kernel => "KernelMode",
            Self::User => "UserMode",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Kernel => 0,
            Self::User => 1,
        }
    }
}

impl fmt::Display for SigningScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl TryFrom<u8> for SigningScenario {
    type Error = PolicyError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Kernel),
            1 => Ok(Self::User),
            other => Err(PolicyError::InvalidScenario(format!(
                "expected 0 (kernel) or 1 (user), got {other}"
            ))),
        }
    }
}

impl From<SigningScenario> for u8 {
    fn from(value: SigningScenario) -> Self {
        match value {
            SigningScenario::Kernel => 0,
            SigningScenario::User => 1,
        }
    }
}

/// Most specific rule level the synthesizer may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ScanLevel {
    Hash,
    Publisher,
    #[default]
    FilePublisher,
}

impl fmt::Display for ScanLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hash => "Hash",
            Self::Publisher => "Publisher",
            Self::FilePublisher => "FilePublisher",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureStatus {
    Signed,
    #[default]
    Unsigned,
}

/// One certificate chain observed on a file (a file may carry several, e.g. dual signing).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SignerChain {
    /// TBS hash of the intermediate (issuing) certificate
    #[serde(rename = "IssuerTBSHash")]
    pub issuer_tbs_hash: Option<String>,
    pub issuer_name: Option<String>,
    /// TBS hash of the leaf (publisher) certificate
    #[serde(rename = "PublisherTBSHash")]
    pub publisher_tbs_hash: Option<String>,
    pub publisher_name: Option<String>,
}

/// A single observed file as reported by a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ScanRecord {
    pub signature_status: SignatureStatus,
    pub file_signer_infos: Vec<SignerChain>,
    #[serde(rename = "IsECCSigned")]
    pub is_ecc_signed: Option<bool>,
    pub original_file_name: Option<String>,
    pub internal_name: Option<String>,
    pub file_description: Option<String>,
    pub product_name: Option<String>,
    pub file_version: Option<String>,
    #[serde(rename = "SHA256Hash")]
    pub sha256_hash: Option<String>,
    #[serde(rename = "SHA1Hash")]
    pub sha1_hash: Option<String>,
    pub file_path: Option<String>,
    #[serde(rename = "SISigningScenario")]
    pub signing_scenario: SigningScenario,
}

impl ScanRecord {
    pub fn is_signed(&self) -> bool {
        self.signature_status == SignatureStatus::Signed
    }

    pub fn is_ecc_signed(&self) -> bool {
        self.is_ecc_signed == Some(true)
    }

    /// True when none of the four naming fields carries a usable value.
    pub fn has_no_file_attributes(&self) -> bool {
        [
            &self.original_file_name,
            &self.internal_name,
            &self.file_description,
            &self.product_name,
        ]
        .into_iter()
        .all(|field| is_blank(field.as_deref()))
    }

    /// The file version, if present and not blank.
    pub fn file_version(&self) -> Option<&str> {
        self.file_version.as_deref().filter(|v| !v.trim().is_empty())
    }

    pub(crate) fn display_path(&self) -> &str {
        self.file_path.as_deref().unwrap_or("<unknown path>")
    }
}

/// Read a JSON array of scan records.
pub fn load_scan_records(path: impl AsRef<Path>) -> PolicyResult<Vec<ScanRecord>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        PolicyError::scan_input(format!("failed to read '{}': {e}", path.display()))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        PolicyError::scan_input(format!("failed to parse '{}': {e}", path.display()))
    })
}

/// Options for the build pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PipelineConfig {
    pub scan_level: ScanLevel,
    /// Emit hash rules instead of trusting files by publisher alone
    pub publisher_to_hash: bool,
}

impl PipelineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> PolicyResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PolicyError::scan_input(format!("failed to read config '{}': {e}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            PolicyError::scan_input(format!("failed to parse config '{}': {e}", path.display()))
        })
    }
}

/// Outcome of [`crate::materialize`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaterializeSummary {
    pub file_attribs_created: usize,
    pub signers_created: usize,
    pub allow_rules_created: usize,
    pub identities_skipped: usize,
}

/// Outcome of [`crate::merge_signers`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub signers_before: usize,
    pub signers_after: usize,
    pub kernel_file_publisher: usize,
    pub kernel_publisher: usize,
    pub user_file_publisher: usize,
    pub user_publisher: usize,
    /// Signers outside both AllowedSigners containers kept for other references
    pub preserved: usize,
    pub stray_signers_removed: usize,
    pub file_publisher_signers_merged: usize,
    pub publisher_signers_discarded: usize,
    pub dangling_file_attrib_refs_removed: usize,
    /// `DeniedSigner`, `UpdatePolicySigner` and `SupplementalPolicySigner` nodes re-pointed
    /// at a renamed signer
    pub external_signer_refs_updated: usize,
}

/// Outcome of [`crate::dedup_file_attribs`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileAttribDedupSummary {
    pub kept: usize,
    pub duplicates_removed: usize,
    pub strays_removed: usize,
    pub unscoped_removed: usize,
    pub file_attrib_refs_removed: usize,
    /// References to a duplicate re-pointed at the node that was kept
    pub file_attrib_refs_redirected: usize,
}

/// Outcome of [`crate::dedup_allow_rules`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AllowDedupSummary {
    pub kept: usize,
    pub orphans_removed: usize,
    pub duplicates_removed: usize,
    pub file_rule_refs_removed: usize,
}

/// Outcome of [`crate::prune_file_rule_refs`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileRuleRefPruneSummary {
    pub kernel_removed: usize,
    pub user_removed: usize,
}

/// Combined outcome of the normalization sweeps, in the order they ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizationReport {
    pub merge: MergeSummary,
    pub file_attribs: FileAttribDedupSummary,
    pub allow_rules: AllowDedupSummary,
    pub file_rule_refs: FileRuleRefPruneSummary,
}

/// Outcome of the full build pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub file_publisher_records: usize,
    pub publisher_records: usize,
    pub hash_records: usize,
    pub materialized: MaterializeSummary,
    pub normalization: NormalizationReport,
}

pub(crate) fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_record_deserializes_pascal_case() {
        let json = r#"{
            "SignatureStatus": "Signed",
            "FileSignerInfos": [
                {"IssuerTBSHash": "AA", "IssuerName": "Contoso CA", "PublisherTBSHash": "BB", "PublisherName": "Contoso"}
            ],
            "IsECCSigned": false,
            "OriginalFileName": "app.exe",
            "FileVersion": "1.0.0.0",
            "SHA256Hash": "S256",
            "SHA1Hash": "S1",
            "FilePath": "C:\\app.exe",
            "SISigningScenario": 0
        }"#;
        let record: ScanRecord = serde_json::from_str(json).unwrap();
        assert!(record.is_signed());
        assert!(!record.is_ecc_signed());
        assert_eq!(record.signing_scenario, SigningScenario::Kernel);
        assert_eq!(record.file_signer_infos.len(), 1);
        assert_eq!(
            record.file_signer_infos[0].issuer_tbs_hash.as_deref(),
            Some("AA")
        );
        assert_eq!(record.file_version(), Some("1.0.0.0"));
    }

    #[test]
    fn test_scan_record_rejects_unknown_scenario() {
        let err = serde_json::from_str::<ScanRecord>(r#"{"SISigningScenario": 7}"#).unwrap_err();
        assert!(err.to_string().contains("Invalid signing scenario"));
    }

    #[test]
    fn test_blank_version_counts_as_absent() {
        let record = ScanRecord {
            file_version: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(record.file_version(), None);
    }

    #[test]
    fn test_has_no_file_attributes_ignores_whitespace() {
        let mut record = ScanRecord {
            original_file_name: Some(" ".to_string()),
            internal_name: Some(String::new()),
            ..Default::default()
        };
        assert!(record.has_no_file_attributes());

        record.product_name = Some("Contoso Suite".to_string());
        assert!(!record.has_no_file_attributes());
    }

    #[test]
    fn test_scenario_values() {
        assert_eq!(SigningScenario::Kernel.policy_value(), "131");
        assert_eq!(SigningScenario::User.policy_value(), "12");
        assert_eq!(SigningScenario::from_policy_value("131"), Some(SigningScenario::Kernel));
        assert_eq!(SigningScenario::from_policy_value("99"), None);
        assert_eq!(u8::from(SigningScenario::User), 1);
    }

    #[test]
    fn test_pipeline_config_defaults() {
        let config: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.scan_level, ScanLevel::FilePublisher);
        assert!(!config.publisher_to_hash);

        let config: PipelineConfig =
            serde_json::from_str(r#"{"ScanLevel": "Hash", "PublisherToHash": true}"#).unwrap();
        assert_eq!(config.scan_level, ScanLevel::Hash);
        assert!(config.publisher_to_hash);
    }
}
