//! This crate provides the core logic for code integrity policy authoring:
//! - Rule synthesis from file scan records
//! - Rule materialization into a policy document
//! - Signer merging and FileAttrib / Allow / FileRuleRef pruning
//! - A file-based service layer running those stages
//!

pub mod commands;
mod error;
mod ids;
mod materialize;
mod normalize;
pub mod policy;
mod synthesis;
mod types;

// Re-exports for a small, focused public API
pub use commands::PolicyNormalizationService;
pub use error::{PolicyError, PolicyResult};
pub use ids::{IdGenerator, RandomIdGenerator, SequentialIdGenerator};
pub use materialize::materialize;
pub use normalize::{
    dedup_allow_rules, dedup_file_attribs, merge_signers, normalize_policy, prune_file_rule_refs,
};
pub use policy::CiPolicy;
pub use synthesis::{
    classify, derive_identity, synthesize, CertificateIdentity, FilePublisherRecord, HashRecord,
    PublisherRecord, RuleTier, SynthesisBundle,
};
pub use types::{
    load_scan_records, AllowDedupSummary, BuildReport, FileAttribDedupSummary,
    FileRuleRefPruneSummary, MaterializeSummary, MergeSummary, NormalizationReport,
    PipelineConfig, ScanLevel, ScanRecord, SignatureStatus, SignerChain, SigningScenario,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesize_then_materialize_sample() {
        let records: Vec<ScanRecord> = serde_json::from_str(
            r#"[{"SignatureStatus": "Unsigned", "SHA256Hash": "AA", "SHA1Hash": "BB",
                 "FilePath": "C:\\tool.exe", "SISigningScenario": 1}]"#,
        )
        .unwrap();
        let bundle = synthesize(&records, ScanLevel::default(), false);
        assert_eq!(bundle.hashes.len(), 1);

        let mut policy = CiPolicy::parse("<SiPolicy />").unwrap();
        let summary = materialize(&mut policy, &bundle, &mut SequentialIdGenerator::new());
        assert_eq!(summary.allow_rules_created, 2);
        assert!(policy.to_xml_string().unwrap().contains("tool.exe Hash Sha256"));
    }
}
