//! File-based normalization operations

use std::path::Path;

use crate::error::PolicyResult;
use crate::ids::IdGenerator;
use crate::normalize;
use crate::types::{
    AllowDedupSummary, FileAttribDedupSummary, FileRuleRefPruneSummary, MergeSummary,
    NormalizationReport,
};

impl<G: IdGenerator> super::service::PolicyNormalizationService<G> {
    /// Merge equivalent signers in the policy at `path`.
    pub fn merge_signers(&mut self, path: impl AsRef<Path>) -> PolicyResult<MergeSummary> {
        self.run_stage(path.as_ref(), "merge_signers", |policy, ids| {
            normalize::merge_signers(policy, ids)
        })
    }

    /// Remove stray, unscoped and duplicate FileAttrib nodes from the policy at `path`.
    pub fn dedup_file_attribs(&mut self, path: impl AsRef<Path>) -> PolicyResult<FileAttribDedupSummary> {
        self.run_stage(path.as_ref(), "dedup_file_attribs", |policy, _| {
            normalize::dedup_file_attribs(policy)
        })
    }

    /// Remove orphan and duplicate Allow rules from the policy at `path`.
    pub fn dedup_allow_rules(&mut self, path: impl AsRef<Path>) -> PolicyResult<AllowDedupSummary> {
        self.run_stage(path.as_ref(), "dedup_allow_rules", |policy, _| {
            normalize::dedup_allow_rules(policy)
        })
    }

    /// Remove FileRuleRef nodes pointing at missing rules from the policy at `path`.
    pub fn prune_file_rule_refs(&mut self, path: impl AsRef<Path>) -> PolicyResult<FileRuleRefPruneSummary> {
        self.run_stage(path.as_ref(), "prune_file_rule_refs", |policy, _| {
            normalize::prune_file_rule_refs(policy)
        })
    }

    /// Run all normalization sweeps with a single load and save.
    pub fn normalize(&mut self, path: impl AsRef<Path>) -> PolicyResult<NormalizationReport> {
        self.run_stage(path.as_ref(), "normalize", |policy, ids| {
            normalize::normalize_policy(policy, ids)
        })
    }
}
