//! Normalization stages over an in-memory policy.
//!
//! The stages only mutate the document they are handed. Persisting is left to the caller
//! (see [`crate::PolicyNormalizationService`]), so a failing stage never leaves a partial
//! write behind.

mod allow_rules;
mod file_attribs;
mod file_rule_refs;
mod keys;
mod merge_signers;

pub use allow_rules::dedup_allow_rules;
pub use file_attribs::dedup_file_attribs;
pub use file_rule_refs::prune_file_rule_refs;
pub use merge_signers::merge_signers;

use crate::error::PolicyResult;
use crate::ids::IdGenerator;
use crate::policy::CiPolicy;
use crate::types::NormalizationReport;

/// Run every sweep in pipeline order: signer merge, FileAttrib dedup, Allow dedup,
/// FileRuleRef pruning.
pub fn normalize_policy(policy: &mut CiPolicy, ids: &mut dyn IdGenerator) -> PolicyResult<NormalizationReport> {
    let merge = merge_signers(policy, ids)?;
    let file_attribs = dedup_file_attribs(policy)?;
    let allow_rules = dedup_allow_rules(policy)?;
    let file_rule_refs = prune_file_rule_refs(policy)?;
    Ok(NormalizationReport {
        merge,
        file_attribs,
        allow_rules,
        file_rule_refs,
    })
}
