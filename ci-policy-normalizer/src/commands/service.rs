//! Policy Normalization Service Layer
//!
//! The service runs policy stages against files on disk. Every operation loads the policy,
//! runs its stage(s) in memory and saves once at the end; a stage error aborts before the
//! save and leaves the file untouched.

use std::path::Path;

use log::info;

use crate::error::PolicyResult;
use crate::ids::{IdGenerator, RandomIdGenerator};
use crate::policy::CiPolicy;

/// Main service struct holding the identifier generator used for new node IDs
#[derive(Debug, Default)]
pub struct PolicyNormalizationService<G: IdGenerator = RandomIdGenerator> {
    pub(crate) ids: G,
}

impl PolicyNormalizationService {
    /// Create a service that generates random identifiers
    pub fn new() -> Self {
        Self {
            ids: RandomIdGenerator,
        }
    }
}

impl<G: IdGenerator> PolicyNormalizationService<G> {
    /// Create a service with a caller-supplied identifier generator
    pub fn with_id_generator(ids: G) -> Self {
        Self { ids }
    }

    /// Load `path`, apply `stage` and save the result back to `path`.
    pub(crate) fn run_stage<T>(
        &mut self,
        path: &Path,
        stage_name: &str,
        stage: impl FnOnce(&mut CiPolicy, &mut G) -> PolicyResult<T>,
    ) -> PolicyResult<T> {
        let mut policy = CiPolicy::load(path)?;
        let outcome = stage(&mut policy, &mut self.ids)?;
        policy.save(path)?;
        info!("{stage_name}: saved {}", path.display());
        Ok(outcome)
    }

    // merge_signers(), dedup_file_attribs(), dedup_allow_rules(), prune_file_rule_refs()
    // and normalize() are implemented in normalize.rs
    // build() is implemented in build.rs
}
