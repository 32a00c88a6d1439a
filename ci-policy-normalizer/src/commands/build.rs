//! Build pipeline: synthesize rules from scan records, materialize them into a policy and
//! normalize the result

use std::path::Path;

use log::info;

use crate::error::PolicyResult;
use crate::ids::IdGenerator;
use crate::materialize::materialize;
use crate::normalize::normalize_policy;
use crate::synthesis::synthesize;
use crate::types::{BuildReport, PipelineConfig, ScanRecord};

impl<G: IdGenerator> super::service::PolicyNormalizationService<G> {
    /// Add rules for `records` to the policy at `path` and normalize it.
    pub fn build(
        &mut self,
        path: impl AsRef<Path>,
        records: &[ScanRecord],
        config: &PipelineConfig,
    ) -> PolicyResult<BuildReport> {
        let bundle = synthesize(records, config.scan_level, config.publisher_to_hash);
        info!(
            "build: {} scan record(s) produced {} FilePublisher, {} Publisher and {} Hash rule(s)",
            records.len(),
            bundle.file_publishers.len(),
            bundle.publishers.len(),
            bundle.hashes.len()
        );

        self.run_stage(path.as_ref(), "build", |policy, ids| {
            let materialized = materialize(policy, &bundle, &mut *ids);
            let normalization = normalize_policy(policy, ids)?;
            Ok(BuildReport {
                file_publisher_records: bundle.file_publishers.len(),
                publisher_records: bundle.publishers.len(),
                hash_records: bundle.hashes.len(),
                materialized,
                normalization,
            })
        })
    }
}
