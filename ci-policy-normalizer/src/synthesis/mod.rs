//! Rule synthesis: classify scan records into FilePublisher, Publisher and Hash tiers.
//!
//! Synthesis is pure. It never touches a policy document and never deduplicates; merging
//! equivalent signers is left to [`crate::merge_signers`] after materialization.

mod records;

pub use records::{
    CertificateIdentity, FilePublisherRecord, HashRecord, PublisherRecord, SynthesisBundle,
};

use log::{debug, info};

use crate::types::{is_blank, ScanLevel, ScanRecord, SignerChain};

/// Rule tier a scan record is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleTier {
    FilePublisher,
    Publisher,
    Hash,
}

/// Decide the tier of a single record.
///
/// ECC-signed files never qualify for publisher tiers. At `FilePublisher` level a signed
/// record without any naming field or without a version degrades to `Publisher`, or to
/// `Hash` when `publisher_to_hash` is set.
pub fn classify(record: &ScanRecord, level: ScanLevel, publisher_to_hash: bool) -> RuleTier {
    let trusted_signature = record.is_signed() && !record.is_ecc_signed();
    match level {
        ScanLevel::Hash => RuleTier::Hash,
        ScanLevel::Publisher if trusted_signature && !publisher_to_hash => RuleTier::Publisher,
        ScanLevel::Publisher => RuleTier::Hash,
        ScanLevel::FilePublisher if !trusted_signature => RuleTier::Hash,
        ScanLevel::FilePublisher => {
            if record.has_no_file_attributes() || record.file_version().is_none() {
                if publisher_to_hash {
                    debug!(
                        "classify: passing Publisher rule to the hash tier for {}",
                        record.display_path()
                    );
                    RuleTier::Hash
                } else {
                    RuleTier::Publisher
                }
            } else {
                RuleTier::FilePublisher
            }
        }
    }
}

/// Derive the certificate identity of one signer chain.
///
/// A chain whose issuer TBS hash is blank while the publisher TBS hash is present uses
/// the leaf certificate for both identity slots.
pub fn derive_identity(chain: &SignerChain) -> CertificateIdentity {
    let text = |value: &Option<String>| value.clone().unwrap_or_default();

    if is_blank(chain.issuer_tbs_hash.as_deref()) && !is_blank(chain.publisher_tbs_hash.as_deref()) {
        CertificateIdentity {
            issuer_tbs_hash: text(&chain.publisher_tbs_hash),
            issuer_name: text(&chain.publisher_name),
            publisher_tbs_hash: text(&chain.publisher_tbs_hash),
            publisher_name: text(&chain.publisher_name),
        }
    } else {
        CertificateIdentity {
            issuer_tbs_hash: text(&chain.issuer_tbs_hash),
            issuer_name: text(&chain.issuer_name),
            publisher_tbs_hash: text(&chain.publisher_tbs_hash),
            publisher_name: text(&chain.publisher_name),
        }
    }
}

fn certificates_of(record: &ScanRecord) -> Vec<CertificateIdentity> {
    record
        .file_signer_infos
        .iter()
        .map(|chain| {
            if is_blank(chain.issuer_tbs_hash.as_deref()) && !is_blank(chain.publisher_tbs_hash.as_deref()) {
                debug!(
                    "synthesize: intermediate certificate TBS hash is empty for {}, using the leaf certificate TBS hash instead",
                    record.display_path()
                );
            }
            derive_identity(chain)
        })
        .collect()
}

fn file_publisher_record(record: &ScanRecord) -> FilePublisherRecord {
    FilePublisherRecord {
        certificates: certificates_of(record),
        file_version: record.file_version().unwrap_or_default().to_string(),
        original_file_name: record.original_file_name.clone(),
        internal_name: record.internal_name.clone(),
        file_description: record.file_description.clone(),
        product_name: record.product_name.clone(),
        file_path: record.file_path.clone(),
        sha256_hash: record.sha256_hash.clone(),
        sha1_hash: record.sha1_hash.clone(),
        scenario: record.signing_scenario,
    }
}

fn publisher_record(record: &ScanRecord) -> PublisherRecord {
    PublisherRecord {
        certificates: certificates_of(record),
        file_path: record.file_path.clone(),
        sha256_hash: record.sha256_hash.clone(),
        sha1_hash: record.sha1_hash.clone(),
        scenario: record.signing_scenario,
    }
}

fn hash_record(record: &ScanRecord) -> Option<HashRecord> {
    match (
        record.sha256_hash.as_deref(),
        record.sha1_hash.as_deref(),
        record.file_path.as_deref(),
    ) {
        (Some(sha256), Some(sha1), Some(path))
            if !is_blank(Some(sha256)) && !is_blank(Some(sha1)) && !is_blank(Some(path)) =>
        {
            Some(HashRecord {
                sha256_hash: sha256.to_string(),
                sha1_hash: sha1.to_string(),
                file_path: path.to_string(),
                scenario: record.signing_scenario,
            })
        }
        _ => None,
    }
}

/// Classify every record and emit the per-tier synthesis records, in input order.
///
/// Hash-tier records lacking either hash or the file path are skipped.
pub fn synthesize(records: &[ScanRecord], level: ScanLevel, publisher_to_hash: bool) -> SynthesisBundle {
    info!(
        "synthesize: classifying {} scan record(s) at {level} level (publisher_to_hash: {publisher_to_hash})",
        records.len()
    );

    let mut bundle = SynthesisBundle::default();
    let mut skipped = 0usize;

    for record in records {
        match classify(record, level, publisher_to_hash) {
            RuleTier::FilePublisher => bundle.file_publishers.push(file_publisher_record(record)),
            RuleTier::Publisher => bundle.publishers.push(publisher_record(record)),
            RuleTier::Hash => match hash_record(record) {
                Some(hash) => bundle.hashes.push(hash),
                None => {
                    skipped += 1;
                    info!(
                        "synthesize: skipping hash rule for {}, SHA-256, SHA-1 and path are all required",
                        record.display_path()
                    );
                }
            },
        }
    }

    info!(
        "synthesize: {} FilePublisher, {} Publisher, {} Hash record(s); {skipped} skipped",
        bundle.file_publishers.len(),
        bundle.publishers.len(),
        bundle.hashes.len()
    );
    bundle
}
