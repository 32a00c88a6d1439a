//! Rule materialization: turn synthesis records into policy nodes.
//!
//! Every record produces fresh nodes with freshly generated IDs. Equivalent nodes are
//! collapsed later by the merge and dedup stages, never here.

use ci_policy_document::NodeId;
use log::{debug, info, warn};

use crate::ids::IdGenerator;
use crate::policy::schema::{
    ALLOW, ALLOWED_SIGNER, CERT_PUBLISHER, CERT_ROOT, CI_SIGNER, FILE_ATTRIB, FILE_ATTRIB_REF,
    FILE_RULE_REF, FRIENDLY_NAME, HASH, ID, MINIMUM_FILE_VERSION, NAME, RULE_ID, SIGNER, SIGNER_ID,
    TYPE, VALUE,
};
use crate::policy::CiPolicy;
use crate::synthesis::{
    CertificateIdentity, FilePublisherRecord, HashRecord, PublisherRecord, SynthesisBundle,
};
use crate::types::{is_blank, MaterializeSummary, SigningScenario};

pub(crate) const FILE_ATTRIB_PREFIX: &str = "ID_FILEATTRIB_A_";
pub(crate) const FILE_PUBLISHER_SIGNER_PREFIX: &str = "ID_SIGNER_A_";
pub(crate) const PUBLISHER_SIGNER_PREFIX: &str = "ID_SIGNER_B_";
const SHA256_ALLOW_PREFIX: &str = "ID_ALLOW_A_";
const SHA1_ALLOW_PREFIX: &str = "ID_ALLOW_B_";

/// Append nodes for every record in `bundle` to `policy`.
///
/// Missing containers are created at their schema position first.
pub fn materialize(
    policy: &mut CiPolicy,
    bundle: &SynthesisBundle,
    ids: &mut dyn IdGenerator,
) -> MaterializeSummary {
    let mut summary = MaterializeSummary::default();
    if bundle.is_empty() {
        info!("materialize: synthesis bundle is empty, nothing to add");
        return summary;
    }

    policy.ensure_file_rules();
    policy.ensure_signers();
    for scenario in SigningScenario::ALL {
        policy.ensure_allowed_signers(scenario);
        policy.ensure_file_rules_ref(scenario);
    }
    policy.ensure_ci_signers();

    info!(
        "materialize: adding {} FilePublisher, {} Publisher and {} Hash record(s)",
        bundle.file_publishers.len(),
        bundle.publishers.len(),
        bundle.hashes.len()
    );

    for record in &bundle.file_publishers {
        add_file_publisher(policy, record, ids, &mut summary);
    }
    for record in &bundle.publishers {
        add_publisher(policy, record, ids, &mut summary);
    }
    for record in &bundle.hashes {
        add_hash(policy, record, ids, &mut summary);
    }

    debug!("materialize: {summary:?}");
    summary
}

/// Identities usable as a `CertRoot`; the rest are counted as skipped.
fn usable_identities<'a>(
    certificates: &'a [CertificateIdentity],
    file_path: Option<&str>,
    summary: &mut MaterializeSummary,
) -> Vec<&'a CertificateIdentity> {
    certificates
        .iter()
        .filter(|identity| {
            let usable = !is_blank(Some(&identity.issuer_tbs_hash));
            if !usable {
                summary.identities_skipped += 1;
                warn!(
                    "materialize: skipping certificate identity without a TBS hash for {}",
                    file_path.unwrap_or("<unknown path>")
                );
            }
            usable
        })
        .collect()
}

fn add_file_publisher(
    policy: &mut CiPolicy,
    record: &FilePublisherRecord,
    ids: &mut dyn IdGenerator,
    summary: &mut MaterializeSummary,
) {
    let identities = usable_identities(&record.certificates, record.file_path.as_deref(), summary);
    if identities.is_empty() {
        warn!(
            "materialize: no usable signer for FilePublisher record {}",
            record.file_path.as_deref().unwrap_or("<unknown path>")
        );
        return;
    }

    let file_attrib_id = format!("{FILE_ATTRIB_PREFIX}{}", ids.next_id());
    let attrib = policy.create_element(FILE_ATTRIB);
    {
        let doc = policy.document_mut();
        doc.set_attribute(attrib, ID, file_attrib_id.as_str());
        let friendly_name = record
            .file_path
            .as_deref()
            .or_else(|| record.naming_attribute().map(|(_, value)| value))
            .unwrap_or_default();
        doc.set_attribute(attrib, FRIENDLY_NAME, friendly_name);
        if let Some((attribute, value)) = record.naming_attribute() {
            doc.set_attribute(attrib, attribute, value);
        }
        doc.set_attribute(attrib, MINIMUM_FILE_VERSION, record.file_version.as_str());
    }
    let file_rules = policy.ensure_file_rules();
    policy.document_mut().append_child(file_rules, attrib);
    summary.file_attribs_created += 1;

    for identity in identities {
        let signer_id = format!("{FILE_PUBLISHER_SIGNER_PREFIX}{}", ids.next_id());
        let signer = create_signer(policy, &signer_id, identity);
        let reference = policy.create_element(FILE_ATTRIB_REF);
        policy
            .document_mut()
            .set_attribute(reference, RULE_ID, file_attrib_id.as_str());
        policy.document_mut().append_child(signer, reference);
        activate_signer(policy, signer, &signer_id, record.scenario);
        summary.signers_created += 1;
    }
}

fn add_publisher(
    policy: &mut CiPolicy,
    record: &PublisherRecord,
    ids: &mut dyn IdGenerator,
    summary: &mut MaterializeSummary,
) {
    for identity in usable_identities(&record.certificates, record.file_path.as_deref(), summary) {
        let signer_id = format!("{PUBLISHER_SIGNER_PREFIX}{}", ids.next_id());
        let signer = create_signer(policy, &signer_id, identity);
        activate_signer(policy, signer, &signer_id, record.scenario);
        summary.signers_created += 1;
    }
}

fn add_hash(
    policy: &mut CiPolicy,
    record: &HashRecord,
    ids: &mut dyn IdGenerator,
    summary: &mut MaterializeSummary,
) {
    if record.scenario == SigningScenario::Kernel
        && !record.file_path.to_ascii_lowercase().ends_with(".msi")
    {
        warn!(
            "materialize: kernel-mode hash rule created for {}, kernel-mode hash rules only apply to drivers",
            record.file_path
        );
    }

    let suffix = ids.next_id();
    let rules = [
        (SHA256_ALLOW_PREFIX, "Sha256", record.sha256_hash.as_str()),
        (SHA1_ALLOW_PREFIX, "Sha1", record.sha1_hash.as_str()),
    ];
    for (prefix, algorithm, hash) in rules {
        let rule_id = format!("{prefix}{suffix}");
        let allow = policy.create_element(ALLOW);
        {
            let doc = policy.document_mut();
            doc.set_attribute(allow, ID, rule_id.as_str());
            doc.set_attribute(
                allow,
                FRIENDLY_NAME,
                format!("{} Hash {algorithm}", record.file_name()),
            );
            doc.set_attribute(allow, HASH, hash);
        }
        let file_rules = policy.ensure_file_rules();
        policy.document_mut().append_child(file_rules, allow);

        let reference = policy.create_element(FILE_RULE_REF);
        policy.document_mut().set_attribute(reference, RULE_ID, rule_id);
        let container = policy.ensure_file_rules_ref(record.scenario);
        policy.document_mut().append_child(container, reference);
        summary.allow_rules_created += 1;
    }
}

/// Create and append a `<Signer>` with its `CertRoot` and `CertPublisher` children.
fn create_signer(policy: &mut CiPolicy, signer_id: &str, identity: &CertificateIdentity) -> NodeId {
    let signer = policy.create_element(SIGNER);
    let cert_root = policy.create_element(CERT_ROOT);
    let cert_publisher =
        (!is_blank(Some(&identity.publisher_name))).then(|| policy.create_element(CERT_PUBLISHER));

    let signers = policy.ensure_signers();
    let doc = policy.document_mut();
    doc.set_attribute(signer, ID, signer_id);
    doc.set_attribute(signer, NAME, identity.issuer_name.as_str());
    doc.set_attribute(cert_root, TYPE, "TBS");
    doc.set_attribute(cert_root, VALUE, identity.issuer_tbs_hash.as_str());
    doc.append_child(signer, cert_root);
    if let Some(cert_publisher) = cert_publisher {
        doc.set_attribute(cert_publisher, VALUE, identity.publisher_name.as_str());
        doc.append_child(signer, cert_publisher);
    }
    doc.append_child(signers, signer);
    signer
}

/// Reference the signer from the scenario's `AllowedSigners` and, for user mode, `CiSigners`.
fn activate_signer(policy: &mut CiPolicy, signer: NodeId, signer_id: &str, scenario: SigningScenario) {
    debug_assert!(policy.document().is_attached(signer));
    let allowed_signers = policy.ensure_allowed_signers(scenario);
    let allowed = policy.create_element(ALLOWED_SIGNER);
    policy.document_mut().set_attribute(allowed, SIGNER_ID, signer_id);
    policy.document_mut().append_child(allowed_signers, allowed);

    if scenario == SigningScenario::User {
        let ci_signers = policy.ensure_ci_signers();
        let ci_signer = policy.create_element(CI_SIGNER);
        policy.document_mut().set_attribute(ci_signer, SIGNER_ID, signer_id);
        policy.document_mut().append_child(ci_signers, ci_signer);
    }
}
