//! Signer merge: collapse structurally identical signers per scenario and kind.

use std::collections::{HashMap, HashSet};

use ci_policy_document::{Document, NodeId};
use log::{debug, info};

use super::keys::{
    external_signer_references, externally_referenced_signers, ScenarioIndex, SignerIdentityKey,
    SignerKind,
};
use crate::error::{PolicyError, PolicyResult};
use crate::ids::IdGenerator;
use crate::policy::schema::{
    ALLOWED_SIGNER, ALLOWED_SIGNERS, CI_SIGNER, FILE_ATTRIB, FILE_ATTRIB_REF, ID, RULE_ID, SIGNER,
    SIGNER_ID,
};
use crate::policy::CiPolicy;
use crate::types::{MergeSummary, SigningScenario};

/// Rebuild order of the signer containers.
const BUCKET_ORDER: [(SigningScenario, SignerKind); 4] = [
    (SigningScenario::Kernel, SignerKind::FilePublisher),
    (SigningScenario::Kernel, SignerKind::Publisher),
    (SigningScenario::User, SignerKind::FilePublisher),
    (SigningScenario::User, SignerKind::Publisher),
];

fn bucket_index(scenario: SigningScenario, kind: SignerKind) -> usize {
    let kind_offset = match kind {
        SignerKind::FilePublisher => 0,
        SignerKind::Publisher => 1,
    };
    scenario.index() * 2 + kind_offset
}

/// A signer kept by the merge, as detached copies ready to be re-appended.
#[derive(Debug)]
struct RetainedSigner {
    signer: NodeId,
    allowed_signer: NodeId,
    ci_signer: Option<NodeId>,
    rule_ids: HashSet<String>,
    /// IDs of the original signer and of every duplicate folded into it
    former_ids: Vec<String>,
}

/// Retained signers of one (scenario, kind) pair in first-seen order.
#[derive(Debug, Default)]
struct SignerBucket {
    entries: Vec<RetainedSigner>,
    positions: HashMap<SignerIdentityKey, usize>,
}

/// A signer's `FileAttribRef` children split by validity.
#[derive(Debug, Default)]
struct SignerRefs {
    /// Resolvable references, first occurrence per `RuleID`
    valid: Vec<(String, NodeId)>,
    dangling: Vec<NodeId>,
    repeated: Vec<NodeId>,
}

fn partition_refs(doc: &Document, signer: NodeId, live_attribs: &HashSet<String>) -> SignerRefs {
    let mut refs = SignerRefs::default();
    let mut seen = HashSet::new();
    for reference in doc.child_elements(signer, FILE_ATTRIB_REF) {
        match doc.attribute(reference, RULE_ID) {
            Some(rule_id) if live_attribs.contains(rule_id) => {
                if seen.insert(rule_id.to_string()) {
                    refs.valid.push((rule_id.to_string(), reference));
                } else {
                    refs.repeated.push(reference);
                }
            }
            _ => refs.dangling.push(reference),
        }
    }
    refs
}

fn count_dangling(summary: &mut MergeSummary, signer_id: &str, refs: &SignerRefs) {
    if refs.dangling.is_empty() {
        return;
    }
    info!(
        "merge_signers: dropping {} FileAttribRef(s) of signer {signer_id} that point at missing FileAttrib nodes",
        refs.dangling.len()
    );
    summary.dangling_file_attrib_refs_removed += refs.dangling.len();
}

/// Merge equivalent signers and rewrite the `Signers`, `AllowedSigners` and `CiSigners`
/// containers.
///
/// Signers are bucketed by scenario (from `AllowedSigners` membership) and kind (whether
/// any resolvable `FileAttribRef` remains). Within a bucket the identity key decides
/// equivalence: FilePublisher signers accumulate the union of their file references,
/// later Publisher signers are discarded. Every retained signer receives a new ID.
pub fn merge_signers(policy: &mut CiPolicy, ids: &mut dyn IdGenerator) -> PolicyResult<MergeSummary> {
    let signers_container = policy.require_signers()?;
    let signers = policy.document().child_elements(signers_container, SIGNER);
    if signers.is_empty() {
        info!("merge_signers: no <Signer> nodes found, nothing to merge");
        return Ok(MergeSummary::default());
    }

    let file_rules = policy.require_file_rules()?;
    let kernel_allowed = policy.allowed_signers(SigningScenario::Kernel);
    let user_allowed = policy.allowed_signers(SigningScenario::User);
    if kernel_allowed.is_none() && user_allowed.is_none() {
        return Err(PolicyError::missing_container(ALLOWED_SIGNERS));
    }

    let mut summary = MergeSummary {
        signers_before: signers.len(),
        ..MergeSummary::default()
    };

    let doc = policy.document();
    let live_attribs: HashSet<String> = doc
        .child_elements(file_rules, FILE_ATTRIB)
        .into_iter()
        .filter_map(|node| doc.attribute(node, ID))
        .map(str::to_string)
        .collect();
    let scenarios = ScenarioIndex::from_policy(policy);
    let external = externally_referenced_signers(doc);
    let ci_signers_container = policy.ci_signers();

    let mut buckets: [SignerBucket; 4] = Default::default();
    let mut preserved: Vec<(NodeId, Option<NodeId>)> = Vec::new();

    for signer in signers {
        let signer_id = policy.required_attribute(signer, SIGNER, ID)?.to_string();
        let key = SignerIdentityKey::from_signer(policy.document(), signer);
        let refs = partition_refs(policy.document(), signer, &live_attribs);
        let kind = if refs.valid.is_empty() {
            SignerKind::Publisher
        } else {
            SignerKind::FilePublisher
        };

        let Some(scenario) = scenarios.scenario_of(&signer_id) else {
            if external.contains(&signer_id) {
                count_dangling(&mut summary, &signer_id, &refs);
                let doc = policy.document_mut();
                for reference in refs.dangling.iter().chain(&refs.repeated) {
                    doc.remove_child(signer, *reference);
                }
                let ci_signer = ci_signers_container.and_then(|container| {
                    doc.find_child_with_attribute(container, CI_SIGNER, SIGNER_ID, &signer_id)
                });
                debug!("merge_signers: preserving signer {signer_id} referenced outside AllowedSigners");
                preserved.push((signer, ci_signer));
            } else {
                info!("merge_signers: removing signer {signer_id} that no scenario allows");
                summary.stray_signers_removed += 1;
            }
            continue;
        };

        let bucket = &mut buckets[bucket_index(scenario, kind)];
        if let Some(&position) = bucket.positions.get(&key) {
            let retained = &mut bucket.entries[position];
            retained.former_ids.push(signer_id.clone());
            match kind {
                SignerKind::FilePublisher => {
                    let doc = policy.document_mut();
                    for (rule_id, reference) in refs.valid {
                        if retained.rule_ids.insert(rule_id) {
                            let copy = doc.deep_clone(reference);
                            doc.append_child(retained.signer, copy);
                        }
                    }
                    debug!("merge_signers: merged {scenario} FilePublisher signer {signer_id} into an equivalent signer");
                    summary.file_publisher_signers_merged += 1;
                }
                SignerKind::Publisher => {
                    debug!("merge_signers: discarding duplicate {scenario} Publisher signer {signer_id}");
                    summary.publisher_signers_discarded += 1;
                }
            }
            continue;
        }

        count_dangling(&mut summary, &signer_id, &refs);
        let retained = retain_signer(policy, signer, &signer_id, scenario, &refs.valid, ci_signers_container);
        bucket.positions.insert(key, bucket.entries.len());
        bucket.entries.push(retained);
    }

    let mut renamed: HashMap<String, String> = HashMap::new();
    for (index, bucket) in buckets.iter().enumerate() {
        let (_, kind) = BUCKET_ORDER[index];
        for entry in &bucket.entries {
            let new_id = format!("{}{}", kind.id_prefix(), ids.next_id());
            let doc = policy.document_mut();
            doc.set_attribute(entry.signer, ID, new_id.as_str());
            doc.set_attribute(entry.allowed_signer, SIGNER_ID, new_id.as_str());
            if let Some(ci_signer) = entry.ci_signer {
                doc.set_attribute(ci_signer, SIGNER_ID, new_id.as_str());
            }
            for former in &entry.former_ids {
                renamed.insert(former.clone(), new_id.clone());
            }
        }
    }

    let doc = policy.document_mut();
    for reference in external_signer_references(doc) {
        let Some(new_id) = doc
            .attribute(reference, SIGNER_ID)
            .and_then(|old| renamed.get(old))
            .cloned()
        else {
            continue;
        };
        debug!(
            "merge_signers: pointing {} at renamed signer {new_id}",
            doc.local_name(reference)
        );
        doc.set_attribute(reference, SIGNER_ID, new_id);
        summary.external_signer_refs_updated += 1;
    }

    {
        let doc = policy.document_mut();
        doc.clear_children(signers_container);
        for container in [kernel_allowed, user_allowed].into_iter().flatten() {
            doc.clear_children(container);
        }
        if let Some(container) = ci_signers_container {
            doc.clear_children(container);
        }
    }

    let needs_ci_signers = buckets
        .iter()
        .flat_map(|bucket| &bucket.entries)
        .any(|entry| entry.ci_signer.is_some())
        || preserved.iter().any(|(_, ci_signer)| ci_signer.is_some());
    let ci_signers_container = if needs_ci_signers {
        Some(policy.ensure_ci_signers())
    } else {
        ci_signers_container
    };

    for (index, bucket) in buckets.into_iter().enumerate() {
        let (scenario, kind) = BUCKET_ORDER[index];
        match (scenario, kind) {
            (SigningScenario::Kernel, SignerKind::FilePublisher) => summary.kernel_file_publisher = bucket.entries.len(),
            (SigningScenario::Kernel, SignerKind::Publisher) => summary.kernel_publisher = bucket.entries.len(),
            (SigningScenario::User, SignerKind::FilePublisher) => summary.user_file_publisher = bucket.entries.len(),
            (SigningScenario::User, SignerKind::Publisher) => summary.user_publisher = bucket.entries.len(),
        }
        if bucket.entries.is_empty() {
            continue;
        }

        let allowed_container = policy.ensure_allowed_signers(scenario);
        let doc = policy.document_mut();
        for entry in bucket.entries {
            doc.append_child(signers_container, entry.signer);
            doc.append_child(allowed_container, entry.allowed_signer);
            if let (Some(ci_signer), Some(container)) = (entry.ci_signer, ci_signers_container) {
                doc.append_child(container, ci_signer);
            }
        }
    }

    summary.preserved = preserved.len();
    let doc = policy.document_mut();
    for (signer, ci_signer) in preserved {
        doc.append_child(signers_container, signer);
        if let (Some(ci_signer), Some(container)) = (ci_signer, ci_signers_container) {
            doc.append_child(container, ci_signer);
        }
    }

    summary.signers_after = doc.child_elements(signers_container, SIGNER).len();
    info!(
        "merge_signers: {} signer(s) before, {} after ({} merged, {} discarded, {} stray)",
        summary.signers_before,
        summary.signers_after,
        summary.file_publisher_signers_merged,
        summary.publisher_signers_discarded,
        summary.stray_signers_removed
    );
    Ok(summary)
}

/// Detached copies of a signer (keeping only `valid` file references) and of its
/// activation nodes. Missing activation nodes are created.
fn retain_signer(
    policy: &mut CiPolicy,
    signer: NodeId,
    signer_id: &str,
    scenario: SigningScenario,
    valid: &[(String, NodeId)],
    ci_signers_container: Option<NodeId>,
) -> RetainedSigner {
    let existing_allowed = policy.allowed_signers(scenario).and_then(|container| {
        policy
            .document()
            .find_child_with_attribute(container, ALLOWED_SIGNER, SIGNER_ID, signer_id)
    });
    let existing_ci = match scenario {
        SigningScenario::User => ci_signers_container.and_then(|container| {
            policy
                .document()
                .find_child_with_attribute(container, CI_SIGNER, SIGNER_ID, signer_id)
        }),
        SigningScenario::Kernel => None,
    };

    let allowed_signer = match existing_allowed {
        Some(node) => policy.document_mut().deep_clone(node),
        None => policy.create_element(ALLOWED_SIGNER),
    };
    let ci_signer = match (scenario, existing_ci) {
        (SigningScenario::Kernel, _) => None,
        (SigningScenario::User, Some(node)) => Some(policy.document_mut().deep_clone(node)),
        (SigningScenario::User, None) => {
            debug!("merge_signers: creating missing CiSigner for user-mode signer {signer_id}");
            Some(policy.create_element(CI_SIGNER))
        }
    };

    let doc = policy.document_mut();
    let copy = doc.deep_clone(signer);
    for reference in doc.child_elements(copy, FILE_ATTRIB_REF) {
        doc.remove_child(copy, reference);
    }
    let mut rule_ids = HashSet::new();
    for (rule_id, reference) in valid {
        rule_ids.insert(rule_id.clone());
        let reference_copy = doc.deep_clone(*reference);
        doc.append_child(copy, reference_copy);
    }

    RetainedSigner {
        signer: copy,
        allowed_signer,
        ci_signer,
        rule_ids,
        former_ids: vec![signer_id.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequentialIdGenerator;

    const POLICY: &str = r#"<SiPolicy xmlns="urn:schemas-microsoft-com:sipolicy">
  <FileRules>
    <FileAttrib ID="ID_FILEATTRIB_1" FileName="a.exe" MinimumFileVersion="1.0.0.0" />
    <FileAttrib ID="ID_FILEATTRIB_2" FileName="b.exe" MinimumFileVersion="1.0.0.0" />
  </FileRules>
  <Signers>
    <Signer ID="S1" Name="Contoso CA">
      <CertRoot Type="TBS" Value="ROOT" />
      <CertPublisher Value="Contoso" />
      <FileAttribRef RuleID="ID_FILEATTRIB_1" />
    </Signer>
    <Signer ID="S2" Name="Contoso CA">
      <CertRoot Type="TBS" Value="ROOT" />
      <CertPublisher Value="Contoso" />
      <FileAttribRef RuleID="ID_FILEATTRIB_2" />
      <FileAttribRef RuleID="ID_FILEATTRIB_1" />
    </Signer>
    <Signer ID="P1" Name="Contoso CA">
      <CertRoot Type="TBS" Value="ROOT" />
    </Signer>
    <Signer ID="P2" Name="Contoso CA">
      <CertRoot Type="TBS" Value="ROOT" />
    </Signer>
    <Signer ID="K1" Name="Contoso CA">
      <CertRoot Type="TBS" Value="ROOT" />
    </Signer>
  </Signers>
  <SigningScenarios>
    <SigningScenario Value="131" ID="ID_SIGNINGSCENARIO_DRIVERS_1">
      <ProductSigners>
        <AllowedSigners>
          <AllowedSigner SignerId="K1" />
        </AllowedSigners>
      </ProductSigners>
    </SigningScenario>
    <SigningScenario Value="12" ID="ID_SIGNINGSCENARIO_WINDOWS">
      <ProductSigners>
        <AllowedSigners>
          <AllowedSigner SignerId="S1" />
          <AllowedSigner SignerId="S2" />
          <AllowedSigner SignerId="P1" />
          <AllowedSigner SignerId="P2" />
        </AllowedSigners>
      </ProductSigners>
    </SigningScenario>
  </SigningScenarios>
  <CiSigners>
    <CiSigner SignerId="S1" />
    <CiSigner SignerId="S2" />
    <CiSigner SignerId="P1" />
  </CiSigners>
</SiPolicy>"#;

    fn signer_ids(policy: &CiPolicy) -> Vec<String> {
        let doc = policy.document();
        doc.select_all(doc.root(), "Signers/Signer")
            .into_iter()
            .map(|n| doc.attribute(n, ID).unwrap().to_string())
            .collect()
    }

    fn signer_ids_in(policy: &CiPolicy, container: NodeId, element: &str) -> Vec<String> {
        let doc = policy.document();
        doc.child_elements(container, element)
            .into_iter()
            .map(|n| doc.attribute(n, SIGNER_ID).unwrap().to_string())
            .collect()
    }

    #[test_log::test]
    fn test_merges_and_rebuilds_in_bucket_order() {
        let mut policy = CiPolicy::parse(POLICY).unwrap();
        let summary = merge_signers(&mut policy, &mut SequentialIdGenerator::new()).unwrap();

        assert_eq!(summary.signers_before, 5);
        assert_eq!(summary.signers_after, 3);
        assert_eq!(summary.kernel_publisher, 1);
        assert_eq!(summary.user_file_publisher, 1);
        assert_eq!(summary.user_publisher, 1);
        assert_eq!(summary.file_publisher_signers_merged, 1);
        assert_eq!(summary.publisher_signers_discarded, 1);

        let ids = signer_ids(&policy);
        assert!(ids[0].starts_with("ID_SIGNER_B_"));
        assert!(ids[1].starts_with("ID_SIGNER_A_"));
        assert!(ids[2].starts_with("ID_SIGNER_B_"));

        let doc = policy.document();
        let merged = doc.select_all(doc.root(), "Signers/Signer")[1];
        let rule_ids: Vec<_> = doc
            .child_elements(merged, FILE_ATTRIB_REF)
            .into_iter()
            .map(|r| doc.attribute(r, RULE_ID).unwrap())
            .collect();
        assert_eq!(rule_ids, vec!["ID_FILEATTRIB_1", "ID_FILEATTRIB_2"]);

        let kernel = policy.allowed_signers(SigningScenario::Kernel).unwrap();
        let user = policy.allowed_signers(SigningScenario::User).unwrap();
        assert_eq!(signer_ids_in(&policy, kernel, ALLOWED_SIGNER), vec![ids[0].clone()]);
        assert_eq!(
            signer_ids_in(&policy, user, ALLOWED_SIGNER),
            vec![ids[1].clone(), ids[2].clone()]
        );
        assert_eq!(
            signer_ids_in(&policy, policy.ci_signers().unwrap(), CI_SIGNER),
            vec![ids[1].clone(), ids[2].clone()]
        );
    }

    #[test]
    fn test_dangling_ref_dropped_and_signer_becomes_publisher() {
        let xml = POLICY.replace(
            r#"<FileAttribRef RuleID="ID_FILEATTRIB_1" />
    </Signer>
    <Signer ID="S2""#,
            r#"<FileAttribRef RuleID="ID_FILEATTRIB_MISSING" />
    </Signer>
    <Signer ID="S2""#,
        );
        let mut policy = CiPolicy::parse(&xml).unwrap();
        let summary = merge_signers(&mut policy, &mut SequentialIdGenerator::new()).unwrap();

        assert_eq!(summary.dangling_file_attrib_refs_removed, 1);
        // S1 keeps its CertPublisher, so it does not collide with P1.
        assert_eq!(summary.user_publisher, 2);
        assert_eq!(summary.publisher_signers_discarded, 1);
        assert_eq!(summary.user_file_publisher, 1);
        assert_eq!(summary.file_publisher_signers_merged, 0);

        let doc = policy.document();
        let missing = doc
            .descendants(doc.root())
            .into_iter()
            .filter(|n| doc.attribute(*n, RULE_ID) == Some("ID_FILEATTRIB_MISSING"))
            .count();
        assert_eq!(missing, 0);
    }

    #[test]
    fn test_stray_signer_removed_and_denied_signer_preserved() {
        let xml = POLICY.replace(
            "<Signers>",
            r#"<Signers>
    <Signer ID="STRAY" Name="Nobody" />
    <Signer ID="DENIED" Name="Fabrikam"><CertRoot Type="TBS" Value="BAD" /></Signer>"#,
        )
        .replace(
            "</AllowedSigners>\n      </ProductSigners>\n    </SigningScenario>\n  </SigningScenarios>",
            "</AllowedSigners>\n        <DeniedSigners><DeniedSigner SignerId=\"DENIED\" /></DeniedSigners>\n      </ProductSigners>\n    </SigningScenario>\n  </SigningScenarios>",
        );
        let mut policy = CiPolicy::parse(&xml).unwrap();
        let summary = merge_signers(&mut policy, &mut SequentialIdGenerator::new()).unwrap();

        assert_eq!(summary.stray_signers_removed, 1);
        assert_eq!(summary.preserved, 1);
        let ids = signer_ids(&policy);
        assert_eq!(ids.last().map(String::as_str), Some("DENIED"));
        assert!(!ids.iter().any(|id| id == "STRAY"));
    }

    #[test_log::test]
    fn test_update_and_supplemental_signers_follow_renamed_signers() {
        let xml = POLICY.replace(
            "  <CiSigners>",
            r#"  <UpdatePolicySigners>
    <UpdatePolicySigner SignerId="S1" />
    <UpdatePolicySigner SignerId="S2" />
  </UpdatePolicySigners>
  <SupplementalPolicySigners>
    <SupplementalPolicySigner SignerId="P2" />
  </SupplementalPolicySigners>
  <CiSigners>"#,
        );
        let mut policy = CiPolicy::parse(&xml).unwrap();
        let summary = merge_signers(&mut policy, &mut SequentialIdGenerator::new()).unwrap();

        assert_eq!(summary.external_signer_refs_updated, 3);
        assert_eq!(summary.preserved, 0);

        let doc = policy.document();
        let signer_of = |path: &str| -> Vec<String> {
            doc.select_all(doc.root(), path)
                .into_iter()
                .map(|n| doc.attribute(n, SIGNER_ID).unwrap().to_string())
                .collect()
        };
        let ids = signer_ids(&policy);
        let update = signer_of("UpdatePolicySigners/UpdatePolicySigner");
        // S2 was folded into S1, so both references name the merged signer.
        assert_eq!(update, vec![ids[1].clone(), ids[1].clone()]);
        assert!(update[0].starts_with("ID_SIGNER_A_"));
        // P2 was discarded as a duplicate of P1.
        assert_eq!(
            signer_of("SupplementalPolicySigners/SupplementalPolicySigner"),
            vec![ids[2].clone()]
        );
    }

    #[test]
    fn test_dangling_refs_of_dropped_signers_are_not_counted() {
        let xml = POLICY.replace(
            "<Signers>",
            r#"<Signers>
    <Signer ID="STRAY" Name="Nobody"><FileAttribRef RuleID="ID_FILEATTRIB_GONE" /></Signer>"#,
        );
        let mut policy = CiPolicy::parse(&xml).unwrap();
        let summary = merge_signers(&mut policy, &mut SequentialIdGenerator::new()).unwrap();
        assert_eq!(summary.stray_signers_removed, 1);
        assert_eq!(summary.dangling_file_attrib_refs_removed, 0);
    }

    #[test]
    fn test_missing_ci_signer_is_created_for_user_signer() {
        let xml = POLICY.replace("<CiSigner SignerId=\"P1\" />", "");
        let mut policy = CiPolicy::parse(&xml).unwrap();
        merge_signers(&mut policy, &mut SequentialIdGenerator::new()).unwrap();

        let user = policy.allowed_signers(SigningScenario::User).unwrap();
        assert_eq!(
            signer_ids_in(&policy, policy.ci_signers().unwrap(), CI_SIGNER),
            signer_ids_in(&policy, user, ALLOWED_SIGNER)
        );
    }

    #[test_log::test]
    fn test_no_signers_is_a_no_op() {
        let xml = r#"<SiPolicy><FileRules /><Signers /></SiPolicy>"#;
        let mut policy = CiPolicy::parse(xml).unwrap();
        let before = policy.to_xml_string().unwrap();
        let summary = merge_signers(&mut policy, &mut SequentialIdGenerator::new()).unwrap();
        assert_eq!(summary, MergeSummary::default());
        assert_eq!(policy.to_xml_string().unwrap(), before);
    }

    #[test]
    fn test_missing_containers_are_fatal() {
        let no_signers = CiPolicy::parse("<SiPolicy><FileRules /></SiPolicy>").unwrap();
        let mut policy = no_signers;
        assert!(matches!(
            merge_signers(&mut policy, &mut SequentialIdGenerator::new()),
            Err(PolicyError::MissingContainer(name)) if name == "Signers"
        ));

        let mut policy =
            CiPolicy::parse(r#"<SiPolicy><FileRules /><Signers><Signer ID="S" Name="N" /></Signers></SiPolicy>"#)
                .unwrap();
        assert!(matches!(
            merge_signers(&mut policy, &mut SequentialIdGenerator::new()),
            Err(PolicyError::MissingContainer(name)) if name == "AllowedSigners"
        ));
    }

    #[test]
    fn test_signer_without_id_is_fatal() {
        let xml = POLICY.replace(r#"<Signer ID="P2" Name="Contoso CA">"#, r#"<Signer Name="Contoso CA">"#);
        let mut policy = CiPolicy::parse(&xml).unwrap();
        let err = merge_signers(&mut policy, &mut SequentialIdGenerator::new()).unwrap_err();
        assert!(matches!(
            err,
            PolicyError::MissingAttribute { element: "Signer", attribute: "ID" }
        ));
    }
}
