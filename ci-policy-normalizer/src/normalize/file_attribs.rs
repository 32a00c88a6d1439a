//! FileAttrib dedup: drop stray, unscoped and duplicate `FileAttrib` nodes per scenario.

use std::collections::HashSet;

use ci_policy_document::NodeId;
use log::{debug, info, warn};

use super::keys::{file_attrib_ref_index, FileAttribFingerprint, ScenarioIndex};
use crate::error::PolicyResult;
use crate::policy::schema::{FILE_ATTRIB, FILE_ATTRIB_REF, ID, RULE_ID, SIGNER};
use crate::policy::CiPolicy;
use crate::types::{FileAttribDedupSummary, SigningScenario};

/// Remove redundant `FileAttrib` nodes and clean up the `FileAttribRef` nodes pointing at
/// them.
///
/// A node is dropped when no signer references it, when none of its referencing signers
/// is allowed in a scenario, or when an earlier kept node of the same scenario is a
/// duplicate. References to a duplicate are re-pointed at the kept node, or removed when
/// the signer already references it, so a signer never loses its file scope to dedup.
/// Kept nodes are re-appended to `FileRules`, kernel-mode first.
pub fn dedup_file_attribs(policy: &mut CiPolicy) -> PolicyResult<FileAttribDedupSummary> {
    let file_rules = policy.require_file_rules()?;
    let attribs = policy.document().child_elements(file_rules, FILE_ATTRIB);
    if attribs.is_empty() {
        info!("dedup_file_attribs: no <FileAttrib> nodes found in <FileRules>");
        return Ok(FileAttribDedupSummary::default());
    }

    let signers_container = policy.require_signers()?;
    let doc = policy.document();
    let signers = doc.child_elements(signers_container, SIGNER);
    let references = file_attrib_ref_index(doc, &signers);
    let scenarios = ScenarioIndex::from_policy(policy);

    let mut summary = FileAttribDedupSummary::default();
    let mut kept: [Vec<(NodeId, String, FileAttribFingerprint)>; 2] = Default::default();
    let mut dropped: HashSet<String> = HashSet::new();
    let mut duplicate_of: Vec<(String, String, SigningScenario)> = Vec::new();

    for attrib in attribs {
        let attrib_id = policy.required_attribute(attrib, FILE_ATTRIB, ID)?.to_string();
        let owners = references.get(&attrib_id).map(Vec::as_slice).unwrap_or_default();
        if owners.is_empty() {
            debug!("dedup_file_attribs: removing stray FileAttrib {attrib_id}");
            summary.strays_removed += 1;
            dropped.insert(attrib_id);
            continue;
        }

        let mut scenario = None;
        for (signer, _) in owners {
            let signer_id = policy.required_attribute(*signer, SIGNER, ID)?;
            if let Some(found) = scenarios.scenario_of(signer_id) {
                scenario = Some(found);
                break;
            }
        }
        let Some(scenario) = scenario else {
            debug!("dedup_file_attribs: removing FileAttrib {attrib_id}, no referencing signer is allowed in any scenario");
            summary.unscoped_removed += 1;
            dropped.insert(attrib_id);
            continue;
        };

        let fingerprint = FileAttribFingerprint::from_node(policy.document(), attrib);
        let scenario_kept = &mut kept[scenario.index()];
        if let Some((_, kept_id, _)) = scenario_kept
            .iter()
            .find(|(_, _, existing)| existing.is_duplicate_of(&fingerprint))
        {
            debug!("dedup_file_attribs: removing {scenario} FileAttrib {attrib_id}, duplicate of {kept_id}");
            summary.duplicates_removed += 1;
            duplicate_of.push((attrib_id, kept_id.clone(), scenario));
            continue;
        }
        scenario_kept.push((attrib, attrib_id, fingerprint));
    }

    let doc = policy.document_mut();
    let mut emptied = HashSet::new();
    for (rule_id, kept_id, scenario) in &duplicate_of {
        for (signer, reference) in references.get(rule_id).into_iter().flatten() {
            if doc.parent(*reference) != Some(*signer) {
                continue;
            }
            // A signer of the other scenario must not pull the kept node across scenarios.
            let same_scenario = doc
                .attribute(*signer, ID)
                .and_then(|signer_id| scenarios.scenario_of(signer_id))
                .map_or(true, |owner| owner == *scenario);
            let already_scoped = doc
                .child_elements(*signer, FILE_ATTRIB_REF)
                .into_iter()
                .any(|other| doc.attribute(other, RULE_ID) == Some(kept_id.as_str()));
            if same_scenario && !already_scoped {
                doc.set_attribute(*reference, RULE_ID, kept_id.as_str());
                summary.file_attrib_refs_redirected += 1;
            } else {
                doc.remove_child(*signer, *reference);
                summary.file_attrib_refs_removed += 1;
                if doc.first_child(*signer, FILE_ATTRIB_REF).is_none() {
                    emptied.insert(*signer);
                }
            }
        }
    }

    for rule_id in &dropped {
        for (signer, reference) in references.get(rule_id).into_iter().flatten() {
            if doc.remove_child(*signer, *reference) {
                summary.file_attrib_refs_removed += 1;
                if doc.first_child(*signer, FILE_ATTRIB_REF).is_none() {
                    emptied.insert(*signer);
                }
            }
        }
    }
    for signer in emptied {
        warn!(
            "dedup_file_attribs: signer {} has no FileAttribRef left and now trusts its publisher for every file",
            doc.attribute(signer, ID).unwrap_or("<no ID>")
        );
    }

    for attrib in doc.child_elements(file_rules, FILE_ATTRIB) {
        doc.remove_child(file_rules, attrib);
    }
    for scenario in SigningScenario::ALL {
        for (attrib, _, _) in &kept[scenario.index()] {
            doc.append_child(file_rules, *attrib);
        }
    }

    summary.kept = kept.iter().map(Vec::len).sum();
    info!(
        "dedup_file_attribs: kept {} FileAttrib node(s); removed {} duplicate, {} stray, {} unscoped; re-pointed {} FileAttribRef(s)",
        summary.kept,
        summary.duplicates_removed,
        summary.strays_removed,
        summary.unscoped_removed,
        summary.file_attrib_refs_redirected
    );
    Ok(summary)
}
