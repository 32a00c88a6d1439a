//! Allow rule dedup and orphan pruning.

use std::collections::HashSet;

use log::{debug, info};

use super::keys::{file_rule_ref_index, AllowKey};
use crate::error::PolicyResult;
use crate::policy::schema::{ALLOW, ID};
use crate::policy::CiPolicy;
use crate::types::{AllowDedupSummary, SigningScenario};

/// Remove unreferenced `Allow` rules and rules duplicating an earlier rule in the same
/// scenario, together with the `FileRuleRef` nodes activating the duplicates.
///
/// The duplicate test runs per scenario: an `Allow` referenced from both scenarios can
/// lose its reference in one and survive through the other.
pub fn dedup_allow_rules(policy: &mut CiPolicy) -> PolicyResult<AllowDedupSummary> {
    let file_rules = policy.require_file_rules()?;
    let allows = policy.document().child_elements(file_rules, ALLOW);
    if allows.is_empty() {
        info!("dedup_allow_rules: no <Allow> nodes found in <FileRules>");
        return Ok(AllowDedupSummary::default());
    }

    let containers = SigningScenario::ALL.map(|scenario| policy.file_rules_ref(scenario));
    let indexes = containers.map(|container| file_rule_ref_index(policy.document(), container));

    let mut summary = AllowDedupSummary::default();
    let mut seen: HashSet<(AllowKey, SigningScenario)> = HashSet::new();

    for allow in allows {
        let allow_id = policy.required_attribute(allow, ALLOW, ID)?.to_string();
        let key = AllowKey::from_node(policy.document(), allow);
        let doc = policy.document_mut();

        let mut referenced = false;
        let mut still_active = false;
        for scenario in SigningScenario::ALL {
            let (Some(container), Some(references)) = (
                containers[scenario.index()],
                indexes[scenario.index()].get(&allow_id),
            ) else {
                continue;
            };
            let live: Vec<_> = references
                .iter()
                .copied()
                .filter(|reference| doc.parent(*reference) == Some(container))
                .collect();
            let Some((&first, repeated)) = live.split_first() else {
                continue;
            };
            referenced = true;

            for reference in repeated {
                doc.remove_child(container, *reference);
                summary.file_rule_refs_removed += 1;
            }

            let duplicate = key
                .as_ref()
                .is_some_and(|key| !seen.insert((key.clone(), scenario)));
            if duplicate {
                debug!("dedup_allow_rules: {allow_id} duplicates an earlier {scenario} rule");
                doc.remove_child(container, first);
                summary.file_rule_refs_removed += 1;
            } else {
                still_active = true;
            }
        }

        if !referenced {
            debug!("dedup_allow_rules: removing orphan Allow {allow_id}");
            doc.remove_child(file_rules, allow);
            summary.orphans_removed += 1;
        } else if !still_active {
            doc.remove_child(file_rules, allow);
            summary.duplicates_removed += 1;
        } else {
            summary.kept += 1;
        }
    }

    info!(
        "dedup_allow_rules: kept {} Allow rule(s); removed {} orphan, {} duplicate and {} FileRuleRef(s)",
        summary.kept, summary.orphans_removed, summary.duplicates_removed, summary.file_rule_refs_removed
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::schema::{FILE_RULE_REF, RULE_ID};

    fn policy(allows: &str, kernel_refs: &str, user_refs: &str) -> CiPolicy {
        CiPolicy::parse(&format!(
            r#"<SiPolicy>
  <FileRules>{allows}</FileRules>
  <SigningScenarios>
    <SigningScenario Value="131"><ProductSigners><FileRulesRef>{kernel_refs}</FileRulesRef></ProductSigners></SigningScenario>
    <SigningScenario Value="12"><ProductSigners><FileRulesRef>{user_refs}</FileRulesRef></ProductSigners></SigningScenario>
  </SigningScenarios>
</SiPolicy>"#
        ))
        .unwrap()
    }

    fn allow_ids(policy: &CiPolicy) -> Vec<String> {
        let doc = policy.document();
        doc.select_all(doc.root(), "FileRules/Allow")
            .into_iter()
            .map(|n| doc.attribute(n, ID).unwrap().to_string())
            .collect()
    }

    fn ref_ids(policy: &CiPolicy, scenario: SigningScenario) -> Vec<String> {
        let doc = policy.document();
        doc.child_elements(policy.file_rules_ref(scenario).unwrap(), FILE_RULE_REF)
            .into_iter()
            .map(|n| doc.attribute(n, RULE_ID).unwrap().to_string())
            .collect()
    }

    #[test_log::test]
    fn test_duplicate_hash_in_same_scenario_removed_with_reference() {
        let mut policy = policy(
            r#"<Allow ID="A1" Hash="H1" /><Allow ID="A2" Hash="h1" /><Allow ID="U1" Hash="H9" />"#,
            r#"<FileRuleRef RuleID="A1" /><FileRuleRef RuleID="A2" />"#,
            r#"<FileRuleRef RuleID="U1" />"#,
        );
        let summary = dedup_allow_rules(&mut policy).unwrap();

        assert_eq!(summary.duplicates_removed, 1);
        assert_eq!(allow_ids(&policy), vec!["A1", "U1"]);
        assert_eq!(ref_ids(&policy, SigningScenario::Kernel), vec!["A1"]);
        assert_eq!(ref_ids(&policy, SigningScenario::User), vec!["U1"]);
    }

    #[test]
    fn test_same_hash_in_different_scenarios_is_kept() {
        let mut policy = policy(
            r#"<Allow ID="A1" Hash="H1" /><Allow ID="A2" Hash="H1" />"#,
            r#"<FileRuleRef RuleID="A1" />"#,
            r#"<FileRuleRef RuleID="A2" />"#,
        );
        let summary = dedup_allow_rules(&mut policy).unwrap();
        assert_eq!(summary.kept, 2);
        assert_eq!(summary.duplicates_removed, 0);
    }

    #[test]
    fn test_orphans_are_removed() {
        let mut policy = policy(
            r#"<Allow ID="A1" Hash="H1" /><Allow ID="ORPHAN" Hash="H2" />"#,
            "",
            r#"<FileRuleRef RuleID="A1" />"#,
        );
        let summary = dedup_allow_rules(&mut policy).unwrap();
        assert_eq!(summary.orphans_removed, 1);
        assert_eq!(allow_ids(&policy), vec!["A1"]);
    }

    #[test]
    fn test_rule_in_both_scenarios_survives_partial_duplicate() {
        let mut policy = policy(
            r#"<Allow ID="A1" Hash="H1" /><Allow ID="BOTH" Hash="H1" />"#,
            r#"<FileRuleRef RuleID="A1" /><FileRuleRef RuleID="BOTH" />"#,
            r#"<FileRuleRef RuleID="BOTH" />"#,
        );
        let summary = dedup_allow_rules(&mut policy).unwrap();
        assert_eq!(summary.kept, 2);
        assert_eq!(summary.file_rule_refs_removed, 1);
        assert_eq!(ref_ids(&policy, SigningScenario::Kernel), vec!["A1"]);
        assert_eq!(ref_ids(&policy, SigningScenario::User), vec!["BOTH"]);
    }

    #[test]
    fn test_repeated_references_collapse_to_one() {
        let mut policy = policy(
            r#"<Allow ID="A1" Hash="H1" />"#,
            "",
            r#"<FileRuleRef RuleID="A1" /><FileRuleRef RuleID="A1" />"#,
        );
        let summary = dedup_allow_rules(&mut policy).unwrap();
        assert_eq!(summary.file_rule_refs_removed, 1);
        assert_eq!(ref_ids(&policy, SigningScenario::User), vec!["A1"]);
    }

    #[test]
    fn test_selector_rules_never_match_hash_rules() {
        let mut policy = policy(
            r#"<Allow ID="P1" FilePath="C:\tools\*" /><Allow ID="P2" FilePath="C:\tools\*" /><Allow ID="H" Hash="C:\tools\*" />"#,
            "",
            r#"<FileRuleRef RuleID="P1" /><FileRuleRef RuleID="P2" /><FileRuleRef RuleID="H" />"#,
        );
        let summary = dedup_allow_rules(&mut policy).unwrap();
        assert_eq!(allow_ids(&policy), vec!["P1", "H"]);
        assert_eq!(summary.duplicates_removed, 1);
    }

    #[test]
    fn test_second_run_is_a_no_op() {
        let mut policy = policy(
            r#"<Allow ID="A1" Hash="H1" /><Allow ID="A2" Hash="H1" /><Allow ID="O" Hash="H3" />"#,
            r#"<FileRuleRef RuleID="A1" /><FileRuleRef RuleID="A2" />"#,
            "",
        );
        dedup_allow_rules(&mut policy).unwrap();
        let once = policy.to_xml_string().unwrap();
        let summary = dedup_allow_rules(&mut policy).unwrap();
        assert_eq!(policy.to_xml_string().unwrap(), once);
        assert_eq!(summary.kept, 1);
    }
}
