//! FileRuleRef orphan pruning.

use std::collections::HashSet;

use log::{debug, info};

use crate::error::PolicyResult;
use crate::policy::schema::{ALLOW, DENY, FILE_RULE, FILE_RULE_REF, ID, RULE_ID};
use crate::policy::CiPolicy;
use crate::types::{FileRuleRefPruneSummary, SigningScenario};

/// Remove every `FileRuleRef` whose `RuleID` names no `Allow`, `Deny` or `FileRule` node.
pub fn prune_file_rule_refs(policy: &mut CiPolicy) -> PolicyResult<FileRuleRefPruneSummary> {
    let file_rules = policy.require_file_rules()?;
    let doc = policy.document();
    let live: HashSet<String> = doc
        .children(file_rules)
        .iter()
        .copied()
        .filter(|node| matches!(doc.local_name(*node), ALLOW | DENY | FILE_RULE))
        .filter_map(|node| doc.attribute(node, ID))
        .map(str::to_string)
        .collect();

    let mut summary = FileRuleRefPruneSummary::default();
    for scenario in SigningScenario::ALL {
        let Some(container) = policy.file_rules_ref(scenario) else {
            continue;
        };
        let doc = policy.document_mut();
        let mut removed = 0;
        for reference in doc.child_elements(container, FILE_RULE_REF) {
            let resolves = doc
                .attribute(reference, RULE_ID)
                .is_some_and(|rule_id| live.contains(rule_id));
            if !resolves {
                debug!(
                    "prune_file_rule_refs: removing {scenario} FileRuleRef to missing rule {}",
                    doc.attribute(reference, RULE_ID).unwrap_or("<no RuleID>")
                );
                doc.remove_child(container, reference);
                removed += 1;
            }
        }
        match scenario {
            SigningScenario::Kernel => summary.kernel_removed = removed,
            SigningScenario::User => summary.user_removed = removed,
        }
    }

    info!(
        "prune_file_rule_refs: removed {} kernel-mode and {} user-mode FileRuleRef(s)",
        summary.kernel_removed, summary.user_removed
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"<SiPolicy>
  <FileRules>
    <Allow ID="A1" Hash="H1" />
    <Deny ID="D1" Hash="H2" />
    <FileRule ID="R1" FileName="x.exe" Type="Match" />
  </FileRules>
  <SigningScenarios>
    <SigningScenario Value="131"><ProductSigners><FileRulesRef>
      <FileRuleRef RuleID="A1" /><FileRuleRef RuleID="GONE" />
    </FileRulesRef></ProductSigners></SigningScenario>
    <SigningScenario Value="12"><ProductSigners><FileRulesRef>
      <FileRuleRef RuleID="D1" /><FileRuleRef RuleID="R1" /><FileRuleRef />
    </FileRulesRef></ProductSigners></SigningScenario>
  </SigningScenarios>
</SiPolicy>"#;

    #[test_log::test]
    fn test_removes_only_unresolved_references() {
        let mut policy = CiPolicy::parse(POLICY).unwrap();
        let summary = prune_file_rule_refs(&mut policy).unwrap();
        assert_eq!(
            summary,
            FileRuleRefPruneSummary {
                kernel_removed: 1,
                user_removed: 1
            }
        );
        let doc = policy.document();
        let remaining: Vec<_> = doc
            .select_all(doc.root(), "SigningScenarios/SigningScenario/ProductSigners/FileRulesRef/FileRuleRef")
            .into_iter()
            .map(|n| doc.attribute(n, RULE_ID).unwrap())
            .collect();
        assert_eq!(remaining, vec!["A1", "D1", "R1"]);
    }

    #[test]
    fn test_idempotent() {
        let mut policy = CiPolicy::parse(POLICY).unwrap();
        prune_file_rule_refs(&mut policy).unwrap();
        let once = policy.to_xml_string().unwrap();
        let summary = prune_file_rule_refs(&mut policy).unwrap();
        assert_eq!(summary, FileRuleRefPruneSummary::default());
        assert_eq!(policy.to_xml_string().unwrap(), once);
    }

    #[test]
    fn test_missing_file_rules_is_fatal() {
        let mut policy = CiPolicy::parse("<SiPolicy />").unwrap();
        assert!(prune_file_rule_refs(&mut policy).is_err());
    }
}
