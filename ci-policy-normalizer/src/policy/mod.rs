//! Policy view over a [`Document`].
//!
//! [`CiPolicy`] wraps the generic element tree and knows where the containers every stage
//! works on live: the shared `FileRules`, `Signers` and `CiSigners` containers and the
//! scenario-qualified `AllowedSigners` / `FileRulesRef` containers.

pub mod schema;

use std::path::Path;

use ci_policy_document::{Document, NodeId};
use log::debug;

use crate::error::{PolicyError, PolicyResult};
use crate::types::SigningScenario;
use schema::{
    ALLOWED_SIGNERS, CI_SIGNERS, FILE_RULES, FILE_RULES_REF, FRIENDLY_NAME, ID, PRODUCT_SIGNERS,
    PRODUCT_SIGNERS_ORDER, SIGNERS, SIGNING_SCENARIO, SIGNING_SCENARIOS, SIGNING_SCENARIO_ORDER,
    SI_POLICY, SI_POLICY_ORDER, VALUE,
};

/// A code integrity policy document.
#[derive(Debug, Clone)]
pub struct CiPolicy {
    document: Document,
}

impl CiPolicy {
    /// Wrap a parsed document. The root element must be `<SiPolicy>`.
    pub fn from_document(document: Document) -> PolicyResult<Self> {
        if document.local_name(document.root()) != SI_POLICY {
            return Err(PolicyError::missing_container(SI_POLICY));
        }
        Ok(Self { document })
    }

    pub fn parse(xml: &str) -> PolicyResult<Self> {
        Self::from_document(Document::parse(xml)?)
    }

    pub fn load(path: impl AsRef<Path>) -> PolicyResult<Self> {
        let path = path.as_ref();
        debug!("CiPolicy::load: loading policy from {}", path.display());
        Self::from_document(Document::load(path)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> PolicyResult<()> {
        Ok(self.document.save(path)?)
    }

    pub fn to_xml_string(&self) -> PolicyResult<String> {
        Ok(self.document.to_xml_string()?)
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn into_document(self) -> Document {
        self.document
    }

    pub fn file_rules(&self) -> Option<NodeId> {
        self.document.first_child(self.document.root(), FILE_RULES)
    }

    pub fn signers(&self) -> Option<NodeId> {
        self.document.first_child(self.document.root(), SIGNERS)
    }

    pub fn ci_signers(&self) -> Option<NodeId> {
        self.document.first_child(self.document.root(), CI_SIGNERS)
    }

    /// The `<SigningScenario>` element whose `Value` matches `scenario`.
    pub fn signing_scenario(&self, scenario: SigningScenario) -> Option<NodeId> {
        let scenarios = self
            .document
            .first_child(self.document.root(), SIGNING_SCENARIOS)?;
        self.document
            .child_elements(scenarios, SIGNING_SCENARIO)
            .into_iter()
            .find(|node| {
                self.document
                    .attribute(*node, VALUE)
                    .and_then(SigningScenario::from_policy_value)
                    == Some(scenario)
            })
    }

    pub fn allowed_signers(&self, scenario: SigningScenario) -> Option<NodeId> {
        let node = self.signing_scenario(scenario)?;
        self.document
            .select_single(node, "ProductSigners/AllowedSigners")
    }

    pub fn file_rules_ref(&self, scenario: SigningScenario) -> Option<NodeId> {
        let node = self.signing_scenario(scenario)?;
        self.document.select_single(node, "ProductSigners/FileRulesRef")
    }

    pub(crate) fn require_file_rules(&self) -> PolicyResult<NodeId> {
        self.file_rules()
            .ok_or_else(|| PolicyError::missing_container(FILE_RULES))
    }

    pub(crate) fn require_signers(&self) -> PolicyResult<NodeId> {
        self.signers()
            .ok_or_else(|| PolicyError::missing_container(SIGNERS))
    }

    /// Read an attribute the schema requires, failing with the element and attribute name.
    pub(crate) fn required_attribute(
        &self,
        node: NodeId,
        element: &'static str,
        attribute: &'static str,
    ) -> PolicyResult<&str> {
        self.document
            .attribute(node, attribute)
            .ok_or_else(|| PolicyError::missing_attribute(element, attribute))
    }

    /// Create a detached element, reusing the root element's namespace prefix if it has one.
    pub(crate) fn create_element(&mut self, local_name: &str) -> NodeId {
        let root_name = self.document.name(self.document.root());
        let name = match root_name.split_once(':') {
            Some((prefix, _)) => format!("{prefix}:{local_name}"),
            None => local_name.to_string(),
        };
        self.document.create_element(name)
    }

    /// Return the `local_name` child of `parent`, creating it at its schema position.
    pub(crate) fn ensure_child(&mut self, parent: NodeId, local_name: &str, order: &[&str]) -> NodeId {
        if let Some(existing) = self.document.first_child(parent, local_name) {
            return existing;
        }

        let rank = |name: &str| order.iter().position(|candidate| *candidate == name);
        let reference = rank(local_name).and_then(|own| {
            self.document
                .children(parent)
                .iter()
                .copied()
                .find(|child| rank(self.document.local_name(*child)).is_some_and(|r| r > own))
        });

        let node = self.create_element(local_name);
        match reference {
            Some(reference) => self.document.insert_before(parent, node, reference),
            None => self.document.append_child(parent, node),
        }
        debug!("CiPolicy::ensure_child: created missing <{local_name}> container");
        node
    }

    pub(crate) fn ensure_file_rules(&mut self) -> NodeId {
        let root = self.document.root();
        self.ensure_child(root, FILE_RULES, SI_POLICY_ORDER)
    }

    pub(crate) fn ensure_signers(&mut self) -> NodeId {
        let root = self.document.root();
        self.ensure_child(root, SIGNERS, SI_POLICY_ORDER)
    }

    pub(crate) fn ensure_ci_signers(&mut self) -> NodeId {
        let root = self.document.root();
        self.ensure_child(root, CI_SIGNERS, SI_POLICY_ORDER)
    }

    /// The scenario element for `scenario`, created if absent. Kernel mode precedes user mode.
    pub(crate) fn ensure_signing_scenario(&mut self, scenario: SigningScenario) -> NodeId {
        if let Some(existing) = self.signing_scenario(scenario) {
            return existing;
        }

        let root = self.document.root();
        let scenarios = self.ensure_child(root, SIGNING_SCENARIOS, SI_POLICY_ORDER);
        let node = self.create_element(SIGNING_SCENARIO);
        let (id, friendly_name) = match scenario {
            SigningScenario::Kernel => ("ID_SIGNINGSCENARIO_DRIVERS_1", "Kernel Mode Signing Scenario"),
            SigningScenario::User => ("ID_SIGNINGSCENARIO_WINDOWS", "User Mode Signing Scenario"),
        };
        self.document.set_attribute(node, VALUE, scenario.policy_value());
        self.document.set_attribute(node, ID, id);
        self.document.set_attribute(node, FRIENDLY_NAME, friendly_name);

        let first_existing = self.document.first_child(scenarios, SIGNING_SCENARIO);
        match (scenario, first_existing) {
            (SigningScenario::Kernel, Some(first)) => {
                self.document.insert_before(scenarios, node, first);
            }
            _ => self.document.append_child(scenarios, node),
        }
        debug!("CiPolicy::ensure_signing_scenario: created {scenario} signing scenario");
        node
    }

    pub(crate) fn ensure_allowed_signers(&mut self, scenario: SigningScenario) -> NodeId {
        let product_signers = self.ensure_product_signers(scenario);
        self.ensure_child(product_signers, ALLOWED_SIGNERS, PRODUCT_SIGNERS_ORDER)
    }

    pub(crate) fn ensure_file_rules_ref(&mut self, scenario: SigningScenario) -> NodeId {
        let product_signers = self.ensure_product_signers(scenario);
        self.ensure_child(product_signers, FILE_RULES_REF, PRODUCT_SIGNERS_ORDER)
    }

    fn ensure_product_signers(&mut self, scenario: SigningScenario) -> NodeId {
        let node = self.ensure_signing_scenario(scenario);
        self.ensure_child(node, PRODUCT_SIGNERS, SIGNING_SCENARIO_ORDER)
    }
}
