//! Error types for policy synthesis and normalization.

use ci_policy_document::DocumentError;
use thiserror::Error;

/// Errors raised by the normalization stages.
///
/// Only structural problems are errors. Dangling references, empty inputs and incomplete
/// scan records are recovered locally and logged.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A container the stage depends on is absent from the document.
    #[error("Policy is missing the required <{0}> element")]
    MissingContainer(String),

    /// An element lacks an attribute the CI schema requires.
    #[error("<{element}> element is missing the required '{attribute}' attribute")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    /// A signing scenario value outside kernel (0) / user (1).
    #[error("Invalid signing scenario: {0}")]
    InvalidScenario(String),

    /// Scan records or pipeline configuration could not be read.
    #[error("Invalid scan input: {0}")]
    ScanInput(String),

    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl PolicyError {
    pub(crate) fn missing_container(name: impl Into<String>) -> Self {
        Self::MissingContainer(name.into())
    }

    pub(crate) fn missing_attribute(element: &'static str, attribute: &'static str) -> Self {
        Self::MissingAttribute { element, attribute }
    }

    pub(crate) fn scan_input(message: impl Into<String>) -> Self {
        Self::ScanInput(message.into())
    }
}

/// Result type for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;
