//! Document layer for code integrity policies.
//!
//! Provides a mutable, arena-backed XML element tree:
//! - Load/parse and atomic save
//! - Path-based selection by local element name
//! - Element creation, deep cloning, appending, insertion and removal
//! - Attribute and text access
//!
//! The tree knows nothing about policy semantics; callers address policy containers by
//! element name and attribute.

mod error;
mod path;
mod tree;
mod xml;

pub use error::{DocumentError, DocumentResult};
pub use tree::{Document, NodeId};
