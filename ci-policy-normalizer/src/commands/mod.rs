//! Commands module - file-based service layer over the policy stages

mod build;
mod normalize;
pub(crate) mod service;

pub use service::PolicyNormalizationService;
