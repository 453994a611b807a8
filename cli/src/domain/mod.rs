//! Domain layer: pure types and error enums.
//!
//! No imports from `crate::infra`, `crate::commands`, or `crate::output`.

pub mod error;
pub mod host;

pub use error::StepError;
