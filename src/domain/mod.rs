//! Domain layer types and invariants.

pub mod error;
pub mod filename;
pub mod ordered;
pub mod template;
