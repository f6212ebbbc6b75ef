//! Application layer: the template catalog and the processing pipeline.

pub mod catalog;
pub mod error;
pub mod pipeline;
pub mod render;
