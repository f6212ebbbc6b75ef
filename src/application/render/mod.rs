//! Template engine seam used by the pipeline and the catalog.
//!
//! Rendering is pure: the engine reads templates from the source directory and
//! returns text. Writing results into the staging area is the caller's job.

mod engine;
mod loader;
mod types;

pub use engine::TeraEngine;
pub use types::{RenderError, TemplateEngine};
