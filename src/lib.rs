//! httypist turns a directory of templates plus a JSON payload into packaged
//! artifacts and delivers them to HTTP callbacks.
//!
//! The entry point for embedders is
//! [`application::pipeline::process_template`]; the `httypist` binary wraps it
//! together with the [`application::catalog::TemplateCatalog`].

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
