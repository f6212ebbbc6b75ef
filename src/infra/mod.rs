//! Infrastructure adapters and runtime bootstrap.

pub mod archive;
pub mod error;
pub mod fs;
pub mod http;
pub mod process;
pub mod telemetry;
