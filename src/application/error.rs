use std::{error::Error as StdError, path::PathBuf};

use thiserror::Error;

use crate::{
    application::{catalog::CatalogError, render::RenderError},
    domain::error::DomainError,
    infra::error::InfraError,
};

/// Fatal pipeline failures. A job that hits one of these produces no result.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidTemplateFilename(DomainError),
    #[error("staging failed at {}: {source}", .path.display())]
    StagingFailure {
        path: PathBuf,
        #[source]
        source: InfraError,
    },
    #[error("rendering `{file}` failed: {source}")]
    RenderFailure {
        file: String,
        #[source]
        source: RenderError,
    },
    #[error("packaging failed: {0}")]
    Packaging(#[source] InfraError),
}

impl PipelineError {
    pub fn staging(path: impl Into<PathBuf>, source: impl Into<InfraError>) -> Self {
        Self::StagingFailure {
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn render(file: impl Into<String>, source: RenderError) -> Self {
        Self::RenderFailure {
            file: file.into(),
            source,
        }
    }

    pub fn packaging(source: impl Into<InfraError>) -> Self {
        Self::Packaging(source.into())
    }

    /// Stable identifier for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidTemplateFilename(_) => "invalid_template_filename",
            PipelineError::StagingFailure { .. } => "staging_failure",
            PipelineError::RenderFailure { .. } => "render_failure",
            PipelineError::Packaging(_) => "packaging",
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("template `{name}` not found")]
    NotFound { name: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// The error message followed by every message in its source chain.
    pub fn messages(&self) -> Vec<String> {
        let mut messages = vec![self.to_string()];
        let mut current = self.source();
        while let Some(inner) = current {
            let message = inner.to_string();
            if messages.last() != Some(&message) {
                messages.push(message);
            }
            current = inner.source();
        }
        messages
    }
}
