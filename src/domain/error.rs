use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid template filename `{file_name}`: {reason}")]
    InvalidTemplateFilename {
        file_name: String,
        reason: &'static str,
    },
    #[error("invalid template config: {message}")]
    InvalidConfig { message: String },
}

impl DomainError {
    pub fn invalid_template_filename(file_name: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidTemplateFilename {
            file_name: file_name.into(),
            reason,
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
