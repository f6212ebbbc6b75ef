use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive error: {message}")]
    Archive { message: String },
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl InfraError {
    pub fn archive(message: impl Into<String>) -> Self {
        Self::Archive {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}

impl From<zip::result::ZipError> for InfraError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io) => Self::Io(io),
            other => Self::archive(other.to_string()),
        }
    }
}

impl From<walkdir::Error> for InfraError {
    fn from(err: walkdir::Error) -> Self {
        let message = err.to_string();
        match err.into_io_error() {
            Some(io) => Self::Io(io),
            None => Self::archive(message),
        }
    }
}
