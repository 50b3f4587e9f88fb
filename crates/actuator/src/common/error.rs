use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActuatorError {
    /// A required field of a builder or configuration file is missing or invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The submit command of the scheduler exited with a non-zero status.
    #[error("Submission error: {0}")]
    Submission(String),
    /// The submit command succeeded, but its output does not contain a job id.
    #[error("Cannot parse job id from scheduler output {output:?}")]
    JobIdParse { output: String },
    #[error("Schema version {installed} is not compatible with required version {required}")]
    SchemaIncompatible { installed: String, required: String },
    /// Malformed version string or resource value.
    #[error("Format error: {0}")]
    Format(String),
    /// The remote channel could not execute the command at all.
    #[error("Transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl From<toml::de::Error> for ActuatorError {
    fn from(error: toml::de::Error) -> Self {
        Self::Configuration(error.to_string())
    }
}

pub fn format_error<T>(message: String) -> crate::Result<T> {
    Err(ActuatorError::Format(message))
}

pub fn configuration_error<T>(message: String) -> crate::Result<T> {
    Err(ActuatorError::Configuration(message))
}
