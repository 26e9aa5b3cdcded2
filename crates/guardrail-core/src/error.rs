use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardrailError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("duplicate teamName '{0}' in accounts")]
    DuplicateTeam(String),

    #[error("unknown team '{0}': not present in accounts")]
    UnknownTeam(String),

    #[error("invalid operation registry: {0}")]
    InvalidRegistry(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("external service error: {0}")]
    ExternalService(String),

    #[error("credential issued for account {issued_for} cannot be used for account {requested}")]
    CredentialMismatch {
        issued_for: String,
        requested: String,
    },

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, GuardrailError>;

/// Coarse classification used for retry decisions and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Authorization,
    Transient,
    ExternalService,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Transient => "transient",
            ErrorKind::ExternalService => "external_service",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GuardrailError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GuardrailError::Config(_)
            | GuardrailError::DuplicateTeam(_)
            | GuardrailError::UnknownTeam(_)
            | GuardrailError::InvalidRegistry(_)
            | GuardrailError::Yaml(_) => ErrorKind::Configuration,
            GuardrailError::Authorization(_) => ErrorKind::Authorization,
            GuardrailError::Transient(_) => ErrorKind::Transient,
            GuardrailError::ExternalService(_) | GuardrailError::CredentialMismatch { .. } => {
                ErrorKind::ExternalService
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_configuration(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}
