//! Error types shared across the signaling crates

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Unknown connection or session id. Callers treat this as a neutral no-op.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Payload or frame failed structural validation
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// A configured ceiling (connections, sessions, peers per session) was hit
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Internal state disagreed with itself; the affected session is rebuilt
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short machine-readable kind, carried in rejection replies
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::MalformedPayload(_) => "malformed_payload",
            Self::ResourceExhausted(_) => "resource_exhausted",
            Self::AlreadyExists(_) => "already_exists",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
