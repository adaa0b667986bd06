//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Errors that abort an ingestion.
///
/// Business outcomes (ignored senders, rejected routes) are not errors; they
/// are reported through [`crate::Outcome`].
#[derive(Debug, Error)]
pub enum IngestError {
    /// The input has no usable message structure.
    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] mailtrack_mime::Error),

    /// A collaborator call failed.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

/// Result type alias using [`IngestError`].
pub type Result<T> = std::result::Result<T, IngestError>;

/// Failure reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// A referenced record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The record failed validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A uniqueness constraint was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The backing service is unavailable.
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for collaborator calls.
pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// Errors raised while building the handler configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration is not valid JSON for the expected shape.
    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// A keyword or token pattern failed to compile.
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// A keyword locale is not built in.
    #[error("Unknown keyword locale: {0}")]
    UnknownLocale(String),

    /// A canonical field name is not recognized.
    #[error("Unknown field: {0}")]
    UnknownField(String),
}

/// Why no identity could be derived from the sender.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Sender is unknown and the policy does not accept it, or there is no
    /// sender address at all.
    #[error("Unknown sender")]
    UnknownSender,

    /// Sender matches a locked account.
    #[error("Sender account is locked")]
    LockedSender,

    /// No free generated login was found.
    #[error("Could not generate an unused login")]
    LoginExhausted,

    /// Lookup failed.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}
