//! Error types for MIME operations.

/// Result type alias for MIME operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MIME error types.
///
/// Decoding is lenient: bad transfer encodings, unknown charsets and broken
/// multipart boundaries are repaired on a best-effort basis. Only structural
/// failures surface as errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input contained no bytes at all.
    #[error("Empty message")]
    Empty,

    /// No header line could be parsed from the input.
    #[error("No parseable header block")]
    NoHeaders,

    /// Invalid content type.
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
