//! Errors raised while reading metadata from a remote service.

use thiserror::Error;

/// Result type for metadata read operations.
pub type ReadResult<T> = Result<T, ReadError>;

/// Errors that can occur while fetching or decoding service metadata.
///
/// The variants fall into three categories with different handling
/// policies:
///
/// - transport and decode failures (`Http`, `Status`, `Io`, `Decode`)
///   are local to one fetch and are downgraded to an empty result by
///   the asynchronous manager path;
/// - `Structure` marks a response that is syntactically valid but
///   inconsistent with what the caller asked for (zero or multiple
///   matching elements, column count mismatch); it is always propagated;
/// - `Unsupported` marks a call the reader strategy cannot perform
///   because its top-level read already populates the whole tree; it
///   indicates a caller bug, not a service problem.
#[derive(Error, Debug)]
pub enum ReadError {
    /// HTTP transport failure.
    #[error("metadata request failed: {0}")]
    Http(#[source] reqwest::Error),

    /// Non-success HTTP status from the service.
    #[error("metadata resource access failure at {url} ({status})")]
    Status {
        /// URL that was requested.
        url: String,
        /// HTTP status code received.
        status: u16,
    },

    /// Response body could not be decoded.
    #[error("failed to decode metadata response: {0}")]
    Decode(#[source] serde_json::Error),

    /// Underlying I/O failure.
    #[error("metadata I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// Response was well formed but structurally inconsistent with the
    /// request, e.g. zero or multiple matching schema elements.
    #[error("{0}")]
    Structure(String),

    /// Operation not supported by this reader strategy.
    #[error("{operation} not supported by {reader} reader")]
    Unsupported {
        /// Short name of the reader strategy.
        reader: &'static str,
        /// Name of the refused operation.
        operation: &'static str,
    },
}

impl ReadError {
    /// Create a structural inconsistency error.
    pub fn structure(message: impl Into<String>) -> Self {
        Self::Structure(message.into())
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(reader: &'static str, operation: &'static str) -> Self {
        Self::Unsupported { reader, operation }
    }

    /// True for the caller-bug category, as opposed to I/O trouble.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

impl From<reqwest::Error> for ReadError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err)
    }
}

impl From<serde_json::Error> for ReadError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err)
    }
}
