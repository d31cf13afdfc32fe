//! Error types for reference parsing, signing, and document rewriting.
//!
//! Every variant maps to a stable error code. None of them are recovered
//! locally: the first error aborts the whole run, and the binary prints the
//! message before exiting with a non-zero status.

use std::string::FromUtf8Error;

use thiserror::Error;
use yaml_rust2::scanner::ScanError;

/// Errors raised while rewriting `s3-presign://` references.
#[derive(Debug, Error)]
pub enum PresignError {
    /// The token's scheme is not the configured reference scheme.
    #[error("unsupported scheme: {scheme}")]
    UnsupportedScheme { scheme: String },

    /// The host (bucket) component is empty.
    #[error("bucket name needs to be defined e.g. {example}")]
    MissingBucket { example: String },

    /// The object key fails the storage system's naming rules.
    #[error("invalid object key {key:?}: {reason}")]
    InvalidObjectKey { key: String, reason: String },

    /// The `expires` option is not a well-formed duration literal.
    #[error("invalid duration {value:?}")]
    InvalidDuration { value: String },

    /// The candidate text is not valid reference syntax at all.
    #[error("malformed reference {token:?}: {reason}")]
    MalformedToken { token: String, reason: String },

    /// The signing capability rejected the request.
    #[error("failed to presign {bucket}/{key}: {source}")]
    Sign {
        bucket: String,
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// The YAML stream could not be parsed.
    #[error("failed to decode YAML stream: {0}")]
    Decode(#[from] ScanError),

    /// The YAML stream is not valid UTF-8.
    #[error("failed to decode YAML stream: {0}")]
    Utf8(#[from] FromUtf8Error),

    /// A rewritten scalar could not be written back into its document.
    #[error("failed to encode YAML document: {message}")]
    Encode { message: String },

    /// Reading input or writing output failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PresignError {
    /// Return the stable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            PresignError::UnsupportedScheme { .. } => "UnsupportedScheme",
            PresignError::MissingBucket { .. } => "MissingBucket",
            PresignError::InvalidObjectKey { .. } => "InvalidObjectKey",
            PresignError::InvalidDuration { .. } => "InvalidDuration",
            PresignError::MalformedToken { .. } => "MalformedToken",
            PresignError::Sign { .. } => "SignError",
            PresignError::Decode(_) | PresignError::Utf8(_) => "DecodeError",
            PresignError::Encode { .. } => "EncodeError",
            PresignError::Io(_) => "IoError",
        }
    }

    pub(crate) fn malformed(token: &str, reason: impl Into<String>) -> Self {
        PresignError::MalformedToken {
            token: token.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_key(key: &str, reason: impl Into<String>) -> Self {
        PresignError::InvalidObjectKey {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
