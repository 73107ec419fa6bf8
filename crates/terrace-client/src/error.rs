//! Client error types
//!
//! Split by origin: configuration mistakes, schema misuse (delegated to
//! `terrace-meta`), exhausted authentication, and connection failures.
//! Connection failures carry a [`ConnectionKind`] so callers can react to
//! the two recoverable cases (missing asset, stale version) without
//! string matching.

use thiserror::Error;

/// Classification of a connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// The server reported that the addressed resource does not exist.
    NotFound,
    /// The server rejected a write because the asset changed since it was
    /// read. Re-retrieve and re-apply to resolve.
    Conflict,
    /// The request never produced a usable response (DNS, TLS, timeout,
    /// connection reset) or the server returned an unexpected status.
    Transport,
    /// The response arrived but its body could not be interpreted.
    Protocol,
}

/// Error raised by the connector and services layer.
#[derive(Debug, Error)]
pub enum Error {
    /// The client was misconfigured before any request was made.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Schema resolution or value interpretation failed.
    #[error(transparent)]
    Schema(#[from] terrace_meta::MetaError),

    /// Every applicable credential was tried and rejected.
    #[error("authentication failed for {url}: exhausted schemes [{challenged}]")]
    Authentication { url: String, challenged: String },

    /// A request failed in transit or was rejected by the server.
    #[error("connection error for {token}: {message}")]
    Connection {
        message: String,
        /// Oid token, asset type name, or URL the request addressed.
        token: String,
        kind: ConnectionKind,
        #[source]
        source: Option<reqwest::Error>,
    },
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Create a connection error without an underlying transport error.
    pub fn connection(
        message: impl Into<String>,
        token: impl Into<String>,
        kind: ConnectionKind,
    ) -> Self {
        Error::Connection {
            message: message.into(),
            token: token.into(),
            kind,
            source: None,
        }
    }

    /// Create a transport-level connection error from a `reqwest` failure.
    pub fn transport(token: impl Into<String>, source: reqwest::Error) -> Self {
        Error::Connection {
            message: source.to_string(),
            token: token.into(),
            kind: ConnectionKind::Transport,
            source: Some(source),
        }
    }

    /// Create a protocol-level connection error (unusable response body).
    pub fn protocol(message: impl Into<String>, token: impl Into<String>) -> Self {
        Error::Connection {
            message: message.into(),
            token: token.into(),
            kind: ConnectionKind::Protocol,
            source: None,
        }
    }

    /// Whether this is a connection error for a missing resource.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Connection {
                kind: ConnectionKind::NotFound,
                ..
            }
        )
    }

    /// Whether this is a stale-version write conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::Connection {
                kind: ConnectionKind::Conflict,
                ..
            }
        )
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        let missing = Error::connection("gone", "Story:1042", ConnectionKind::NotFound);
        assert!(missing.is_not_found());
        assert!(!missing.is_conflict());

        let stale = Error::connection("stale write", "Story:1042:563", ConnectionKind::Conflict);
        assert!(stale.is_conflict());
        assert!(!stale.is_not_found());
    }

    #[test]
    fn schema_errors_pass_through() {
        let err: Error = terrace_meta::MetaError::unknown_asset_type("Storp").into();
        assert_eq!(err.to_string(), "unknown asset type 'Storp'");
    }
}
