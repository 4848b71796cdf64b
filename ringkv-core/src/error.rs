//! Error types shared by every RingKV crate.
//!
//! Transport failures (`Transport`, `Protocol`, `Timeout`) are recovered by the
//! failover layer; application failures (`Server`, `Config`) always reach the
//! caller unchanged.

use thiserror::Error;

/// The result type for RingKV operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Generic server-side failure.
pub const ERROR_CODE_GENERIC: i32 = 1;
/// Not enough nodes were reachable to satisfy the request.
pub const ERROR_CODE_INSUFFICIENT_NODES: i32 = 2;
/// The storage engine failed the operation.
pub const ERROR_CODE_STORE_FAILURE: i32 = 3;
/// A put or delete carried a version older than the stored one.
pub const ERROR_CODE_OBSOLETE_VERSION: i32 = 4;
/// The requested store does not exist on the server.
pub const ERROR_CODE_UNKNOWN_STORE: i32 = 7;
/// The request was routed with stale cluster metadata.
pub const ERROR_CODE_INVALID_METADATA: i32 = 9;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum Error {
    /// No response arrived before the deadline.
    #[error("timeout: {operation} after {waited_ms}ms")]
    Timeout {
        /// What timed out.
        operation: &'static str,
        /// How long we waited, in milliseconds.
        waited_ms: u64,
    },

    /// The peer does not speak the expected protocol.
    #[error("protocol error: {message}")]
    Protocol {
        /// What went wrong.
        message: String,
    },

    /// The server decoded the request and answered with an error code.
    #[error("server error {code}: {message}")]
    Server {
        /// Server error code.
        code: i32,
        /// Server error message.
        message: String,
    },

    /// Invalid topology, options or operation for the configured routing mode.
    #[error("configuration error: {message}")]
    Config {
        /// What is misconfigured.
        message: String,
    },

    /// Opening the transport stream failed.
    #[error("failed to connect to {addr}: {source}")]
    Transport {
        /// The address we tried.
        addr: String,
        /// The underlying error.
        source: std::io::Error,
    },

    /// A frame could not be decoded.
    #[error("decode error: {message}")]
    Decode {
        /// What was malformed.
        message: String,
    },

    /// I/O error on an established connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before the request completed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Every reconnect candidate failed.
    #[error("unable to reconnect after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of candidates probed.
        attempts: usize,
    },

    /// Every seed host failed during bootstrap.
    #[error("all bootstrap attempts failed ({attempts} seed hosts)")]
    BootstrapFailed {
        /// Number of seed hosts tried.
        attempts: usize,
    },
}

impl Error {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a decode error from any displayable error.
    pub fn decode<E: std::fmt::Display>(err: E) -> Self {
        Self::Decode {
            message: err.to_string(),
        }
    }

    /// Returns true if the failover layer may retry the request.
    ///
    /// Only transport timeouts qualify; server errors reflect application
    /// state and are never retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if a connect attempt failed and the next candidate
    /// node should be tried.
    #[must_use]
    pub const fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Protocol { .. } | Self::Timeout { .. } | Self::Io(_)
        )
    }

    /// Returns true if the server rejected a write for carrying a stale version.
    #[must_use]
    pub const fn is_obsolete_version(&self) -> bool {
        matches!(
            self,
            Self::Server {
                code: ERROR_CODE_OBSOLETE_VERSION,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Timeout {
            operation: "send",
            waited_ms: 250,
        };
        assert_eq!(format!("{err}"), "timeout: send after 250ms");

        let err = Error::Server {
            code: ERROR_CODE_OBSOLETE_VERSION,
            message: "version is stale".to_string(),
        };
        assert_eq!(format!("{err}"), "server error 4: version is stale");
    }

    #[test]
    fn test_only_timeouts_are_retryable() {
        let timeout = Error::Timeout {
            operation: "send",
            waited_ms: 1,
        };
        assert!(timeout.is_retryable());

        let server = Error::Server {
            code: ERROR_CODE_OBSOLETE_VERSION,
            message: String::new(),
        };
        assert!(!server.is_retryable());
        assert!(server.is_obsolete_version());

        assert!(!Error::config("bad").is_retryable());
        assert!(!Error::ConnectionClosed.is_retryable());
    }

    #[test]
    fn test_connect_failures() {
        let refused = Error::Transport {
            addr: "127.0.0.1:1".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        assert!(refused.is_connect_failure());
        assert!(Error::protocol("bad ack").is_connect_failure());
        assert!(!Error::config("overlap").is_connect_failure());
    }
}
