//! Error taxonomy for the protocol session client.

use std::fmt;
use std::time::Duration;

/// Errors raised by the protocol session client.
///
/// Every variant keeps its original classification so callers can tell
/// "nothing found" apart from "the protocol is broken".
#[derive(Debug, Clone, thiserror::Error)]
pub enum McpError {
    /// Handshake or transport failure before a session exists.
    #[error("Session error: {message}")]
    Session {
        /// Description of the failure.
        message: String,
    },

    /// A call was issued without an active session.
    #[error("Session not initialized")]
    NotInitialized,

    /// The server rejected a well-formed call.
    #[error("Protocol error ({code}): {message}")]
    Protocol {
        /// JSON-RPC error code, or the HTTP status for non-JSON-RPC rejections.
        code: i64,
        /// Raw server message.
        message: String,
    },

    /// The server rejected a tool name as unknown.
    ///
    /// When `advertised` is true the name was present in the last `tools/list`
    /// response, which means the server's tool registry is inconsistent.
    #[error("Unknown tool '{name}' (advertised: {advertised}): {message}")]
    UnknownTool {
        /// Tool name that was rejected.
        name: String,
        /// Raw server message.
        message: String,
        /// Whether the tool was advertised by the last listing.
        advertised: bool,
    },

    /// The server signalled rate limiting.
    #[error("Rate limited{}", fmt_retry_after(.retry_after))]
    RateLimited {
        /// Server-suggested delay before retrying.
        retry_after: Option<Duration>,
    },

    /// The call did not complete within the caller-supplied timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Network-level failure (connection refused, reset, 5xx gateway errors).
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// The response could not be decoded as a JSON-RPC envelope.
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// Description of the decoding failure.
        message: String,
    },
}

fn fmt_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {d:?})"),
        None => String::new(),
    }
}

impl McpError {
    /// Creates a new `Session` error.
    #[must_use]
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }

    /// Creates a new `Protocol` error.
    #[must_use]
    pub fn protocol(code: i64, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }

    /// Creates a new `Transport` error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidResponse` error.
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Returns `true` for failures eligible for bounded exponential backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Transport { .. }
        )
    }

    /// Returns the server-suggested retry delay, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Returns the error category for logging.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Session { .. } => ErrorCategory::Session,
            Self::NotInitialized => ErrorCategory::Precondition,
            Self::Protocol { .. } | Self::UnknownTool { .. } => ErrorCategory::Protocol,
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Transport { .. } => {
                ErrorCategory::Transient
            }
            Self::InvalidResponse { .. } => ErrorCategory::Decode,
        }
    }
}

/// Categories of protocol errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// No session could be established.
    Session,
    /// Caller bug: call before initialize or after close.
    Precondition,
    /// Server-side rejection.
    Protocol,
    /// Retryable failure.
    Transient,
    /// Malformed response.
    Decode,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::Precondition => write!(f, "precondition"),
            Self::Protocol => write!(f, "protocol"),
            Self::Transient => write!(f, "transient"),
            Self::Decode => write!(f, "decode"),
        }
    }
}
