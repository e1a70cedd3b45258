//! Error types for igstream.
//!
//! All errors are strongly typed using thiserror so callers can tell a closed
//! listener apart from a timed-out wait or a failed upstream session.

use thiserror::Error;

use crate::listener::ListenerId;

/// Top-level error type for igstream.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Listener {listener} is closed")]
    ChannelClosed {
        listener: ListenerId,
    },

    #[error("Wait timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Failed to decode {field} payload: {message}")]
    Decode {
        field: String,
        message: String,
    },

    #[error("Connection failed: {message}")]
    ConnectFailed {
        message: String,
    },

    #[error("Subscription failed: {message}")]
    Subscription {
        message: String,
    },

    #[error("Invalid configuration: {message}")]
    Config {
        message: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl StreamError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if a wait ended because the listener closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::ChannelClosed { .. })
    }

    /// Returns true if a bounded wait elapsed.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::ConnectFailed { .. } | Self::Subscription { .. } => true,
            Self::ChannelClosed { .. }
            | Self::Decode { .. }
            | Self::Config { .. }
            | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for igstream operations.
pub type StreamResult<T> = Result<T, StreamError>;
