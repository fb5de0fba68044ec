//! Error types shared by the transport and the live feed.
//!
//! Transport failures carry enough structure (HTTP status, server-supplied
//! message) for the feed to build user-visible notices.  Feed errors are the
//! conditions a caller of [`crate::feed::LiveLocationFeed`] can observe
//! directly.

use thiserror::Error;

/// A failed request against the fleet API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The server could not be reached at all.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The server answered with a non-success status.
    #[error("server responded with status {status}{}", message_suffix(.message))]
    Status {
        status: u16,
        message: Option<String>,
    },

    /// The response body could not be decoded.
    #[error("invalid response body: {0}")]
    Decode(String),

    /// A login response carried neither `token` nor `access`.
    #[error("missing token in login response")]
    MissingToken,
}

fn message_suffix(message: &Option<String>) -> String {
    message.as_deref().map(|m| format!(": {m}")).unwrap_or_default()
}

impl TransportError {
    /// HTTP status code, when the server answered.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Human-readable message supplied by the server, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Status { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
                message: None,
            }
        } else {
            Self::Connect(err.to_string())
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Conditions reported by the live feed's control surface.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedError {
    /// `refresh_now` was called while the connection is offline.
    #[error("cannot refresh while offline")]
    Offline,

    /// The feed has not been started, or has been stopped.
    #[error("feed is not running")]
    NotRunning,

    /// `start` was called outside a tokio runtime.
    #[error("no tokio runtime available to drive the feed")]
    NoRuntime,

    /// Another feed already listens for connectivity signals.
    #[error("connectivity listener already registered by another feed")]
    ListenerInUse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_display_includes_message() {
        let err = TransportError::Status {
            status: 503,
            message: Some("maintenance".to_string()),
        };
        assert_eq!(err.to_string(), "server responded with status 503: maintenance");
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.message(), Some("maintenance"));
    }

    #[test]
    fn status_error_display_without_message() {
        let err = TransportError::Status {
            status: 500,
            message: None,
        };
        assert_eq!(err.to_string(), "server responded with status 500");
        assert!(err.message().is_none());
    }

    #[test]
    fn non_status_errors_have_no_status() {
        assert_eq!(TransportError::Timeout.status(), None);
        assert_eq!(TransportError::Connect("refused".into()).message(), None);
    }

    #[test]
    fn serde_errors_become_decode_errors() {
        let err: TransportError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, TransportError::Decode(_)));
    }
}
