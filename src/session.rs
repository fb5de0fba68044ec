//! Credentials attached to outgoing API requests.
//!
//! The transport never reads ambient storage; it is handed a
//! [`CredentialProvider`] at construction.  [`Session`] is the provider used
//! by the binary: it starts with an optional configured token and can be
//! filled in later by a login call.

use std::sync::RwLock;

use crate::error::TransportError;

/// Capability that yields the bearer token for the next request.
pub trait CredentialProvider: Send + Sync {
    /// The current token, or `None` when the request should go out
    /// unauthenticated.
    fn bearer_token(&self) -> Option<String>;
}

/// Process session holding the bearer token obtained at start-up.
#[derive(Debug, Default)]
pub struct Session {
    token: RwLock<Option<String>>,
}

impl Session {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token.filter(|t| !t.trim().is_empty())),
        }
    }

    /// Replace the stored token (e.g. after a successful login).
    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        match self.token.write() {
            Ok(mut slot) => *slot = Some(token),
            Err(poisoned) => *poisoned.into_inner() = Some(token),
        }
    }
}

impl CredentialProvider for Session {
    fn bearer_token(&self) -> Option<String> {
        match self.token.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// User-facing explanation for a failed login.
pub fn describe_login_error(err: &TransportError) -> String {
    match err.status() {
        Some(400) => err
            .message()
            .unwrap_or("Invalid credentials or missing fields")
            .to_string(),
        Some(401) => "Invalid email or password".to_string(),
        Some(403) => "Account is disabled".to_string(),
        Some(status) if status >= 500 => "Server error. Please try again later.".to_string(),
        _ => match err {
            TransportError::Connect(_) | TransportError::Timeout => {
                "Network error. Please check your connection.".to_string()
            }
            _ => "Login failed".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16, message: Option<&str>) -> TransportError {
        TransportError::Status {
            status,
            message: message.map(String::from),
        }
    }

    #[test]
    fn login_errors_are_explained() {
        assert_eq!(describe_login_error(&status(400, Some("Email required"))), "Email required");
        assert_eq!(
            describe_login_error(&status(400, None)),
            "Invalid credentials or missing fields"
        );
        assert_eq!(describe_login_error(&status(401, None)), "Invalid email or password");
        assert_eq!(describe_login_error(&status(403, None)), "Account is disabled");
        assert_eq!(
            describe_login_error(&status(502, None)),
            "Server error. Please try again later."
        );
        assert_eq!(
            describe_login_error(&TransportError::Timeout),
            "Network error. Please check your connection."
        );
        assert_eq!(describe_login_error(&TransportError::MissingToken), "Login failed");
        assert_eq!(describe_login_error(&status(404, None)), "Login failed");
    }

    #[test]
    fn empty_token_is_treated_as_absent() {
        let session = Session::new(Some("   ".to_string()));
        assert!(session.bearer_token().is_none());
    }

    #[test]
    fn set_token_replaces_previous() {
        let session = Session::new(None);
        assert!(session.bearer_token().is_none());

        session.set_token("abc");
        assert_eq!(session.bearer_token().as_deref(), Some("abc"));

        session.set_token("def");
        assert_eq!(session.bearer_token().as_deref(), Some("def"));
    }
}
