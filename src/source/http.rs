//! HTTP implementation of [`Transport`] over `reqwest`.
//!
//! Every request gets the configured timeout and, when the credential
//! provider has one, an `Authorization: Bearer` header.  A missing token never
//! blocks a request; the server decides what an anonymous caller may see.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Transport;
use crate::error::TransportError;
use crate::session::CredentialProvider;

const HEALTH_PATH: &str = "/health/";
const LOCATIONS_PATH: &str = "/buses/locations/";
const LOGIN_PATH: &str = "/auth/login/";

/// Fleet API client.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: Option<String>,
    access: Option<String>,
}

impl HttpTransport {
    /// Create a client for the API rooted at `base_url`
    /// (e.g. `https://fleet.example.com/api`).
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fleetwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Exchange an email/password pair for a bearer token.
    ///
    /// The caller decides where to keep the token; see
    /// [`crate::session::Session::set_token`].
    pub async fn login(&self, email: &str, password: &str) -> Result<String, TransportError> {
        let request = self
            .client
            .post(self.url(LOGIN_PATH))
            .json(&LoginRequest { email, password });
        let response = check_status(request.send().await?).await?;
        let body: LoginResponse = response.json().await?;

        body.token
            .or(body.access)
            .filter(|t| !t.is_empty())
            .ok_or(TransportError::MissingToken)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, TransportError> {
        let mut request = self.client.get(self.url(path));
        if let Some(token) = self.credentials.bearer_token() {
            request = request.bearer_auth(token);
        }
        check_status(request.send().await?).await
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn health(&self) -> Result<(), TransportError> {
        self.get(HEALTH_PATH).await.map(drop)
    }

    async fn locations(&self) -> Result<Value, TransportError> {
        let response = self.get(LOCATIONS_PATH).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Turn a non-success response into [`TransportError::Status`], pulling a
/// human-readable message out of the body when the server sent one.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .json::<Value>()
        .await
        .ok()
        .and_then(|body| error_message(&body));

    Err(TransportError::Status {
        status: status.as_u16(),
        message,
    })
}

fn error_message(body: &Value) -> Option<String> {
    ["message", "detail", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(String::from)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
