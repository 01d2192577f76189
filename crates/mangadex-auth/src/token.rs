//! Token endpoint grants
//!
//! Handles the two token endpoint interactions:
//! 1. Password grant (initial login for a caller)
//! 2. Refresh-token grant (request-time refresh of an expired pair)
//!
//! Both POST a form-encoded body to the same endpoint with the caller's
//! resolved client id/secret. A `200` body is JSON with `access_token`,
//! `refresh_token` and `expires_in`; any other status is a hard failure.
//! There is no retry here or anywhere above it.

use std::time::Duration;

use tracing::debug;

use crate::constants::{DEFAULT_TIMEOUT_SECS, TOKEN_ENDPOINT};
use crate::error::{Error, Result};
use crate::model::{OAuthCredentials, OAuthTokens};

/// Grant type label, used for logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    Password,
    RefreshToken,
}

impl Grant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grant::Password => "password",
            Grant::RefreshToken => "refresh_token",
        }
    }
}

/// The identity provider's token endpoint, bound to an HTTP client.
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl TokenEndpoint {
    /// Endpoint at the fixed MangaDex URL with the default timeout.
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            url: TOKEN_ENDPOINT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Override the endpoint URL. Set once at construction, never per call.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// `grant_type=password` on behalf of `credentials`.
    pub async fn password_grant(
        &self,
        username: &str,
        password: &str,
        credentials: &OAuthCredentials,
    ) -> Result<OAuthTokens> {
        self.request(
            Grant::Password,
            &[
                ("grant_type", Grant::Password.as_str()),
                ("username", username),
                ("password", password),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
            ],
        )
        .await
    }

    /// `grant_type=refresh_token` exchanging `refresh_token` for a new pair.
    pub async fn refresh_grant(
        &self,
        refresh_token: &str,
        credentials: &OAuthCredentials,
    ) -> Result<OAuthTokens> {
        self.request(
            Grant::RefreshToken,
            &[
                ("grant_type", Grant::RefreshToken.as_str()),
                ("refresh_token", refresh_token),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
            ],
        )
        .await
    }

    async fn request(&self, grant: Grant, form: &[(&str, &str)]) -> Result<OAuthTokens> {
        debug!(grant = grant.as_str(), url = %self.url, "requesting token");

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .form(form)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{} grant request failed: {e}", grant.as_str())))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::AuthRequestFailed(format!(
                "token endpoint returned {status} for {} grant: {body}",
                grant.as_str()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("reading token response: {e}")))?;

        serde_json::from_slice::<OAuthTokens>(&body)
            .map_err(|e| Error::Decode(format!("{} grant: {e}", grant.as_str())))
    }
}
