use crate::integration_api::types::{ApiError, TokenResponse};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Credentials needed for every access-token exchange
///
/// Kept by the refresher for the lifetime of the integration; everything
/// else from the deployment token is discarded after bootstrap.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
    /// OAuth token endpoint (`oauthUrl` claim)
    pub oauth_url: String,
    pub refresh_token: String,
}

impl fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("oauth_url", &self.oauth_url)
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Exchanges a refresh token for a short-lived access token
///
/// Implementations make a single attempt and never retry; retry policy
/// belongs to the caller.
pub trait TokenExchanger: Send + Sync {
    fn exchange<'a>(
        &'a self,
        credentials: &'a OAuthCredentials,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse, ApiError>> + Send + 'a>>;
}

/// Form body for an OAuth refresh-token grant
#[derive(Serialize)]
struct RefreshGrant<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
    refresh_token: &'a str,
}

/// [`TokenExchanger`] that performs an OAuth 2.0 refresh-token grant over HTTP
#[derive(Debug, Clone)]
pub struct OAuthTokenExchanger {
    client: reqwest::Client,
    timeout: Duration,
}

impl Default for OAuthTokenExchanger {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl OAuthTokenExchanger {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// POST the refresh-token grant to `credentials.oauth_url`
    ///
    /// # Returns
    ///
    /// Returns the new access token and its lifetime, or an [`ApiError`] for
    /// any transport, HTTP or response-parsing failure.
    pub async fn request_token(
        &self,
        credentials: &OAuthCredentials,
    ) -> Result<TokenResponse, ApiError> {
        tracing::debug!("Requesting access token from: {}", credentials.oauth_url);

        let grant = RefreshGrant {
            grant_type: "refresh_token",
            client_id: &credentials.client_id,
            client_secret: &credentials.client_secret,
            refresh_token: &credentials.refresh_token,
        };

        let response = self
            .client
            .post(&credentials.oauth_url)
            .header("Accept", "application/json")
            .form(&grant)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send token request: {}", e);
                ApiError::from(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            tracing::error!(
                "Token exchange failed: HTTP {} - {}",
                status.as_u16(),
                error_body
            );

            return Err(ApiError::Http {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            tracing::error!("Failed to parse token response: {}", e);
            ApiError::Parse(format!("Failed to parse token response JSON: {}", e))
        })?;

        if token.access_token.is_empty() {
            return Err(ApiError::Parse(
                "Token response contained an empty access_token".to_string(),
            ));
        }

        tracing::info!(
            "Access token obtained (expires_in={}s, length={})",
            token.expires_in,
            token.access_token.len()
        );
        Ok(token)
    }
}

impl TokenExchanger for OAuthTokenExchanger {
    fn exchange<'a>(
        &'a self,
        credentials: &'a OAuthCredentials,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse, ApiError>> + Send + 'a>> {
        Box::pin(self.request_token(credentials))
    }
}
