use crate::integration_api::config::Notifications;
use crate::integration_api::types::{ApiError, AppInfo};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Public API base URL, used when a deployment token carries no `webexapisBaseUrl`
pub const DEFAULT_API_BASE_URL: &str = "https://webexapis.com/v1";

/// The access token currently used for platform calls
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &format!("<{} bytes>", self.token.len()))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl AccessToken {
    /// Token that expires `expires_in_secs` from now
    pub fn new(token: impl Into<String>, expires_in_secs: u64) -> Self {
        // Lifetimes beyond chrono's range saturate instead of panicking
        let expires_at = i64::try_from(expires_in_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Check if the token has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Shared holder for the current access token
///
/// Written only by the token refresher, read by [`IntegrationClient`] on
/// every request. Clones share the same slot.
#[derive(Debug, Clone)]
pub struct AccessTokenState {
    inner: Arc<RwLock<AccessToken>>,
}

impl AccessTokenState {
    pub fn new(initial: AccessToken) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    /// Snapshot of the current token
    pub fn current(&self) -> AccessToken {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the current token
    pub fn update(&self, token: AccessToken) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = token;
    }
}

/// Request payload for integration registration
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationRequest {
    provisioning_state: &'static str,
    queue: QueueRequest,
}

#[derive(Debug, Serialize)]
struct QueueRequest {
    state: &'static str,
}

impl RegistrationRequest {
    fn new(notifications: Notifications) -> Self {
        let state = match notifications {
            Notifications::LongPolling => "enabled",
            Notifications::Webhook | Notifications::None => "disabled",
        };
        Self {
            provisioning_state: "completed",
            queue: QueueRequest { state },
        }
    }
}

/// HTTP client for platform API calls
///
/// Injects the current access token from [`AccessTokenState`] into every
/// request, so a refreshed token takes effect on the very next call.
#[derive(Debug, Clone)]
pub struct IntegrationClient {
    /// Base URL for platform API calls (`webexapisBaseUrl` claim)
    base_url: String,
    /// HTTP client for making requests
    client: reqwest::Client,
    token: AccessTokenState,
    timeout: Duration,
}

impl IntegrationClient {
    /// Create a new client
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL for relative request paths
    /// * `token` - Shared access token slot
    ///
    /// # Example
    ///
    /// ```no_run
    /// use workspace_integration::{AccessToken, AccessTokenState, IntegrationClient};
    ///
    /// let token = AccessTokenState::new(AccessToken::new("access-token", 3600));
    /// let client = IntegrationClient::new("https://webexapis.com/v1", token);
    /// ```
    pub fn new(base_url: impl Into<String>, token: AccessTokenState) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        tracing::debug!("Creating IntegrationClient with base URL: {}", base_url);

        Self {
            base_url,
            client: reqwest::Client::new(),
            token,
            timeout: Duration::from_secs(10),
        }
    }

    /// Set per-request timeout (builder pattern)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the base URL for this client
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Shared access token slot used by this client
    pub fn token_state(&self) -> &AccessTokenState {
        &self.token
    }

    /// Current access token string
    pub fn access_token(&self) -> String {
        self.token.current().token
    }

    /// Replace the access token used for subsequent requests
    pub fn set_access_token(&self, token: AccessToken) {
        self.token.update(token);
    }

    fn url_for(&self, path: &str) -> Result<String, ApiError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return url::Url::parse(path)
                .map(|u| u.to_string())
                .map_err(|e| ApiError::Request(format!("Invalid URL '{}': {}", path, e)));
        }
        Ok(format!("{}/{}", self.base_url, path.trim_start_matches('/')))
    }

    /// GET `path` and parse a JSON response
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url_for(path)?;
        self.send(self.client.get(&url), &url).await
    }

    /// POST a JSON body to `path` and parse a JSON response
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.url_for(path)?;
        self.send(self.client.post(&url).json(body), &url).await
    }

    /// PATCH a JSON body to `path` and parse a JSON response
    pub async fn patch_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.url_for(path)?;
        self.send(self.client.patch(&url).json(body), &url).await
    }

    /// Register this integration with the platform
    ///
    /// Marks the deployment as provisioned and enables the message queue
    /// when long polling is requested.
    ///
    /// # Arguments
    ///
    /// * `app_url` - Registration endpoint from the deployment token
    /// * `notifications` - Selected notification delivery mode
    ///
    /// # Returns
    ///
    /// Returns the integration metadata, including the long-poll URL when a
    /// queue was enabled.
    pub async fn register_integration(
        &self,
        app_url: &str,
        notifications: Notifications,
    ) -> Result<AppInfo, ApiError> {
        tracing::info!(
            "Registering integration with platform (notifications={})",
            notifications
        );

        let payload = RegistrationRequest::new(notifications);
        let app_info: AppInfo = self.patch_json(app_url, &payload).await?;

        tracing::info!(
            "Integration registered: id={:?}, provisioning_state={:?}",
            app_info.id,
            app_info.provisioning_state
        );
        Ok(app_info)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<T, ApiError> {
        tracing::debug!("Sending request to: {}", url);

        let response = request
            .bearer_auth(self.access_token())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Request to {} failed: {}", url, e);
                ApiError::from(e)
            })?;

        let status = response.status();
        tracing::debug!("Received response with status: {}", status);

        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            tracing::error!(
                "Request to {} failed: HTTP {} - {}",
                url,
                status.as_u16(),
                error_body
            );

            return Err(ApiError::Http {
                status: status.as_u16(),
                message: error_body,
            });
        }

        response.json::<T>().await.map_err(|e| {
            tracing::error!("Failed to parse response from {}: {}", url, e);
            ApiError::Parse(format!("Failed to parse response JSON: {}", e))
        })
    }
}
