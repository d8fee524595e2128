use crate::integration_api::client::{
    AccessToken, AccessTokenState, IntegrationClient, DEFAULT_API_BASE_URL,
};
use crate::integration_api::config::{DeploymentConfig, Notifications};
use crate::integration_api::jwt::{
    decode_deployment_token, require_claim, DeploymentClaims, TokenVerifier, VerifierOptions,
};
use crate::integration_api::oauth::{OAuthCredentials, OAuthTokenExchanger, TokenExchanger};
use crate::integration_api::refresh::{
    ErrorHandlerSlot, RefreshHandle, RefreshState, TokenRefresher,
};
use crate::integration_api::types::{AppInfo, IntegrationError};
use std::sync::Arc;

/// A connected integration
///
/// Created by [`Integration::connect`]. Keeps its access token fresh in the
/// background until [`Integration::disconnect`] is called or the process
/// exits.
#[derive(Debug)]
pub struct Integration {
    client: IntegrationClient,
    app_info: AppInfo,
    claims: DeploymentClaims,
    notifications: Notifications,
    errors: ErrorHandlerSlot,
    refresh: RefreshHandle,
}

impl Integration {
    /// Bring up an integration from its deployment config
    ///
    /// Decodes the deployment token, exchanges its refresh token for an
    /// access token, registers the integration with the platform and starts
    /// background token refresh.
    ///
    /// # Errors
    ///
    /// Any failure here is fatal since no usable integration exists yet:
    /// [`IntegrationError::Verify`] for a malformed (or, with
    /// `verify_token`, untrusted) token, [`IntegrationError::TokenExchange`]
    /// and [`IntegrationError::Registration`] for the two network steps.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use workspace_integration::{DeploymentConfig, Integration, Notifications};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = DeploymentConfig::new("client-id", "client-secret", "eyJhbGci...")
    ///     .with_notifications(Notifications::LongPolling);
    ///
    /// let integration = Integration::connect(config).await?;
    /// integration.on_error(|message| eprintln!("integration error: {}", message));
    /// println!("Poll URL: {:?}", integration.poll_url());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(config: DeploymentConfig) -> Result<Self, IntegrationError> {
        let exchanger = Arc::new(OAuthTokenExchanger::new(config.request_timeout()));
        Self::connect_with(config, exchanger).await
    }

    /// [`Integration::connect`] with a caller-supplied token exchanger
    pub async fn connect_with(
        config: DeploymentConfig,
        exchanger: Arc<dyn TokenExchanger>,
    ) -> Result<Self, IntegrationError> {
        Self::connect_with_verifier(config, exchanger, None).await
    }

    /// [`Integration::connect_with`] using `verifier` when `verify_token` is set
    pub async fn connect_with_verifier(
        config: DeploymentConfig,
        exchanger: Arc<dyn TokenExchanger>,
        verifier: Option<TokenVerifier>,
    ) -> Result<Self, IntegrationError> {
        let claims = if config.verify_token {
            let verifier = verifier.unwrap_or_else(|| {
                TokenVerifier::with_options(
                    VerifierOptions::new().with_request_timeout(config.request_timeout()),
                )
            });
            verifier.verify(&config.jwt).await?
        } else {
            decode_deployment_token(&config.jwt)?
        };

        let credentials = OAuthCredentials {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            oauth_url: require_claim("oauthUrl", &claims.oauth_url)?.to_string(),
            refresh_token: require_claim("refreshToken", &claims.refresh_token)?.to_string(),
        };
        let app_url = require_claim("appUrl", &claims.app_url)?.to_string();
        let base_url = match claims.webexapis_base_url.as_deref().filter(|v| !v.is_empty()) {
            Some(url) => url.to_string(),
            None => {
                tracing::warn!(
                    "Deployment token has no 'webexapisBaseUrl'; using {}",
                    DEFAULT_API_BASE_URL
                );
                DEFAULT_API_BASE_URL.to_string()
            }
        };

        for (name, value) in [
            ("oauthUrl", &credentials.oauth_url),
            ("appUrl", &app_url),
            ("webexapisBaseUrl", &base_url),
        ] {
            url::Url::parse(value).map_err(|e| {
                IntegrationError::Config(format!("Invalid {} '{}': {}", name, value, e))
            })?;
        }

        tracing::info!("Connecting integration (client_id={})", config.client_id);

        let first = exchanger
            .exchange(&credentials)
            .await
            .map_err(IntegrationError::TokenExchange)?;
        let expires_in = first.expires_in;

        let token = AccessTokenState::new(AccessToken::new(first.access_token, expires_in));
        let client =
            IntegrationClient::new(base_url, token.clone()).with_timeout(config.request_timeout());

        let app_info = client
            .register_integration(&app_url, config.notifications)
            .await
            .map_err(IntegrationError::Registration)?;

        match config.notifications {
            Notifications::LongPolling => {
                tracing::info!("Integration is using long polling for events and status updates");
                match app_info.poll_url() {
                    Some(url) => tracing::debug!("Long poll URL: {}", url),
                    None => tracing::warn!("Long polling requested but no poll URL was returned"),
                }
            }
            Notifications::Webhook => {
                tracing::info!("Integration is using webhooks for events and status updates");
            }
            Notifications::None => {
                tracing::info!("Integration is not subscribing to notifications");
            }
        }

        let errors = ErrorHandlerSlot::new();
        let refresh = TokenRefresher::new(
            credentials,
            exchanger,
            token,
            errors.clone(),
            config.refresh.clone(),
        )
        .start(expires_in);

        Ok(Self {
            client,
            app_info,
            claims,
            notifications: config.notifications,
            errors,
            refresh,
        })
    }

    /// Register the handler for background refresh failures
    ///
    /// Replaces any previously registered handler.
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.errors.set(handler);
    }

    /// Metadata returned when the integration was registered
    pub fn app_info(&self) -> &AppInfo {
        &self.app_info
    }

    /// Claims decoded from the deployment token
    pub fn claims(&self) -> &DeploymentClaims {
        &self.claims
    }

    /// Client for platform API calls, always carrying the current token
    pub fn client(&self) -> &IntegrationClient {
        &self.client
    }

    pub fn notifications(&self) -> Notifications {
        self.notifications
    }

    /// Long-poll URL, when long polling was selected and a queue was allocated
    pub fn poll_url(&self) -> Option<&str> {
        match self.notifications {
            Notifications::LongPolling => self.app_info.poll_url(),
            _ => None,
        }
    }

    /// Current access token
    pub fn access_token(&self) -> AccessToken {
        self.client.token_state().current()
    }

    /// Current state of background token refresh
    pub fn refresh_state(&self) -> RefreshState {
        self.refresh.state()
    }

    /// Stop background token refresh
    pub fn disconnect(&self) {
        self.refresh.stop();
    }
}
