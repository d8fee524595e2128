use crate::integration_api::refresh::RefreshPolicy;
use crate::integration_api::types::IntegrationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable holding the OAuth client id
pub const ENV_CLIENT_ID: &str = "WORKSPACE_CLIENT_ID";
/// Environment variable holding the OAuth client secret
pub const ENV_CLIENT_SECRET: &str = "WORKSPACE_CLIENT_SECRET";
/// Environment variable holding the deployment token
pub const ENV_DEPLOYMENT_JWT: &str = "WORKSPACE_DEPLOYMENT_JWT";
/// Environment variable selecting the notification mode
pub const ENV_NOTIFICATIONS: &str = "WORKSPACE_NOTIFICATIONS";
/// Environment variable enabling deployment token verification
pub const ENV_VERIFY_TOKEN: &str = "WORKSPACE_VERIFY_TOKEN";

/// How the integration receives events and status updates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Notifications {
    /// Pull from a message queue allocated at registration
    #[serde(rename = "longpolling")]
    LongPolling,
    /// Platform pushes to a webhook
    Webhook,
    /// No event subscription
    #[default]
    None,
}

impl fmt::Display for Notifications {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Notifications::LongPolling => "longpolling",
            Notifications::Webhook => "webhook",
            Notifications::None => "none",
        };
        f.write_str(name)
    }
}

impl FromStr for Notifications {
    type Err = IntegrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "longpolling" => Ok(Notifications::LongPolling),
            "webhook" => Ok(Notifications::Webhook),
            "none" | "" => Ok(Notifications::None),
            other => Err(IntegrationError::Config(format!(
                "Unknown notification mode '{}', expected longpolling, webhook or none",
                other
            ))),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    10
}

/// Everything needed to bring up an integration
///
/// Deserializes from the same camelCase shape the platform's deployment
/// tooling emits (`clientId`, `clientSecret`, `jwt`, `notifications`).
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Deployment token issued when the integration was activated
    pub jwt: String,
    #[serde(default)]
    pub notifications: Notifications,
    /// Verify the deployment token's signature before bootstrapping
    #[serde(default)]
    pub verify_token: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(skip)]
    pub refresh: RefreshPolicy,
}

impl fmt::Debug for DeploymentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("jwt", &format!("<{} bytes>", self.jwt.len()))
            .field("notifications", &self.notifications)
            .field("verify_token", &self.verify_token)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("refresh", &self.refresh)
            .finish()
    }
}

impl DeploymentConfig {
    /// Create a config with default notification mode and refresh policy
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        jwt: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            jwt: jwt.into(),
            notifications: Notifications::default(),
            verify_token: false,
            request_timeout_secs: default_request_timeout_secs(),
            refresh: RefreshPolicy::default(),
        }
    }

    /// Load config from `WORKSPACE_*` environment variables
    ///
    /// `WORKSPACE_CLIENT_ID`, `WORKSPACE_CLIENT_SECRET` and
    /// `WORKSPACE_DEPLOYMENT_JWT` are required. `WORKSPACE_NOTIFICATIONS`
    /// defaults to `none` and `WORKSPACE_VERIFY_TOKEN` to `false`.
    pub fn from_env() -> Result<Self, IntegrationError> {
        fn required(name: &str) -> Result<String, IntegrationError> {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| {
                    IntegrationError::Config(format!("Missing environment variable {}", name))
                })
        }

        let mut config = Self::new(
            required(ENV_CLIENT_ID)?,
            required(ENV_CLIENT_SECRET)?,
            required(ENV_DEPLOYMENT_JWT)?,
        );

        if let Ok(mode) = std::env::var(ENV_NOTIFICATIONS) {
            config.notifications = mode.parse()?;
        }

        if let Ok(flag) = std::env::var(ENV_VERIFY_TOKEN) {
            config.verify_token = match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                other => {
                    return Err(IntegrationError::Config(format!(
                        "Invalid boolean '{}' in {}",
                        other, ENV_VERIFY_TOKEN
                    )))
                }
            };
        }

        tracing::debug!(
            "Loaded deployment config from environment (client_id={}, notifications={})",
            config.client_id,
            config.notifications
        );
        Ok(config)
    }

    /// Set notification mode (builder pattern)
    pub fn with_notifications(mut self, notifications: Notifications) -> Self {
        self.notifications = notifications;
        self
    }

    /// Enable or disable deployment token verification (builder pattern)
    pub fn with_verify_token(mut self, verify: bool) -> Self {
        self.verify_token = verify;
        self
    }

    /// Set refresh policy (builder pattern)
    pub fn with_refresh_policy(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    /// Set timeout for every outbound request (builder pattern)
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
