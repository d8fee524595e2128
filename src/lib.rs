//! Workspace Integration SDK
//!
//! A Rust library for bootstrapping third-party integrations against the
//! Webex cloud platform.
//!
//! This SDK provides:
//! - Deployment token verification with RS256 and per-region JWKS caching
//! - OAuth refresh-token exchange for short-lived access tokens
//! - Background access token refresh with backoff and failure reporting
//! - An HTTP client that always carries the current access token
//!
//! # Example
//!
//! ```no_run
//! use workspace_integration::{
//!     DeploymentConfig,
//!     Integration,
//!     Notifications,
//!     TokenVerifier,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Optional: check that the deployment token was issued by the platform
//! let verifier = TokenVerifier::new();
//! if !verifier.is_trusted("eyJhbGci...").await {
//!     eprintln!("deployment token could not be verified");
//! }
//!
//! // Exchange credentials, register, and keep the access token fresh
//! let config = DeploymentConfig::from_env()?
//!     .with_notifications(Notifications::Webhook);
//! let integration = Integration::connect(config).await?;
//!
//! integration.on_error(|message| eprintln!("{}", message));
//!
//! let devices: serde_json::Value = integration.client().get_json("devices").await?;
//! println!("{}", devices);
//! # Ok(())
//! # }
//! ```

pub mod integration_api;

// Re-export commonly used types and functions
pub use integration_api::{
    bootstrap::Integration,
    client::{AccessToken, AccessTokenState, IntegrationClient, DEFAULT_API_BASE_URL},
    config::{DeploymentConfig, Notifications},
    jwks::{JwkKey, JwksKeyStore},
    jwt::{decode_deployment_token, decode_unverified, DeploymentClaims, TokenVerifier, VerifierOptions},
    oauth::{OAuthCredentials, OAuthTokenExchanger, TokenExchanger},
    refresh::{ErrorHandler, ErrorHandlerSlot, RefreshHandle, RefreshPolicy, RefreshState, TokenRefresher},
    regions::{resolve_jwks_url, RegionKeyMap},
    types::{ApiError, AppInfo, IntegrationError, QueueInfo, TokenResponse, VerifyError},
};
