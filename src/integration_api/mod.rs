/// Workspace integration API module
///
/// This module covers the credential lifecycle of a platform integration and
/// verification of platform-issued tokens.
///
/// ## Bootstrap Flow
///
/// 1. Consumer supplies client credentials and the deployment token
/// 2. The deployment token is decoded (and optionally verified against the
///    JWKS endpoint of the region that signed it)
/// 3. The embedded refresh token is exchanged for an access token
/// 4. The integration is registered with the platform
/// 5. A background refresher exchanges again before each access token expires
pub mod bootstrap;
pub mod client;
pub mod config;
pub mod jwks;
pub mod jwt;
pub mod oauth;
pub mod refresh;
pub mod regions;
pub mod types;

pub use bootstrap::Integration;
pub use client::{AccessToken, AccessTokenState, IntegrationClient, DEFAULT_API_BASE_URL};
pub use config::{DeploymentConfig, Notifications};
pub use jwks::{JwkKey, Jwks, JwksKeyStore};
pub use jwt::{decode_deployment_token, decode_unverified, DeploymentClaims, TokenVerifier, VerifierOptions};
pub use oauth::{OAuthCredentials, OAuthTokenExchanger, TokenExchanger};
pub use refresh::{ErrorHandler, ErrorHandlerSlot, RefreshHandle, RefreshPolicy, RefreshState, TokenRefresher};
pub use regions::{resolve_jwks_url, RegionKeyMap};
pub use types::{ApiError, AppInfo, IntegrationError, QueueInfo, TokenResponse, VerifyError};
