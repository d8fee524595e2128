use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level error type for the integration SDK
///
/// Bootstrap-time failures are returned to the caller of `connect` as one of
/// these variants. Refresh failures after bootstrap never surface here; they
/// are delivered to the registered error handler instead.
#[derive(Debug)]
pub enum IntegrationError {
    /// Deployment token could not be decoded or verified
    Verify(VerifyError),
    /// OAuth endpoint rejected the exchange or was unreachable
    TokenExchange(ApiError),
    /// Integration registration call failed
    Registration(ApiError),
    /// Configuration error
    Config(String),
}

impl fmt::Display for IntegrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrationError::Verify(err) => write!(f, "Token verification failed: {}", err),
            IntegrationError::TokenExchange(err) => write!(f, "Token exchange failed: {}", err),
            IntegrationError::Registration(err) => {
                write!(f, "Integration registration failed: {}", err)
            }
            IntegrationError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for IntegrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IntegrationError::Verify(err) => Some(err),
            IntegrationError::TokenExchange(err) | IntegrationError::Registration(err) => Some(err),
            IntegrationError::Config(_) => None,
        }
    }
}

impl From<VerifyError> for IntegrationError {
    fn from(err: VerifyError) -> Self {
        IntegrationError::Verify(err)
    }
}

/// Errors produced while decoding or verifying a signed token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// Token is not a well-formed three-part JWT, or a required field is missing
    Decode(String),
    /// Token's region has no JWKS endpoint
    UnknownRegion(String),
    /// JWKS endpoint unreachable, malformed, or missing the requested `kid`
    KeyFetch(String),
    /// Signature, algorithm or expiry check failed
    Verification(String),
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyError::Decode(msg) => write!(f, "Decode error: {}", msg),
            VerifyError::UnknownRegion(region) => write!(f, "Unknown region: {}", region),
            VerifyError::KeyFetch(msg) => write!(f, "Key fetch error: {}", msg),
            VerifyError::Verification(msg) => write!(f, "Verification error: {}", msg),
        }
    }
}

impl std::error::Error for VerifyError {}

/// API-specific errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Network error (connection refused, DNS, etc.)
    Network(String),
    /// Request did not complete within the configured timeout
    Timeout(String),
    /// HTTP error with status code
    Http { status: u16, message: String },
    /// Failed to parse response
    Parse(String),
    /// Request building failed
    Request(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Network(msg) => write!(f, "Network error: {}", msg),
            ApiError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            ApiError::Http { status, message } => {
                write!(f, "HTTP {} error: {}", status, message)
            }
            ApiError::Parse(msg) => write!(f, "Parse error: {}", msg),
            ApiError::Request(msg) => write!(f, "Request error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout("Request timeout".to_string())
        } else if err.is_connect() {
            ApiError::Network(format!("Connection failed: {}", err))
        } else if let Some(status) = err.status() {
            ApiError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            ApiError::Parse(err.to_string())
        } else if err.is_builder() {
            ApiError::Request(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Response from the OAuth token endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Lifetime of `access_token` in seconds
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// Message queue details returned on registration when long polling is enabled
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueInfo {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub poll_url: Option<String>,
}

/// Integration metadata returned by the registration endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub provisioning_state: Option<String>,
    #[serde(default)]
    pub queue: Option<QueueInfo>,
    /// Any other fields the platform returns
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AppInfo {
    /// Long-poll URL, if the platform allocated a queue for this integration
    pub fn poll_url(&self) -> Option<&str> {
        self.queue.as_ref().and_then(|q| q.poll_url.as_deref())
    }
}
