use crate::integration_api::jwks::JwksKeyStore;
use crate::integration_api::regions::RegionKeyMap;
use crate::integration_api::types::VerifyError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{decode, Algorithm, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

/// JWT verification options
///
/// Configuration for verifying deployment tokens against the platform's
/// regional JWKS endpoints.
#[derive(Debug, Clone)]
pub struct VerifierOptions {
    /// Signing algorithms a token header may declare. Defaults to the RSA
    /// PKCS#1 family, since platform keys are RSA.
    pub algorithms: Vec<Algorithm>,

    /// Leeway in seconds for `exp`/`nbf` checks to absorb clock skew.
    /// Valid range: 0-300 seconds.
    pub leeway_seconds: u64,

    /// How long a fetched key set is trusted before it is fetched again
    pub jwks_cache_ttl: Duration,

    /// Upper bound on each JWKS request
    pub request_timeout: Duration,
}

impl Default for VerifierOptions {
    fn default() -> Self {
        Self {
            algorithms: vec![Algorithm::RS256, Algorithm::RS384, Algorithm::RS512],
            leeway_seconds: 0,
            jwks_cache_ttl: Duration::from_secs(24 * 3600),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl VerifierOptions {
    /// Create a new VerifierOptions with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set allowed algorithms (builder pattern)
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    /// Set leeway seconds (builder pattern)
    pub fn with_leeway_seconds(mut self, leeway: u64) -> Self {
        self.leeway_seconds = leeway.min(300);
        self
    }

    /// Set JWKS cache TTL (builder pattern)
    pub fn with_jwks_cache_ttl(mut self, ttl: Duration) -> Self {
        self.jwks_cache_ttl = ttl;
        self
    }

    /// Set JWKS request timeout (builder pattern)
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Claims carried by a deployment token
///
/// Every field is optional at this level: which ones are required depends on
/// the caller (verification needs `region`, bootstrap needs the OAuth fields).
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentClaims {
    /// Platform region that signed the token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// OAuth token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_url: Option<String>,
    /// Refresh token used for every access-token exchange
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Registration endpoint for this deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_url: Option<String>,
    /// Base URL for platform API calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webexapis_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Any other payload fields
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl std::fmt::Debug for DeploymentClaims {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentClaims")
            .field("region", &self.region)
            .field("oauth_url", &self.oauth_url)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("app_url", &self.app_url)
            .field("webexapis_base_url", &self.webexapis_base_url)
            .field("iss", &self.iss)
            .field("sub", &self.sub)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DeploymentClaims {
    /// Check if the token has expired. Tokens without `exp` never expire.
    pub fn is_expired(&self) -> bool {
        self.exp
            .map(|exp| exp < chrono::Utc::now().timestamp())
            .unwrap_or(false)
    }
}

/// Return a claim that must be present and non-empty
pub fn require_claim<'a>(name: &str, value: &'a Option<String>) -> Result<&'a str, VerifyError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| VerifyError::Decode(format!("Missing '{}' claim in token payload", name)))
}

/// JOSE header fields needed to locate and check the verification key
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub typ: Option<String>,
}

/// A token decoded without any signature check
///
/// Nothing in here is trusted. It exists so the routing fields (`kid`,
/// `region`) can be read before the verification key is known.
#[derive(Debug, Clone, PartialEq)]
pub struct UnverifiedToken {
    pub header: TokenHeader,
    pub claims: DeploymentClaims,
}

fn decode_segment<T: serde::de::DeserializeOwned>(
    segment: &str,
    name: &str,
) -> Result<T, VerifyError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| VerifyError::Decode(format!("Invalid base64 in JWT {}: {}", name, e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| VerifyError::Decode(format!("Invalid JSON in JWT {}: {}", name, e)))
}

/// Decode a token's header and payload without verifying its signature
pub fn decode_unverified(token: &str) -> Result<UnverifiedToken, VerifyError> {
    let token = token.trim();
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(VerifyError::Decode(format!(
            "Expected a three-part signed token, found {} part(s)",
            segments.len()
        )));
    }

    let header: TokenHeader = decode_segment(segments[0], "header")?;
    let claims: DeploymentClaims = decode_segment(segments[1], "payload")?;

    Ok(UnverifiedToken { header, claims })
}

/// Decode a deployment token for bootstrap
///
/// Same as [`decode_unverified`] but only the claims are returned.
pub fn decode_deployment_token(token: &str) -> Result<DeploymentClaims, VerifyError> {
    decode_unverified(token).map(|t| t.claims)
}

/// Verifies platform-issued tokens against region-specific JWKS endpoints
///
/// Verification is two-phase: the untrusted payload is decoded to learn the
/// `region` and `kid`, those select the JWKS endpoint and key, and only then
/// is the signature checked.
#[derive(Debug, Clone, Default)]
pub struct TokenVerifier {
    regions: RegionKeyMap,
    keys: JwksKeyStore,
    options: VerifierOptions,
}

impl TokenVerifier {
    /// Verifier using the platform region table and default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Verifier using the platform region table and `options`
    pub fn with_options(options: VerifierOptions) -> Self {
        Self {
            regions: RegionKeyMap::default(),
            keys: JwksKeyStore::new(options.jwks_cache_ttl, options.request_timeout),
            options,
        }
    }

    /// Replace the region table (builder pattern)
    pub fn with_region_map(mut self, regions: RegionKeyMap) -> Self {
        self.regions = regions;
        self
    }

    /// Share an existing key store and its cache (builder pattern)
    pub fn with_key_store(mut self, keys: JwksKeyStore) -> Self {
        self.keys = keys;
        self
    }

    /// The key store backing this verifier
    pub fn key_store(&self) -> &JwksKeyStore {
        &self.keys
    }

    /// Verify `token` and return its now-trusted claims
    ///
    /// # Errors
    ///
    /// * [`VerifyError::Decode`] - not a three-part token, or `kid`/`region` missing
    /// * [`VerifyError::UnknownRegion`] - `region` has no JWKS endpoint
    /// * [`VerifyError::KeyFetch`] - JWKS unreachable or `kid` not published
    /// * [`VerifyError::Verification`] - bad signature, disallowed algorithm, or expired
    pub async fn verify(&self, token: &str) -> Result<DeploymentClaims, VerifyError> {
        // Both phases must see the same bytes
        let token = token.trim();
        tracing::debug!("Verifying token (length: {})", token.len());

        // Phase one: read the routing fields from the untrusted token
        let unverified = decode_unverified(token)?;

        let kid = unverified
            .header
            .kid
            .as_deref()
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| {
                VerifyError::Decode("Missing 'kid' (key ID) in JWT header".to_string())
            })?;
        let region = require_claim("region", &unverified.claims.region)?;

        let algorithm = Algorithm::from_str(&unverified.header.alg).map_err(|_| {
            VerifyError::Verification(format!(
                "Unsupported signing algorithm: {}",
                unverified.header.alg
            ))
        })?;
        if !self.options.algorithms.contains(&algorithm) {
            return Err(VerifyError::Verification(format!(
                "Algorithm {:?} not in allowed list: {:?}",
                algorithm, self.options.algorithms
            )));
        }

        tracing::debug!("Token header decoded: alg={:?}, kid={}, region={}", algorithm, kid, region);

        let jwks_url = self.regions.resolve(region)?;
        let jwk = self.keys.fetch_key(jwks_url, kid).await?;

        if let Some(key_alg) = jwk.alg.as_deref() {
            if key_alg != unverified.header.alg {
                return Err(VerifyError::Verification(format!(
                    "Algorithm mismatch: token declares {} but key '{}' is for {}",
                    unverified.header.alg, kid, key_alg
                )));
            }
        }

        // Phase two: check the signature with the located key
        let decoding_key = jwk.to_decoding_key()?;

        let mut validation = Validation::new(algorithm);
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.leeway = self.options.leeway_seconds;

        let token_data = decode::<DeploymentClaims>(token, &decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!("Token signature verification failed: {}", e);
                VerifyError::Verification(e.to_string())
            })?;

        tracing::debug!("Token verified: region={}, kid={}", region, kid);
        Ok(token_data.claims)
    }

    /// Verify `token`, reporting failure as `None` instead of an error
    ///
    /// The reason for a rejection is logged. Callers decide whether an
    /// unverifiable token should block anything.
    pub async fn decode_and_verify(&self, token: &str) -> Option<DeploymentClaims> {
        match self.verify(token).await {
            Ok(claims) => Some(claims),
            Err(e) => {
                tracing::warn!("Token could not be verified: {}", e);
                None
            }
        }
    }

    /// Yes/no trust decision for `token`
    pub async fn is_trusted(&self, token: &str) -> bool {
        self.decode_and_verify(token).await.is_some()
    }
}
