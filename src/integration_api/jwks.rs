use crate::integration_api::types::VerifyError;
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// JWKS (JSON Web Key Set) response structure
#[derive(Debug, Clone, Deserialize)]
pub struct Jwks {
    pub keys: Vec<JwkKey>,
}

/// Individual JWK (JSON Web Key) from JWKS
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JwkKey {
    /// Key type (e.g., "RSA")
    pub kty: String,
    /// Public key use (e.g., "sig" for signature)
    #[serde(rename = "use", default)]
    pub key_use: Option<String>,
    /// Key ID for key rotation
    #[serde(default)]
    pub kid: String,
    /// Algorithm (e.g., "RS256")
    #[serde(default)]
    pub alg: Option<String>,
    /// RSA modulus (base64url encoded)
    #[serde(default)]
    pub n: Option<String>,
    /// RSA exponent (base64url encoded)
    #[serde(default)]
    pub e: Option<String>,
}

impl JwkKey {
    /// Convert JWK to jsonwebtoken DecodingKey
    pub fn to_decoding_key(&self) -> Result<DecodingKey, VerifyError> {
        if self.kty != "RSA" {
            return Err(VerifyError::Verification(format!(
                "Unsupported key type: {}. Only RSA is supported.",
                self.kty
            )));
        }

        let (n, e) = match (&self.n, &self.e) {
            (Some(n), Some(e)) => (n, e),
            _ => {
                return Err(VerifyError::Verification(format!(
                    "RSA key '{}' is missing its modulus or exponent",
                    self.kid
                )))
            }
        };

        DecodingKey::from_rsa_components(n, e).map_err(|e| {
            VerifyError::Verification(format!(
                "Failed to create RSA decoding key from JWK components: {}",
                e
            ))
        })
    }

    fn is_usable(&self) -> bool {
        !self.kid.is_empty() && self.to_decoding_key().is_ok()
    }
}

/// Key set fetched from one JWKS endpoint
struct CachedKeySet {
    /// Map of kid -> JWK
    keys: HashMap<String, JwkKey>,
    /// When the set was last fetched
    last_fetched: Instant,
}

impl CachedKeySet {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.last_fetched.elapsed() > ttl
    }
}

/// Fetches signing keys from JWKS endpoints and caches them per endpoint
///
/// Cloning is cheap and clones share the same cache. The cache lock is never
/// held across a network call, so concurrent lookups for an unknown `kid`
/// may each fetch the key set; the last one to finish wins, and every
/// writer stores a complete set.
#[derive(Clone)]
pub struct JwksKeyStore {
    client: reqwest::Client,
    cache_ttl: Duration,
    request_timeout: Duration,
    cache: Arc<RwLock<HashMap<String, CachedKeySet>>>,
}

impl std::fmt::Debug for JwksKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksKeyStore")
            .field("cache_ttl", &self.cache_ttl)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for JwksKeyStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(24 * 3600), Duration::from_secs(10))
    }
}

impl JwksKeyStore {
    /// Create a key store
    ///
    /// * `cache_ttl` - How long a fetched key set is trusted before refetching
    /// * `request_timeout` - Upper bound on each JWKS request
    pub fn new(cache_ttl: Duration, request_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            cache_ttl,
            request_timeout,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the key `kid` published at `jwks_url`
    ///
    /// Served from cache when the endpoint's key set is fresh and contains
    /// `kid`. Otherwise the whole set is refetched, which also picks up
    /// rotated keys. A `kid` absent from the fresh set is a
    /// [`VerifyError::KeyFetch`].
    pub async fn fetch_key(&self, jwks_url: &str, kid: &str) -> Result<JwkKey, VerifyError> {
        if let Some(key) = self.cached_key(jwks_url, kid)? {
            tracing::debug!("JWKS cache hit for url={}, kid={}", jwks_url, kid);
            return Ok(key);
        }

        tracing::info!("Fetching fresh JWKS from {} (kid={})", jwks_url, kid);
        let jwks = self.fetch_jwks(jwks_url).await?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            if jwk.is_usable() {
                keys.insert(jwk.kid.clone(), jwk);
            } else {
                tracing::warn!(
                    "Skipping unusable JWK kid='{}' kty='{}' from {}",
                    jwk.kid,
                    jwk.kty,
                    jwks_url
                );
            }
        }

        let key = keys.get(kid).cloned().ok_or_else(|| {
            VerifyError::KeyFetch(format!("Key ID '{}' not found in JWKS at {}", kid, jwks_url))
        })?;

        {
            let mut cache = self
                .cache
                .write()
                .map_err(|e| VerifyError::KeyFetch(format!("Cache lock poisoned: {}", e)))?;
            cache.insert(
                jwks_url.to_string(),
                CachedKeySet {
                    keys,
                    last_fetched: Instant::now(),
                },
            );
        }

        tracing::debug!("JWKS cache updated for url={}", jwks_url);
        Ok(key)
    }

    /// Look up a key without touching the network
    ///
    /// Returns `Ok(None)` when the endpoint was never fetched, its set has
    /// expired, or the set does not contain `kid`.
    pub fn cached_key(&self, jwks_url: &str, kid: &str) -> Result<Option<JwkKey>, VerifyError> {
        let cache = self
            .cache
            .read()
            .map_err(|e| VerifyError::KeyFetch(format!("Cache lock poisoned: {}", e)))?;

        match cache.get(jwks_url) {
            Some(entry) if !entry.is_expired(self.cache_ttl) => Ok(entry.keys.get(kid).cloned()),
            Some(_) => {
                tracing::debug!("JWKS cache expired for url={}", jwks_url);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Number of keys cached for `jwks_url`
    pub fn cached_key_count(&self, jwks_url: &str) -> usize {
        self.cache
            .read()
            .map(|cache| cache.get(jwks_url).map_or(0, |entry| entry.keys.len()))
            .unwrap_or(0)
    }

    /// Drop the cached key set for `jwks_url`
    pub fn invalidate(&self, jwks_url: &str) {
        if let Ok(mut cache) = self.cache.write() {
            if cache.remove(jwks_url).is_some() {
                tracing::debug!("Cleared JWKS cache for url={}", jwks_url);
            }
        }
    }

    async fn fetch_jwks(&self, jwks_url: &str) -> Result<Jwks, VerifyError> {
        let response = self
            .client
            .get(jwks_url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to fetch JWKS from {}: {}", jwks_url, e);
                if e.is_timeout() {
                    VerifyError::KeyFetch(format!("JWKS endpoint timeout: {}", jwks_url))
                } else if e.is_connect() {
                    VerifyError::KeyFetch(format!(
                        "Failed to connect to JWKS endpoint: {}",
                        jwks_url
                    ))
                } else {
                    VerifyError::KeyFetch(format!("Network error fetching JWKS: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!("JWKS endpoint returned HTTP {}: {}", status.as_u16(), jwks_url);
            return Err(VerifyError::KeyFetch(format!(
                "JWKS endpoint returned HTTP {}",
                status.as_u16()
            )));
        }

        let jwks = response.json::<Jwks>().await.map_err(|e| {
            tracing::error!("Failed to parse JWKS response from {}: {}", jwks_url, e);
            VerifyError::KeyFetch(format!("Invalid JWKS response: {}", e))
        })?;

        tracing::info!(
            "Successfully fetched JWKS with {} keys from {}",
            jwks.keys.len(),
            jwks_url
        );
        Ok(jwks)
    }
}
