//! Region to JWKS endpoint routing
//!
//! Deployment tokens carry a `region` claim naming the platform cluster that
//! signed them. Each region publishes its signing keys at its own JWKS
//! endpoint, so the region decides where the verification key is fetched.

use crate::integration_api::types::VerifyError;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Known platform regions and their JWKS endpoints
static DEFAULT_KEY_URLS: Lazy<HashMap<String, String>> = Lazy::new(|| {
    [
        ("us-west-2_r", "https://xapi-r.wbx2.com/jwks"),
        ("us-east-2_a", "https://xapi-a.wbx2.com/jwks"),
        ("eu-central-1_k", "https://xapi-k.wbx2.com/jwks"),
        ("us-east-1_int13", "https://xapi-intb.wbx2.com/jwks"),
        ("us-gov-west-1_a1", "https://xapi.gov.ciscospark.com/jwks"),
    ]
    .into_iter()
    .map(|(region, url)| (region.to_string(), url.to_string()))
    .collect()
});

/// Static mapping from region identifier to JWKS endpoint URL
///
/// Lookups fail closed: a region without an entry is an error, never a
/// fallback to some default endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionKeyMap {
    urls: HashMap<String, String>,
}

impl Default for RegionKeyMap {
    fn default() -> Self {
        Self {
            urls: DEFAULT_KEY_URLS.clone(),
        }
    }
}

impl RegionKeyMap {
    /// Map containing the platform's published regions
    pub fn new() -> Self {
        Self::default()
    }

    /// Map with no regions at all
    pub fn empty() -> Self {
        Self {
            urls: HashMap::new(),
        }
    }

    /// Add or replace a region (builder pattern)
    pub fn with_region(mut self, region: impl Into<String>, jwks_url: impl Into<String>) -> Self {
        self.urls.insert(region.into(), jwks_url.into());
        self
    }

    /// Resolve the JWKS endpoint for `region`
    pub fn resolve(&self, region: &str) -> Result<&str, VerifyError> {
        self.urls
            .get(region)
            .map(String::as_str)
            .ok_or_else(|| VerifyError::UnknownRegion(region.to_string()))
    }

    /// Regions this map knows about, sorted
    pub fn regions(&self) -> Vec<&str> {
        let mut regions: Vec<&str> = self.urls.keys().map(String::as_str).collect();
        regions.sort_unstable();
        regions
    }
}

/// Resolve a region against the platform's published region table
pub fn resolve_jwks_url(region: &str) -> Result<&'static str, VerifyError> {
    DEFAULT_KEY_URLS
        .get(region)
        .map(String::as_str)
        .ok_or_else(|| VerifyError::UnknownRegion(region.to_string()))
}
