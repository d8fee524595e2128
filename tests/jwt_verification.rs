//! JWT Verification Tests
//!
//! End-to-end verification of RS256 signed deployment tokens against a
//! mocked regional JWKS endpoint, plus key cache behaviour.

mod common;

use common::*;
use serde_json::json;
use workspace_integration::{
    JwksKeyStore, RegionKeyMap, TokenVerifier, VerifierOptions, VerifyError,
};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn verifier_for(server: &MockServer) -> TokenVerifier {
    TokenVerifier::new().with_region_map(
        RegionKeyMap::empty().with_region(TEST_REGION, format!("{}/jwks", server.uri())),
    )
}

async fn mount_jwks(server: &MockServer, body: serde_json::Value, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(expected_calls)
        .mount(server)
        .await;
}

// ============================================================================
// Signature Verification Tests
// ============================================================================

#[tokio::test]
async fn test_valid_token_verifies() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks(vec![test_jwk(TEST_KID)]), 1).await;

    let token = sign_token(&deployment_claims(&server.uri(), TEST_REGION), Some(TEST_KID));
    let claims = verifier_for(&server).verify(&token).await.unwrap();

    assert_eq!(claims.region.as_deref(), Some(TEST_REGION));
    assert_eq!(claims.refresh_token.as_deref(), Some("refresh-token-abc"));
    assert_eq!(
        claims.oauth_url,
        Some(format!("{}/v1/access_token", server.uri()))
    );
}

#[tokio::test]
async fn test_surrounding_whitespace_is_ignored_in_both_phases() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks(vec![test_jwk(TEST_KID)]), 1).await;

    // As read from a file or an env var with a trailing newline
    let token = sign_token(&deployment_claims(&server.uri(), TEST_REGION), Some(TEST_KID));
    let padded = format!("  {}\n", token);

    let claims = verifier_for(&server).verify(&padded).await.unwrap();
    assert_eq!(claims.region.as_deref(), Some(TEST_REGION));
}

#[tokio::test]
async fn test_tampered_signature_fails_verification() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks(vec![test_jwk(TEST_KID)]), 1).await;

    let token = sign_token(&deployment_claims(&server.uri(), TEST_REGION), Some(TEST_KID));
    let tampered = tamper_signature(&token);
    assert_ne!(token, tampered);

    let err = verifier_for(&server).verify(&tampered).await.unwrap_err();
    assert!(matches!(err, VerifyError::Verification(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_tampered_payload_fails_verification() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks(vec![test_jwk(TEST_KID)]), 1).await;

    let token = sign_token(&deployment_claims(&server.uri(), TEST_REGION), Some(TEST_KID));
    let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();

    // Same routing fields, different refresh token, original signature
    let mut forged = deployment_claims(&server.uri(), TEST_REGION);
    forged["refreshToken"] = json!("attacker-token");
    parts[1] = {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
        URL_SAFE_NO_PAD.encode(forged.to_string())
    };

    let err = verifier_for(&server)
        .verify(&parts.join("."))
        .await
        .unwrap_err();
    assert!(matches!(err, VerifyError::Verification(_)));
}

#[tokio::test]
async fn test_expired_token_fails_verification() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks(vec![test_jwk(TEST_KID)]), 1).await;

    let mut claims = deployment_claims(&server.uri(), TEST_REGION);
    claims["exp"] = json!(now() - 3600);
    let token = sign_token(&claims, Some(TEST_KID));

    let err = verifier_for(&server).verify(&token).await.unwrap_err();
    assert!(matches!(err, VerifyError::Verification(_)));
}

#[tokio::test]
async fn test_leeway_accepts_recently_expired_token() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks(vec![test_jwk(TEST_KID)]), 1).await;

    let mut claims = deployment_claims(&server.uri(), TEST_REGION);
    claims["exp"] = json!(now() - 30);
    let token = sign_token(&claims, Some(TEST_KID));

    let verifier = TokenVerifier::with_options(VerifierOptions::new().with_leeway_seconds(120))
        .with_region_map(
            RegionKeyMap::empty().with_region(TEST_REGION, format!("{}/jwks", server.uri())),
        );
    assert!(verifier.verify(&token).await.is_ok());
}

#[tokio::test]
async fn test_key_algorithm_mismatch_fails_verification() {
    let server = MockServer::start().await;
    let mut jwk = test_jwk(TEST_KID);
    jwk["alg"] = json!("RS512");
    mount_jwks(&server, jwks(vec![jwk]), 1).await;

    let token = sign_token(&deployment_claims(&server.uri(), TEST_REGION), Some(TEST_KID));
    let err = verifier_for(&server).verify(&token).await.unwrap_err();
    assert!(matches!(err, VerifyError::Verification(ref msg) if msg.contains("mismatch")));
}

// ============================================================================
// Decode / Routing Failure Tests
// ============================================================================

#[tokio::test]
async fn test_missing_kid_is_decode_error_not_key_fetch() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks(vec![test_jwk(TEST_KID)]), 0).await;

    let token = sign_token(&deployment_claims(&server.uri(), TEST_REGION), None);
    let err = verifier_for(&server).verify(&token).await.unwrap_err();
    assert!(matches!(err, VerifyError::Decode(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_malformed_token_is_decode_error() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks(vec![test_jwk(TEST_KID)]), 0).await;

    let err = verifier_for(&server)
        .verify("not.a.valid.jwt.token")
        .await
        .unwrap_err();
    assert!(matches!(err, VerifyError::Decode(_)));
}

#[tokio::test]
async fn test_unmapped_region_is_unknown_region_error() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks(vec![test_jwk(TEST_KID)]), 0).await;

    let token = sign_token(&deployment_claims(&server.uri(), "ap-south-9_q"), Some(TEST_KID));
    let err = verifier_for(&server).verify(&token).await.unwrap_err();
    assert_eq!(err, VerifyError::UnknownRegion("ap-south-9_q".to_string()));
}

#[tokio::test]
async fn test_unknown_kid_is_key_fetch_error() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks(vec![test_jwk("some-other-key")]), 1).await;

    let token = sign_token(&deployment_claims(&server.uri(), TEST_REGION), Some(TEST_KID));
    let err = verifier_for(&server).verify(&token).await.unwrap_err();
    assert!(matches!(err, VerifyError::KeyFetch(ref msg) if msg.contains(TEST_KID)));
}

#[tokio::test]
async fn test_jwks_server_error_is_key_fetch_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let token = sign_token(&deployment_claims(&server.uri(), TEST_REGION), Some(TEST_KID));
    let err = verifier_for(&server).verify(&token).await.unwrap_err();
    assert!(matches!(err, VerifyError::KeyFetch(ref msg) if msg.contains("503")));
}

#[tokio::test]
async fn test_non_throwing_boundary() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks(vec![test_jwk(TEST_KID)]), 1).await;

    let verifier = verifier_for(&server);
    let token = sign_token(&deployment_claims(&server.uri(), TEST_REGION), Some(TEST_KID));

    assert!(verifier.is_trusted(&token).await);
    assert!(verifier.decode_and_verify(&tamper_signature(&token)).await.is_none());
    assert!(!verifier.is_trusted("garbage").await);
}

// ============================================================================
// Key Cache Tests
// ============================================================================

#[tokio::test]
async fn test_key_fetch_is_idempotent_and_cached() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks(vec![test_jwk(TEST_KID)]), 1).await;

    let store = JwksKeyStore::default();
    let url = format!("{}/jwks", server.uri());

    let first = store.fetch_key(&url, TEST_KID).await.unwrap();
    let count_after_first = store.cached_key_count(&url);
    let second = store.fetch_key(&url, TEST_KID).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.n.as_deref(), Some(TEST_JWK_N));
    assert_eq!(count_after_first, 1);
    assert_eq!(store.cached_key_count(&url), count_after_first);
}

#[tokio::test]
async fn test_unknown_kid_triggers_refetch_for_rotation() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks(vec![test_jwk("old-key")])))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(jwks(vec![test_jwk("old-key"), test_jwk(TEST_KID)])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = JwksKeyStore::default();
    let url = format!("{}/jwks", server.uri());

    store.fetch_key(&url, "old-key").await.unwrap();
    assert!(store.cached_key(&url, TEST_KID).unwrap().is_none());

    let rotated = store.fetch_key(&url, TEST_KID).await.unwrap();
    assert_eq!(rotated.kid, TEST_KID);
    assert_eq!(store.cached_key_count(&url), 2);
}

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks(vec![test_jwk(TEST_KID)]), 2).await;

    let store = JwksKeyStore::default();
    let url = format!("{}/jwks", server.uri());

    store.fetch_key(&url, TEST_KID).await.unwrap();
    store.invalidate(&url);
    assert_eq!(store.cached_key_count(&url), 0);
    store.fetch_key(&url, TEST_KID).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_verification_shares_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks(vec![test_jwk(TEST_KID)])))
        .mount(&server)
        .await;

    let verifier = verifier_for(&server);

    let mut first_claims = deployment_claims(&server.uri(), TEST_REGION);
    first_claims["refreshToken"] = json!("refresh-one");
    let mut second_claims = deployment_claims(&server.uri(), TEST_REGION);
    second_claims["refreshToken"] = json!("refresh-two");

    let first = sign_token(&first_claims, Some(TEST_KID));
    let second = sign_token(&second_claims, Some(TEST_KID));

    let a = tokio::spawn({
        let verifier = verifier.clone();
        async move { verifier.verify(&first).await }
    });
    let b = tokio::spawn({
        let verifier = verifier.clone();
        async move { verifier.verify(&second).await }
    });

    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();

    assert_eq!(a.refresh_token.as_deref(), Some("refresh-one"));
    assert_eq!(b.refresh_token.as_deref(), Some("refresh-two"));

    let url = format!("{}/jwks", server.uri());
    assert_eq!(verifier.key_store().cached_key_count(&url), 1);
    assert!(verifier.key_store().cached_key(&url, TEST_KID).unwrap().is_some());

    // Fully cached now: a third verification makes no further requests
    let requests_before = server.received_requests().await.unwrap().len();
    let third = sign_token(&deployment_claims(&server.uri(), TEST_REGION), Some(TEST_KID));
    verifier.verify(&third).await.unwrap();
    assert_eq!(server.received_requests().await.unwrap().len(), requests_before);
}
