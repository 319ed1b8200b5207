//! Authorization and callback flow against a mock provider.

mod common;

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::Algorithm;
use serde_json::json;
use sha2::{Digest, Sha256};
use spid_cie_oidc::client::CallbackRequest;
use spid_cie_oidc::oauth::InMemoryStateStore;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use common::{SPID_L2, TestIdp, TestKey, client, jwks_document, query_param};

/// Serves one token response per exchange, in order.
async fn mount_token_sequence(idp: &TestIdp, id_tokens: &[String]) {
    for id_token in id_tokens {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "Bearer",
                "id_token": id_token,
            })))
            .up_to_n_times(1)
            .mount(&idp.server)
            .await;
    }
}

fn callback(state: &str) -> CallbackRequest {
    CallbackRequest {
        state: Some(state.to_string()),
        code: Some("auth-code-1".to_string()),
        correlation_id: Some("corr-test".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_valid_rs256_login_returns_claims() {
    let idp = TestIdp::start().await;
    let provider = idp.provider_config();
    let store = Arc::new(InMemoryStateStore::new());
    let client = client(store.clone());

    let request = client
        .build_authorization_url(&provider, "/area-riservata", "corr-test")
        .await
        .unwrap();
    assert!(request.url.starts_with(&format!("{}/authorize?", idp.issuer())));
    assert_eq!(query_param(&request.url, "response_type"), "code");
    assert_eq!(query_param(&request.url, "code_challenge_method"), "S256");
    assert_eq!(query_param(&request.url, "acr_values"), SPID_L2);
    assert_eq!(query_param(&request.url, "state"), request.state);
    assert_eq!(store.len(), 1);

    let nonce = query_param(&request.url, "nonce");
    let challenge = query_param(&request.url, "code_challenge");
    let id_token = idp.key.sign(Algorithm::RS256, &idp.claims(&nonce));
    idp.mount_token(&id_token).await;
    idp.mount_jwks(1).await;

    let result = client
        .handle_callback(&callback(&request.state), &provider)
        .await
        .unwrap();

    assert_eq!(result.claims["sub"], "spid-user-1");
    assert_eq!(result.claims["acr"], SPID_L2);
    assert_eq!(result.state_context.target_url, "/area-riservata");
    assert_eq!(result.state_context.provider, "spid");
    assert_eq!(result.state_context.provider_id, "test");
    assert_eq!(result.correlation_id, "corr-test");
    assert!(store.is_empty());

    // The verifier sent to the token endpoint matches the challenge.
    let requests = idp.server.received_requests().await.unwrap();
    let token_request = requests
        .iter()
        .find(|r| r.url.path() == "/token")
        .expect("token endpoint called");
    let form: Vec<(String, String)> = url::form_urlencoded::parse(&token_request.body)
        .into_owned()
        .collect();
    let field = |name: &str| {
        form.iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    };
    assert_eq!(field("grant_type"), "authorization_code");
    assert_eq!(field("code"), "auth-code-1");
    assert_eq!(field("redirect_uri"), provider.redirect_uri);
    let verifier = field("code_verifier");
    assert_eq!(URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())), challenge);
}

#[tokio::test]
async fn test_reused_state_is_rejected() {
    let idp = TestIdp::start().await;
    let provider = idp.provider_config();
    let client = client(Arc::new(InMemoryStateStore::new()));

    let request = client
        .build_authorization_url(&provider, "/", "corr-test")
        .await
        .unwrap();
    let nonce = query_param(&request.url, "nonce");
    idp.mount_token(&idp.key.sign(Algorithm::RS256, &idp.claims(&nonce)))
        .await;
    idp.mount_jwks(1).await;

    client
        .handle_callback(&callback(&request.state), &provider)
        .await
        .unwrap();

    let err = client
        .handle_callback(&callback(&request.state), &provider)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "state_mismatch");
}

#[tokio::test]
async fn test_hs256_token_rejected_without_fetching_keys() {
    let idp = TestIdp::start().await;
    let provider = idp.provider_config();
    let client = client(Arc::new(InMemoryStateStore::new()));

    let request = client
        .build_authorization_url(&provider, "/", "corr-test")
        .await
        .unwrap();
    let nonce = query_param(&request.url, "nonce");
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::new(Algorithm::HS256),
        &idp.claims(&nonce),
        &jsonwebtoken::EncodingKey::from_secret(b"shared-secret"),
    )
    .unwrap();
    idp.mount_token(&token).await;
    idp.mount_jwks(0).await;

    let err = client
        .handle_callback(&callback(&request.state), &provider)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "alg_not_allowed");
}

#[tokio::test]
async fn test_ps256_token_accepted() {
    let idp = TestIdp::start().await;
    let provider = idp.provider_config();
    let client = client(Arc::new(InMemoryStateStore::new()));

    let request = client
        .build_authorization_url(&provider, "/", "corr-test")
        .await
        .unwrap();
    let nonce = query_param(&request.url, "nonce");
    idp.mount_token(&idp.key.sign(Algorithm::PS256, &idp.claims(&nonce)))
        .await;
    idp.mount_jwks(1).await;

    let result = client
        .handle_callback(&callback(&request.state), &provider)
        .await
        .unwrap();
    assert_eq!(result.claims["given_name"], "Mario");
}

#[tokio::test]
async fn test_acr_below_minimum_is_rejected() {
    let idp = TestIdp::start().await;
    let mut provider = idp.provider_config();
    provider.min_acr = "SpidL3".to_string();
    let client = client(Arc::new(InMemoryStateStore::new()));

    let request = client
        .build_authorization_url(&provider, "/", "corr-test")
        .await
        .unwrap();
    let nonce = query_param(&request.url, "nonce");
    idp.mount_token(&idp.key.sign(Algorithm::RS256, &idp.claims(&nonce)))
        .await;
    // ACR is checked before any key fetch
    idp.mount_jwks(0).await;

    let err = client
        .handle_callback(&callback(&request.state), &provider)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "acr_too_low");
}

#[tokio::test]
async fn test_wrong_nonce_is_rejected() {
    let idp = TestIdp::start().await;
    let provider = idp.provider_config();
    let client = client(Arc::new(InMemoryStateStore::new()));

    let request = client
        .build_authorization_url(&provider, "/", "corr-test")
        .await
        .unwrap();
    idp.mount_token(&idp.key.sign(Algorithm::RS256, &idp.claims("other-nonce")))
        .await;
    idp.mount_jwks(0).await;

    let err = client
        .handle_callback(&callback(&request.state), &provider)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "nonce_mismatch");
}

#[tokio::test]
async fn test_token_endpoint_error_is_reported() {
    let idp = TestIdp::start().await;
    let provider = idp.provider_config();
    let client = client(Arc::new(InMemoryStateStore::new()));

    let request = client
        .build_authorization_url(&provider, "/", "corr-test")
        .await
        .unwrap();
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "client_secret": "should-not-be-logged",
        })))
        .mount(&idp.server)
        .await;

    let err = client
        .handle_callback(&callback(&request.state), &provider)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "token_bad_response");
}

#[tokio::test]
async fn test_jwks_cached_between_logins() {
    let idp = TestIdp::start().await;
    let provider = idp.provider_config();
    let client = client(Arc::new(InMemoryStateStore::new()));
    idp.mount_jwks(1).await;

    let first = client
        .build_authorization_url(&provider, "/", "corr-test")
        .await
        .unwrap();
    let second = client
        .build_authorization_url(&provider, "/", "corr-test")
        .await
        .unwrap();
    mount_token_sequence(
        &idp,
        &[
            idp.key
                .sign(Algorithm::RS256, &idp.claims(&query_param(&first.url, "nonce"))),
            idp.key
                .sign(Algorithm::RS256, &idp.claims(&query_param(&second.url, "nonce"))),
        ],
    )
    .await;

    for request in [&first, &second] {
        client
            .handle_callback(&callback(&request.state), &provider)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_jwks_refetched_for_unknown_kid() {
    let idp = TestIdp::start().await;
    let provider = idp.provider_config();
    let client = client(Arc::new(InMemoryStateStore::new()));
    let rotated = TestKey::generate();

    // First fetch only knows the old key; the refetch serves the rotated one.
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("cache-control", "max-age=600")
                .set_body_json(jwks_document(&[&idp.key])),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&idp.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(jwks_document(&[&idp.key, &rotated])),
        )
        .expect(1)
        .mount(&idp.server)
        .await;

    let first = client
        .build_authorization_url(&provider, "/", "corr-test")
        .await
        .unwrap();
    let second = client
        .build_authorization_url(&provider, "/", "corr-test")
        .await
        .unwrap();

    let first_token = idp
        .key
        .sign(Algorithm::RS256, &idp.claims(&query_param(&first.url, "nonce")));
    let second_token =
        rotated.sign(Algorithm::RS256, &idp.claims(&query_param(&second.url, "nonce")));

    mount_token_sequence(&idp, &[first_token, second_token]).await;

    client
        .handle_callback(&callback(&first.state), &provider)
        .await
        .unwrap();
    let result = client
        .handle_callback(&callback(&second.state), &provider)
        .await
        .unwrap();
    assert_eq!(result.claims["sub"], "spid-user-1");
}

#[tokio::test]
async fn test_token_signed_by_unknown_key_is_rejected() {
    let idp = TestIdp::start().await;
    let provider = idp.provider_config();
    let client = client(Arc::new(InMemoryStateStore::new()));
    let rogue = TestKey::generate();

    let request = client
        .build_authorization_url(&provider, "/", "corr-test")
        .await
        .unwrap();
    let nonce = query_param(&request.url, "nonce");
    idp.mount_token(&rogue.sign(Algorithm::RS256, &idp.claims(&nonce)))
        .await;
    idp.mount_jwks(1).await;

    let err = client
        .handle_callback(&callback(&request.state), &provider)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "kid_not_found");
}

#[tokio::test]
async fn test_token_with_borrowed_kid_fails_signature() {
    let idp = TestIdp::start().await;
    let provider = idp.provider_config();
    let client = client(Arc::new(InMemoryStateStore::new()));
    let rogue = TestKey::generate();

    let request = client
        .build_authorization_url(&provider, "/", "corr-test")
        .await
        .unwrap();
    let nonce = query_param(&request.url, "nonce");
    let forged = rogue.sign_with_kid(Algorithm::RS256, Some(idp.key.kid()), &idp.claims(&nonce));
    idp.mount_token(&forged).await;
    // Freshly fetched key: no second fetch after the failure.
    idp.mount_jwks(1).await;

    let err = client
        .handle_callback(&callback(&request.state), &provider)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "bad_signature");
}

#[tokio::test]
async fn test_cached_key_without_kid_refetched_after_rotation() {
    let idp = TestIdp::start().await;
    let provider = idp.provider_config();
    let client = client(Arc::new(InMemoryStateStore::new()));
    let rotated = TestKey::generate();

    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("cache-control", "max-age=600")
                .set_body_json(jwks_document(&[&idp.key])),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&idp.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_document(&[&rotated])))
        .expect(1)
        .mount(&idp.server)
        .await;

    let first = client
        .build_authorization_url(&provider, "/", "corr-test")
        .await
        .unwrap();
    let second = client
        .build_authorization_url(&provider, "/", "corr-test")
        .await
        .unwrap();

    let first_token = idp.key.sign_with_kid(
        Algorithm::RS256,
        None,
        &idp.claims(&query_param(&first.url, "nonce")),
    );
    let second_token = rotated.sign_with_kid(
        Algorithm::RS256,
        None,
        &idp.claims(&query_param(&second.url, "nonce")),
    );
    mount_token_sequence(&idp, &[first_token, second_token]).await;

    client
        .handle_callback(&callback(&first.state), &provider)
        .await
        .unwrap();
    let result = client
        .handle_callback(&callback(&second.state), &provider)
        .await
        .unwrap();
    assert_eq!(result.claims["sub"], "spid-user-1");
}
