//! Login, callback and federation routes through the axum router.

mod common;

use std::sync::Arc;

use assert_json_diff::assert_json_include;
use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, HeaderValue, Request, Response, StatusCode, header};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde_json::{Value, json};
use spid_cie_oidc::config::{DiscoveryMode, RelyingPartyConfig, SpidIdentityProvider};
use spid_cie_oidc::http::{CompletedLogin, LoginCompleter, LoginCompletionError};
use spid_cie_oidc::identity::InMemoryUserDirectory;
use spid_cie_oidc::identity::directory::ATTR_FISCAL_CODE;
use spid_cie_oidc::{AppState, OidcServices, router};
use tempfile::TempDir;
use tower::ServiceExt;

use common::{CLIENT_ID, TestIdp, query_param};

const FISCAL_CODE: &str = "TINIT-RSSMRA80A01H501U";

/// Issues a fake session cookie for the logged-in user.
struct CookieCompleter;

#[async_trait]
impl LoginCompleter for CookieCompleter {
    async fn complete_login(
        &self,
        login: &CompletedLogin,
    ) -> Result<HeaderMap, LoginCompletionError> {
        let mut headers = HeaderMap::new();
        let cookie = format!("session=user-{}; HttpOnly; Secure", login.user.id);
        headers.insert(
            header::SET_COOKIE,
            HeaderValue::from_str(&cookie).map_err(|e| LoginCompletionError(e.to_string()))?,
        );
        Ok(headers)
    }
}

struct Harness {
    _keys: TempDir,
    idp: TestIdp,
    directory: Arc<InMemoryUserDirectory>,
    app: Router,
}

impl Harness {
    async fn start(configure: impl FnOnce(&mut RelyingPartyConfig)) -> Self {
        let idp = TestIdp::start().await;
        let keys = TempDir::new().unwrap();

        let mut config = RelyingPartyConfig::default();
        config.relying_party.base_url = format!("{CLIENT_ID}/");
        config.relying_party.organization_name = "Comune di Esempio".to_string();
        config.relying_party.ipa_code = "c_x000".to_string();
        config.relying_party.contacts_email = "tech@rp.example.it".to_string();
        config.providers.discovery_mode = DiscoveryMode::Manual;
        config.providers.spid.identity_providers = vec![SpidIdentityProvider {
            key: "test".to_string(),
            name: "Test IdP".to_string(),
            issuer: idp.issuer(),
            authorization_endpoint: format!("{}/authorize", idp.issuer()),
        }];
        config.federation.key_dir = keys.path().to_path_buf();
        config.users.auto_provisioning = true;
        configure(&mut config);

        let directory = Arc::new(InMemoryUserDirectory::new());
        let services = OidcServices::from_config(config, directory.clone()).unwrap();
        let app = router(AppState::new(services, Arc::new(CookieCompleter)));

        Self {
            _keys: keys,
            idp,
            directory,
            app,
        }
    }

    async fn get(&self, uri: &str) -> Response<Body> {
        self.app
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    /// Starts a SPID login and returns the authorization URL.
    async fn start_login(&self) -> String {
        let response = self
            .get("/?oidc_action=login&provider=spid&idp=test&redirect_to=/area-riservata")
            .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        location(&response)
    }

    /// Mounts provider endpoints answering for the login started at `auth_url`.
    async fn mount_provider(&self, auth_url: &str) {
        let nonce = query_param(auth_url, "nonce");
        let id_token = self
            .idp
            .key
            .sign(Algorithm::RS256, &self.idp.claims(&nonce));
        self.idp.mount_token_at("/oidc/op/token", &id_token).await;
        self.idp.mount_jwks_at("/oidc/op/jwks", 1).await;
    }

    async fn callback(&self, auth_url: &str) -> Response<Body> {
        let state = query_param(auth_url, "state");
        self.get(&format!(
            "/?oidc_action=callback&provider=spid&state={state}&code=auth-code-1"
        ))
        .await
    }
}

fn location(response: &Response<Body>) -> String {
    response.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_string()
}

async fn body_string(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_login_redirects_to_identity_provider() {
    let harness = Harness::start(|_| {}).await;
    let auth_url = harness.start_login().await;

    assert!(auth_url.starts_with(&format!("{}/authorize?", harness.idp.issuer())));
    assert_eq!(query_param(&auth_url, "client_id"), CLIENT_ID);
    assert_eq!(
        query_param(&auth_url, "redirect_uri"),
        format!("{CLIENT_ID}?oidc_action=callback&provider=spid")
    );
    assert_eq!(query_param(&auth_url, "scope"), "openid profile");
    assert_eq!(query_param(&auth_url, "state").len(), 32);
}

#[tokio::test]
async fn test_full_login_provisions_user_and_sets_session() {
    let harness = Harness::start(|_| {}).await;
    let auth_url = harness.start_login().await;
    harness.mount_provider(&auth_url).await;

    let response = harness.callback(&auth_url).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), format!("{CLIENT_ID}/area-riservata"));
    assert_eq!(response.headers()[header::SET_COOKIE], "session=user-1; HttpOnly; Secure");

    assert_eq!(harness.directory.len(), 1);
    let user = harness.directory.get(1).unwrap();
    assert_eq!(user.email, "mario.rossi@example.it");
    assert_eq!(user.display_name, "Mario Rossi");
    assert_eq!(user.attributes[ATTR_FISCAL_CODE], FISCAL_CODE);
    assert_eq!(user.attributes["spidcie_sub_spid"], "spid-user-1");
    assert_eq!(user.attributes["spidcie_mobile"], "+393331234567");
    assert_eq!(
        user.attributes["spidcie_last_acr"],
        "https://www.spid.gov.it/SpidL2"
    );
}

#[tokio::test]
async fn test_replayed_callback_is_refused() {
    let harness = Harness::start(|_| {}).await;
    let auth_url = harness.start_login().await;
    harness.mount_provider(&auth_url).await;

    let first = harness.callback(&auth_url).await;
    assert_eq!(location(&first), format!("{CLIENT_ID}/area-riservata"));

    let replay = harness.callback(&auth_url).await;
    assert_eq!(replay.status(), StatusCode::FOUND);
    assert_eq!(
        location(&replay),
        format!("{CLIENT_ID}/login?login=failed&spid_cie_error=state_mismatch")
    );
    assert!(replay.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_shared_fiscal_code_is_an_identity_conflict() {
    let harness = Harness::start(|_| {}).await;
    for username in ["mrossi", "mario.rossi"] {
        harness.directory.insert(
            username,
            &format!("{username}@example.it"),
            [(ATTR_FISCAL_CODE, FISCAL_CODE.to_string())],
        );
    }

    let auth_url = harness.start_login().await;
    harness.mount_provider(&auth_url).await;

    let response = harness.callback(&auth_url).await;
    assert_eq!(
        location(&response),
        format!("{CLIENT_ID}/login?login=failed&spid_cie_error=identity_conflict")
    );
    assert_eq!(harness.directory.len(), 2);
}

#[tokio::test]
async fn test_unknown_user_without_provisioning() {
    let harness = Harness::start(|config| config.users.auto_provisioning = false).await;
    let auth_url = harness.start_login().await;
    harness.mount_provider(&auth_url).await;

    let response = harness.callback(&auth_url).await;
    assert_eq!(
        location(&response),
        format!("{CLIENT_ID}/login?login=failed&spid_cie_error=user_not_found")
    );
}

#[tokio::test]
async fn test_provider_error_and_disabled_provider() {
    let harness = Harness::start(|config| config.providers.cie.enabled = Some(false)).await;

    let response = harness
        .get("/?oidc_action=callback&provider=spid&error=Access_Denied&state=x")
        .await;
    assert_eq!(
        location(&response),
        format!("{CLIENT_ID}/login?login=failed&spid_cie_error=provider_error")
    );

    let response = harness.get("/?oidc_action=login&provider=cie").await;
    assert_eq!(
        location(&response),
        format!("{CLIENT_ID}/login?login=failed&spid_cie_error=provider_disabled")
    );

    let response = harness.get("/?oidc_action=login&provider=saml").await;
    assert_eq!(
        location(&response),
        format!("{CLIENT_ID}/login?login=failed&spid_cie_error=provider_not_supported")
    );
}

#[tokio::test]
async fn test_foreign_redirect_target_falls_back_home() {
    let harness = Harness::start(|_| {}).await;
    let response = harness
        .get("/?oidc_action=login&provider=spid&idp=test&redirect_to=https://evil.example.com/")
        .await;
    let auth_url = location(&response);
    harness.mount_provider(&auth_url).await;

    let response = harness.callback(&auth_url).await;
    assert_eq!(location(&response), format!("{CLIENT_ID}/"));
}

#[tokio::test]
async fn test_unknown_action_is_not_found() {
    let harness = Harness::start(|_| {}).await;
    let response = harness.get("/?oidc_action=logout").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_entity_configuration_verifies_against_published_jwks() {
    let harness = Harness::start(|_| {}).await;

    let response = harness.get("/jwks.json").await;
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/jwk-set+json; charset=utf-8"
    );
    let jwks: Value = serde_json::from_str(&body_string(response).await).unwrap();
    let key = &jwks["keys"][0];

    let response = harness.get("/.well-known/openid-federation").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    let jwt = body_string(response).await;

    let jwt_header = decode_header(&jwt).unwrap();
    assert_eq!(jwt_header.alg, Algorithm::RS256);
    assert_eq!(jwt_header.typ.as_deref(), Some("entity-statement+jwt"));
    assert_eq!(jwt_header.kid.as_deref(), key["kid"].as_str());

    let decoding_key = DecodingKey::from_rsa_components(
        key["n"].as_str().unwrap(),
        key["e"].as_str().unwrap(),
    )
    .unwrap();
    let mut validation = Validation::new(Algorithm::RS256);
    validation.validate_aud = false;
    let claims = decode::<Value>(&jwt, &decoding_key, &validation)
        .unwrap()
        .claims;

    assert_eq!(claims["iss"], CLIENT_ID);
    assert_eq!(claims["sub"], CLIENT_ID);
    let rp = &claims["metadata"]["openid_relying_party"];
    assert_eq!(rp["client_name"], "Comune di Esempio");
    assert_eq!(
        rp["redirect_uris"][0],
        format!("{CLIENT_ID}?oidc_action=callback&provider=spid")
    );
    assert_json_include!(
        actual: claims["metadata"]["federation_entity"].clone(),
        expected: json!({
            "organization_name": "Comune di Esempio",
            "homepage_uri": format!("{CLIENT_ID}/"),
            "policy_uri": format!("{CLIENT_ID}/privacy-policy"),
            "federation_resolve_endpoint": format!("{CLIENT_ID}/resolve"),
            "contacts": ["tech@rp.example.it"],
            "ipa_code": "c_x000",
            "organization_identifier": "PA:IT-c_x000",
        })
    );
    assert!(
        claims["authority_hints"]
            .as_array()
            .unwrap()
            .contains(&Value::from("https://registry.agid.gov.it/"))
    );
}

#[tokio::test]
async fn test_resolve_and_legacy_alias() {
    let harness = Harness::start(|_| {}).await;

    let response = harness
        .get("/resolve?trust_anchor=https://registry.agid.gov.it/")
        .await;
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/resolve-response+jwt; charset=utf-8"
    );
    let jwt = body_string(response).await;
    let jwt_header = decode_header(&jwt).unwrap();
    assert_eq!(jwt_header.typ.as_deref(), Some("resolve-response+jwt"));

    let response = harness.get("/.wellknown/openid-federation").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/entity-statement+jwt; charset=utf-8"
    );
}
