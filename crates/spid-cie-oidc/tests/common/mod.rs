//! Shared fixtures: a mock identity provider with real RSA keys.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};
use spid_cie_oidc::client::OidcClient;
use spid_cie_oidc::config::JwksCacheConfig;
use spid_cie_oidc::federation::{KeyStore, RpKeyMaterial};
use spid_cie_oidc::oauth::InMemoryStateStore;
use spid_cie_oidc::provider::{ProviderConfig, ProviderKind};
use spid_cie_oidc::token::{JwksFetcher, TokenValidator};
use tempfile::TempDir;
use time::OffsetDateTime;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CLIENT_ID: &str = "https://rp.example.it";
pub const SPID_L2: &str = "https://www.spid.gov.it/SpidL2";

/// An RSA signing key of the mock provider.
pub struct TestKey {
    _dir: TempDir,
    material: RpKeyMaterial,
    encoding_key: EncodingKey,
}

impl TestKey {
    pub fn generate() -> Self {
        let dir = TempDir::new().unwrap();
        let material = KeyStore::new(dir.path())
            .generate("idp.example.it", "Test IdP", Duration::from_secs(86400))
            .unwrap();
        let pem = material.private_key_pkcs8_pem().unwrap();
        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
        Self {
            _dir: dir,
            material,
            encoding_key,
        }
    }

    pub fn kid(&self) -> &str {
        self.material.kid()
    }

    pub fn jwk(&self) -> Value {
        serde_json::to_value(self.material.jwk()).unwrap()
    }

    pub fn sign(&self, alg: Algorithm, claims: &Value) -> String {
        self.sign_with_kid(alg, Some(self.kid()), claims)
    }

    /// Signs with this key but puts `kid` (or nothing) in the header.
    pub fn sign_with_kid(&self, alg: Algorithm, kid: Option<&str>, claims: &Value) -> String {
        let mut header = Header::new(alg);
        header.kid = kid.map(str::to_string);
        encode(&header, claims, &self.encoding_key).unwrap()
    }
}

pub fn jwks_document(keys: &[&TestKey]) -> Value {
    json!({ "keys": keys.iter().map(|k| k.jwk()).collect::<Vec<_>>() })
}

pub fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// A mock provider serving `/token` and `/jwks`.
pub struct TestIdp {
    pub server: MockServer,
    pub key: TestKey,
}

impl TestIdp {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            key: TestKey::generate(),
        }
    }

    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    /// ID token claims for a valid SPID login.
    pub fn claims(&self, nonce: &str) -> Value {
        let now = now();
        json!({
            "iss": self.issuer(),
            "sub": "spid-user-1",
            "aud": [CLIENT_ID],
            "iat": now,
            "exp": now + 300,
            "nonce": nonce,
            "acr": SPID_L2,
            "email": "mario.rossi@example.it",
            "given_name": "Mario",
            "family_name": "Rossi",
            "fiscal_number": "TINIT-RSSMRA80A01H501U",
            "phone_number": "+39 333 1234567",
        })
    }

    pub fn provider_config(&self) -> ProviderConfig {
        let issuer = self.issuer();
        let mut config = ProviderConfig::base(ProviderKind::Spid, "test");
        config.issuer = issuer.clone();
        config.authorization_endpoint = format!("{issuer}/authorize");
        config.token_endpoint = format!("{issuer}/token");
        config.jwks_uri = format!("{issuer}/jwks");
        config.scope = "openid profile".to_string();
        config.acr_values = SPID_L2.to_string();
        config.min_acr = "SpidL2".to_string();
        config.client_id = CLIENT_ID.to_string();
        config.redirect_uri = format!("{CLIENT_ID}?oidc_action=callback&provider=spid");
        config
    }

    pub async fn mount_jwks_at(&self, route: &str, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("cache-control", "public, max-age=600")
                    .set_body_json(jwks_document(&[&self.key])),
            )
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }

    pub async fn mount_jwks(&self, expected_calls: u64) {
        self.mount_jwks_at("/jwks", expected_calls).await;
    }

    pub async fn mount_token_at(&self, route: &str, id_token: &str) {
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-123",
                "token_type": "Bearer",
                "expires_in": 300,
                "id_token": id_token,
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_token(&self, id_token: &str) {
        self.mount_token_at("/token", id_token).await;
    }
}

pub fn validator() -> TokenValidator {
    let jwks = JwksFetcher::new(
        reqwest::Client::new(),
        JwksCacheConfig::default(),
        Duration::from_secs(5),
    );
    TokenValidator::new(jwks, Duration::from_secs(60))
}

pub fn client(store: Arc<InMemoryStateStore>) -> OidcClient {
    OidcClient::new(
        store,
        validator(),
        reqwest::Client::new(),
        Duration::from_secs(600),
        Duration::from_secs(5),
    )
}

/// Value of query parameter `name` in `url`.
pub fn query_param(url: &str, name: &str) -> String {
    Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}
