//! Entity statement and resolve response signing.
//!
//! Both documents are compact RS256 JWTs signed with the relying party key
//! and carrying its thumbprint `kid`.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Map, Value, json};
use time::OffsetDateTime;

use super::FederationError;
use super::keys::{Jwks, RpKeyMaterial};
use crate::config::{FederationConfig, RelyingPartySettings};

pub const ENTITY_STATEMENT_TYP: &str = "entity-statement+jwt";
pub const RESOLVE_RESPONSE_TYP: &str = "resolve-response+jwt";

/// Signs the relying party's federation documents.
#[derive(Clone)]
pub struct FederationSigner {
    inner: Arc<SignerInner>,
}

struct SignerInner {
    entity_id: String,
    relying_party: RelyingPartySettings,
    authority_hints: Vec<String>,
    redirect_uris: Vec<String>,
    trust_marks: Vec<String>,
    statement_lifetime: Duration,
    keys: RpKeyMaterial,
    encoding_key: EncodingKey,
}

impl std::fmt::Debug for FederationSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationSigner")
            .field("entity_id", &self.inner.entity_id)
            .field("kid", &self.inner.keys.kid())
            .finish_non_exhaustive()
    }
}

impl FederationSigner {
    /// Creates a signer.
    ///
    /// `authority_hints` are the trust anchors of the enabled providers and
    /// `redirect_uris` the callback URLs of every supported provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the private key cannot be loaded into the encoder.
    pub fn new(
        relying_party: &RelyingPartySettings,
        federation: &FederationConfig,
        authority_hints: Vec<String>,
        redirect_uris: Vec<String>,
        keys: RpKeyMaterial,
    ) -> Result<Self, FederationError> {
        let pkcs8_pem = keys.private_key_pkcs8_pem()?;
        let encoding_key = EncodingKey::from_rsa_pem(pkcs8_pem.as_bytes())?;

        Ok(Self {
            inner: Arc::new(SignerInner {
                entity_id: relying_party.client_id(),
                relying_party: relying_party.clone(),
                authority_hints,
                redirect_uris,
                trust_marks: federation.trust_marks.clone(),
                statement_lifetime: federation.statement_lifetime,
                keys,
                encoding_key,
            }),
        })
    }

    /// The entity id, equal to the relying party `client_id`.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        &self.inner.entity_id
    }

    #[must_use]
    pub fn kid(&self) -> &str {
        self.inner.keys.kid()
    }

    /// The public signing key set.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        self.inner.keys.jwks()
    }

    /// The self-signed certificate wrapping the signing key.
    #[must_use]
    pub fn certificate_pem(&self) -> &str {
        self.inner.keys.certificate_pem()
    }

    /// Builds and signs the entity configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or signing fails.
    pub fn entity_statement(&self) -> Result<String, FederationError> {
        let inner = &self.inner;
        let (iat, exp) = self.validity();
        let jwks = serde_json::to_value(self.jwks())?;

        let mut payload = Map::new();
        payload.insert("iss".to_string(), json!(inner.entity_id));
        payload.insert("sub".to_string(), json!(inner.entity_id));
        payload.insert("iat".to_string(), json!(iat));
        payload.insert("exp".to_string(), json!(exp));
        payload.insert("jwks".to_string(), jwks);
        payload.insert("authority_hints".to_string(), json!(inner.authority_hints));
        payload.insert("metadata".to_string(), self.metadata()?);

        let trust_marks = self.trust_marks();
        if !trust_marks.is_empty() {
            payload.insert("trust_marks".to_string(), Value::Array(trust_marks));
        }

        self.sign_jwt(ENTITY_STATEMENT_TYP, &Value::Object(payload))
    }

    /// Builds and signs a resolve response for `sub`.
    ///
    /// An empty `sub` resolves this entity.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or signing fails.
    pub fn resolve_response(
        &self,
        sub: Option<&str>,
        trust_anchor: Option<&str>,
    ) -> Result<String, FederationError> {
        let inner = &self.inner;
        let (iat, exp) = self.validity();
        let sub = sub
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&inner.entity_id);

        let mut payload = Map::new();
        payload.insert("iss".to_string(), json!(inner.entity_id));
        payload.insert("sub".to_string(), json!(sub));
        payload.insert("iat".to_string(), json!(iat));
        payload.insert("exp".to_string(), json!(exp));
        payload.insert("metadata".to_string(), self.metadata()?);
        payload.insert("jwks".to_string(), serde_json::to_value(self.jwks())?);

        if let Some(anchor) = trust_anchor.map(str::trim).filter(|a| !a.is_empty()) {
            payload.insert("trust_anchor".to_string(), json!(anchor));
        }

        self.sign_jwt(RESOLVE_RESPONSE_TYP, &Value::Object(payload))
    }

    /// Signs `payload` as an RS256 JWT with the given `typ` header.
    ///
    /// # Errors
    ///
    /// Returns `Jwt` if signing fails.
    pub fn sign_jwt(&self, typ: &str, payload: &Value) -> Result<String, FederationError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid().to_string());
        header.typ = Some(typ.to_string());
        Ok(encode(&header, payload, &self.inner.encoding_key)?)
    }

    fn validity(&self) -> (i64, i64) {
        let iat = OffsetDateTime::now_utc().unix_timestamp();
        let lifetime = i64::try_from(self.inner.statement_lifetime.as_secs()).unwrap_or(i64::MAX);
        (iat, iat.saturating_add(lifetime))
    }

    fn metadata(&self) -> Result<Value, FederationError> {
        let inner = &self.inner;
        let rp = &inner.relying_party;
        let jwks = serde_json::to_value(self.jwks())?;
        let contacts = contacts(rp);
        let home = rp.homepage_uri();

        Ok(json!({
            "openid_relying_party": {
                "client_id": inner.entity_id,
                "client_registration_types": ["automatic"],
                "application_type": "web",
                "redirect_uris": inner.redirect_uris,
                "grant_types": ["authorization_code", "refresh_token"],
                "response_types": ["code"],
                "subject_type": "public",
                "client_name": rp.organization_name,
                "contacts": contacts,
                "jwks": jwks,
                "id_token_signed_response_alg": "RS256",
                "token_endpoint_auth_method": "private_key_jwt",
            },
            "federation_entity": {
                "organization_name": rp.organization_name,
                "homepage_uri": home,
                "policy_uri": rp.policy_uri(),
                "logo_uri": rp.logo_uri(),
                "contacts": contacts,
                "federation_fetch_endpoint": format!("{home}fetch"),
                "federation_resolve_endpoint": format!("{home}resolve"),
                "federation_list_endpoint": format!("{home}list"),
                "federation_trust_mark_status_endpoint": format!("{home}trust_mark_status"),
                "ipa_code": rp.ipa_code,
                "organization_identifier": rp.organization_identifier(),
            },
        }))
    }

    fn trust_marks(&self) -> Vec<Value> {
        self.inner
            .trust_marks
            .iter()
            .map(|jwt| jwt.trim())
            .filter(|jwt| !jwt.is_empty())
            .filter_map(|jwt| match extract_trust_mark_id(jwt) {
                Some(id) => Some(json!({ "id": id, "trust_mark": jwt })),
                None => {
                    tracing::warn!("Skipping trust mark without a readable id claim");
                    None
                }
            })
            .collect()
    }
}

fn contacts(rp: &RelyingPartySettings) -> Vec<String> {
    let email = rp.contacts_email.trim();
    if email.is_empty() {
        Vec::new()
    } else {
        vec![email.to_string()]
    }
}

/// Reads the `id` claim of a trust mark JWT without verifying it.
#[must_use]
pub fn extract_trust_mark_id(jwt: &str) -> Option<String> {
    let mut parts = jwt.split('.');
    let (_, payload, _) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    claims
        .get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
