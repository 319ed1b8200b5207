//! ID token validation.
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. Compact structure and JSON header/payload
//! 2. `alg` is RS256 or PS256
//! 3. `iss`, `aud`, `exp`, `iat` (with clock skew) and `nonce`
//! 4. ACR policy
//! 5. Signature against the provider JWKS, refetched once if a cached key
//!    rejects it
//!
//! Claim checks come before the key fetch so malformed or replayed tokens
//! never trigger outbound traffic.

use std::time::Duration;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use rsa::signature::Verifier;
use rsa::{BigUint, RsaPublicKey, pkcs1v15, pss};
use serde_json::{Map, Value};
use sha2::Sha256;
use time::OffsetDateTime;

use super::acr::is_acr_at_least;
use super::jwks::{JwksFetcher, RsaJwk};
use crate::OidcResult;
use crate::error::OidcError;
use crate::provider::ProviderConfig;

/// Base64url that accepts both padded and unpadded input.
const B64URL_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decoded ID token claims.
pub type IdTokenClaims = Map<String, Value>;

/// Signature algorithms accepted for ID tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdTokenAlgorithm {
    Rs256,
    Ps256,
}

impl IdTokenAlgorithm {
    #[must_use]
    pub fn parse(alg: &str) -> Option<Self> {
        match alg {
            "RS256" => Some(Self::Rs256),
            "PS256" => Some(Self::Ps256),
            _ => None,
        }
    }
}

/// Validates ID tokens issued by SPID and CIE providers.
#[derive(Clone)]
pub struct TokenValidator {
    jwks: JwksFetcher,
    clock_skew: Duration,
    clock: fn() -> i64,
}

impl TokenValidator {
    #[must_use]
    pub fn new(jwks: JwksFetcher, clock_skew: Duration) -> Self {
        Self {
            jwks,
            clock_skew,
            clock: unix_now,
        }
    }

    /// Replaces the clock. Tests use this to pin `now`.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// Validates `id_token` and returns its claims.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing check; see the module docs.
    pub async fn validate_id_token(
        &self,
        id_token: &str,
        provider: &ProviderConfig,
        expected_nonce: &str,
        correlation_id: &str,
    ) -> OidcResult<IdTokenClaims> {
        let parts: Vec<&str> = id_token.split('.').collect();
        let [header_b64, payload_b64, signature_b64] = parts.as_slice() else {
            return Err(OidcError::InvalidToken);
        };

        let header = decode_json_part(header_b64).ok_or(OidcError::InvalidTokenFormat)?;
        let payload = decode_json_part(payload_b64).ok_or(OidcError::InvalidTokenFormat)?;
        let signature = B64URL_LENIENT
            .decode(signature_b64)
            .map_err(|_| OidcError::InvalidTokenFormat)?;

        let alg_name = header.get("alg").and_then(Value::as_str).unwrap_or_default();
        let alg = IdTokenAlgorithm::parse(alg_name)
            .ok_or_else(|| OidcError::AlgNotAllowed(alg_name.to_string()))?;

        self.check_claims(&payload, provider, expected_nonce)?;

        if provider.jwks_uri.is_empty() {
            return Err(OidcError::NoJwks);
        }

        let kid = header.get("kid").and_then(Value::as_str).unwrap_or_default();
        let (jwk, cached) = self
            .jwks
            .resolve_key(&provider.jwks_uri, kid, correlation_id)
            .await?;

        let signing_input = format!("{header_b64}.{payload_b64}");
        let mut verified = verify_signature(signing_input.as_bytes(), &signature, &jwk, alg);

        // A cached key may predate a rotation that kept the kid (or had none).
        if verified.is_err() && cached {
            tracing::debug!(
                correlation_id,
                kid,
                "Cached key rejected signature, refetching JWKS"
            );
            let fresh = self
                .jwks
                .refresh_key(&provider.jwks_uri, kid, correlation_id)
                .await?;
            if fresh != jwk {
                verified = verify_signature(signing_input.as_bytes(), &signature, &fresh, alg);
            }
        }

        if let Err(reason) = verified {
            tracing::error!(
                correlation_id,
                kid,
                error = %reason,
                "ID token signature verification error"
            );
            return Err(OidcError::BadSignature);
        }

        Ok(payload)
    }

    fn check_claims(
        &self,
        payload: &IdTokenClaims,
        provider: &ProviderConfig,
        expected_nonce: &str,
    ) -> OidcResult<()> {
        let now = (self.clock)();
        let skew = i64::try_from(self.clock_skew.as_secs()).unwrap_or(i64::MAX);

        let iss = payload.get("iss").and_then(Value::as_str).unwrap_or_default();
        if iss != provider.issuer {
            return Err(OidcError::iss_mismatch(&provider.issuer, iss));
        }

        let audience_ok = match payload.get("aud") {
            Some(Value::Array(values)) => values
                .iter()
                .any(|v| v.as_str() == Some(provider.client_id.as_str())),
            Some(Value::String(aud)) => *aud == provider.client_id,
            _ => false,
        };
        if !audience_ok {
            return Err(OidcError::AudMismatch);
        }

        match numeric_claim(payload.get("exp")) {
            Some(exp) if now.saturating_sub(skew) < exp => {}
            _ => return Err(OidcError::Expired),
        }

        match numeric_claim(payload.get("iat")) {
            Some(iat) if iat <= now.saturating_add(skew) => {}
            _ => return Err(OidcError::IatInvalid),
        }

        let nonce = payload.get("nonce").and_then(Value::as_str).unwrap_or_default();
        if nonce != expected_nonce {
            return Err(OidcError::NonceMismatch);
        }

        check_acr_policy(payload, provider)
    }
}

fn check_acr_policy(payload: &IdTokenClaims, provider: &ProviderConfig) -> OidcResult<()> {
    let minimum = provider.min_acr.trim();
    if minimum.is_empty() {
        return Ok(());
    }

    let actual = match payload.get("acr") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };

    if actual.is_empty() {
        return if provider.allow_missing_acr {
            Ok(())
        } else {
            Err(OidcError::MissingAcr)
        };
    }

    if !is_acr_at_least(&actual, minimum) {
        return Err(OidcError::acr_too_low(actual, minimum));
    }
    Ok(())
}

/// Integer timestamp from a number or a numeric string. Zero counts as absent.
fn numeric_claim(value: Option<&Value>) -> Option<i64> {
    let parsed = match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    (parsed != 0).then_some(parsed)
}

fn decode_json_part(part: &str) -> Option<IdTokenClaims> {
    let bytes = B64URL_LENIENT.decode(part).ok()?;
    match serde_json::from_slice::<Value>(&bytes).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn verify_signature(
    message: &[u8],
    signature: &[u8],
    jwk: &RsaJwk,
    alg: IdTokenAlgorithm,
) -> Result<(), String> {
    let n = B64URL_LENIENT.decode(&jwk.n).map_err(|e| e.to_string())?;
    let e = B64URL_LENIENT.decode(&jwk.e).map_err(|e| e.to_string())?;
    let public_key = RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
        .map_err(|e| e.to_string())?;

    match alg {
        IdTokenAlgorithm::Rs256 => {
            let signature = pkcs1v15::Signature::try_from(signature).map_err(|e| e.to_string())?;
            pkcs1v15::VerifyingKey::<Sha256>::new(public_key)
                .verify(message, &signature)
                .map_err(|e| e.to_string())
        }
        IdTokenAlgorithm::Ps256 => {
            let signature = pss::Signature::try_from(signature).map_err(|e| e.to_string())?;
            pss::VerifyingKey::<Sha256>::new(public_key)
                .verify(message, &signature)
                .map_err(|e| e.to_string())
        }
    }
}

fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
