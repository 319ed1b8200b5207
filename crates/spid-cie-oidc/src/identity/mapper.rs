//! Claim normalization and mandatory claim checks.
//!
//! SPID and CIE providers use different claim names for the same attribute.
//! Each field of [`NormalizedIdentity`] takes the first non-empty alias.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::OidcResult;
use crate::error::OidcError;
use crate::provider::ProviderKind;

const EMAIL_ALIASES: &[&str] = &["email", "mail"];
const GIVEN_NAME_ALIASES: &[&str] = &["given_name", "name"];
const FAMILY_NAME_ALIASES: &[&str] = &["family_name", "familyName", "surname"];
const FISCAL_CODE_ALIASES: &[&str] = &[
    "fiscal_code",
    "fiscalCode",
    "fiscalNumber",
    "fiscal_number",
    "cf",
    "tax_id",
];
const MOBILE_ALIASES: &[&str] = &[
    "mobile",
    "mobile_phone",
    "phone_number",
    "phoneNumber",
    "cellulare",
];

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z0-9](?:[a-z0-9-]*[a-z0-9])?$",
    )
    .expect("EMAIL_REGEX is a valid regex pattern")
});

static TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("TAG_REGEX is a valid regex pattern"));

/// Maximum email length (RFC 5321).
const MAX_EMAIL_LENGTH: usize = 254;

/// Provider-independent identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedIdentity {
    pub provider: ProviderKind,
    pub sub: String,
    pub email: String,
    pub given_name: String,
    pub family_name: String,
    /// Uppercased.
    pub fiscal_code: String,
    /// Digits and `+` only.
    pub mobile: String,
}

impl NormalizedIdentity {
    /// `given family`, trimmed.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{} {}", self.given_name, self.family_name)
            .trim()
            .to_string()
    }
}

/// Maps provider claims to a [`NormalizedIdentity`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMapper;

impl IdentityMapper {
    /// Normalizes raw ID token claims.
    #[must_use]
    pub fn normalize_claims(&self, claims: &Map<String, Value>, provider: ProviderKind) -> NormalizedIdentity {
        NormalizedIdentity {
            provider,
            sub: sanitize_text(&pick_first(claims, &["sub"])),
            email: sanitize_email(&pick_first(claims, EMAIL_ALIASES)),
            given_name: sanitize_text(&pick_first(claims, GIVEN_NAME_ALIASES)),
            family_name: sanitize_text(&pick_first(claims, FAMILY_NAME_ALIASES)),
            fiscal_code: sanitize_text(&pick_first(claims, FISCAL_CODE_ALIASES)).to_uppercase(),
            mobile: normalize_mobile(&pick_first(claims, MOBILE_ALIASES)),
        }
    }

    /// Checks that every mandatory attribute is present.
    ///
    /// # Errors
    ///
    /// Returns `MissingRequiredClaims` listing the absent fields.
    pub fn validate_mandatory_claims(
        &self,
        identity: &NormalizedIdentity,
        correlation_id: &str,
    ) -> OidcResult<()> {
        let mut missing = Vec::new();
        if identity.sub.is_empty() {
            missing.push("sub");
        }
        if !is_valid_email(&identity.email) {
            missing.push("email");
        }
        if identity.given_name.is_empty() {
            missing.push("given_name");
        }
        if identity.family_name.is_empty() {
            missing.push("family_name");
        }
        if identity.fiscal_code.is_empty() {
            missing.push("fiscal_code");
        }
        if identity.mobile.is_empty() {
            missing.push("mobile");
        }

        if missing.is_empty() {
            return Ok(());
        }

        tracing::error!(
            correlation_id,
            provider = %identity.provider,
            missing = %missing.join(","),
            "OIDC mandatory claims missing"
        );
        Err(OidcError::MissingRequiredClaims(
            missing.into_iter().map(str::to_string).collect(),
        ))
    }
}

/// Syntactic email check.
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    !email.is_empty() && email.len() <= MAX_EMAIL_LENGTH && EMAIL_REGEX.is_match(email)
}

/// First alias with a non-null, non-empty scalar value, stringified.
fn pick_first(claims: &Map<String, Value>, aliases: &[&str]) -> String {
    aliases
        .iter()
        .find_map(|alias| match claims.get(*alias)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(true) => Some("1".to_string()),
            _ => None,
        })
        .unwrap_or_default()
}

/// Strips tags and control characters and collapses whitespace.
fn sanitize_text(value: &str) -> String {
    let stripped = TAG_REGEX.replace_all(value, "");
    stripped
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drops characters that cannot appear in an address.
fn sanitize_email(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|c| c.is_ascii_graphic())
        .filter(|c| !matches!(c, '<' | '>' | '(' | ')' | '[' | ']' | '\\' | ',' | ';' | ':' | '"'))
        .collect()
}

/// Removes whitespace, then everything except digits and `+`.
fn normalize_mobile(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect()
}
