//! Provider profile abstraction and the resolved provider configuration.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::discovery::{DiscoveryResolver, ProviderMetadata};
use crate::OidcResult;
use crate::config::{DiscoveryMode, ProvidersConfig};
use crate::logging::generate_correlation_id;

/// SPID LoA URIs keyed by level name.
const SPID_ACR_URIS: [(&str, &str); 3] = [
    ("SpidL1", "https://www.spid.gov.it/SpidL1"),
    ("SpidL2", "https://www.spid.gov.it/SpidL2"),
    ("SpidL3", "https://www.spid.gov.it/SpidL3"),
];

/// Supported identity schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Spid,
    Cie,
}

impl ProviderKind {
    /// All providers, in metadata order.
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Spid, ProviderKind::Cie];

    /// Parses a provider key. Unknown keys yield `None`.
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "spid" => Some(Self::Spid),
            "cie" => Some(Self::Cie),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spid => "spid",
            Self::Cie => "cie",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully resolved configuration for one authentication attempt.
///
/// Built fresh per attempt and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    /// Selected SPID IdP key, or `cie`.
    pub provider_id: String,
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub userinfo_endpoint: String,
    pub end_session_endpoint: String,
    pub scope: String,
    pub acr_values: String,
    pub min_acr: String,
    pub allow_missing_acr: bool,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl ProviderConfig {
    /// A base configuration with endpoints only; policy and client fields empty.
    #[must_use]
    pub fn base(provider: ProviderKind, provider_id: impl Into<String>) -> Self {
        Self {
            provider,
            provider_id: provider_id.into(),
            issuer: String::new(),
            authorization_endpoint: String::new(),
            token_endpoint: String::new(),
            jwks_uri: String::new(),
            userinfo_endpoint: String::new(),
            end_session_endpoint: String::new(),
            scope: String::new(),
            acr_values: String::new(),
            min_acr: String::new(),
            allow_missing_acr: false,
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
        }
    }

    /// Overlays discovered endpoints; discovered values win.
    pub fn apply_metadata(&mut self, metadata: ProviderMetadata) {
        self.issuer = metadata.issuer;
        self.authorization_endpoint = metadata.authorization_endpoint;
        self.token_endpoint = metadata.token_endpoint;
        self.jwks_uri = metadata.jwks_uri;
        self.userinfo_endpoint = metadata.userinfo_endpoint;
        self.end_session_endpoint = metadata.end_session_endpoint;
    }
}

/// A provider's baseline endpoints and policy.
///
/// Implemented by [`SpidProfile`](super::spid::SpidProfile) and
/// [`CieProfile`](super::cie::CieProfile).
#[async_trait]
pub trait ProviderProfile: Send + Sync {
    /// Which scheme this profile serves.
    fn provider_key(&self) -> ProviderKind;

    /// Built-in or operator-configured endpoints, without discovery.
    fn build_base_config(&self, config: &ProvidersConfig, idp: Option<&str>) -> ProviderConfig;

    /// Scope configured for this provider.
    fn configured_scope<'a>(&self, config: &'a ProvidersConfig) -> &'a str;

    /// Scope used when the configured one is blank.
    fn default_scope(&self) -> &'static str;

    /// Explicit `acr_values` configured for this provider.
    fn configured_acr_values<'a>(&self, config: &'a ProvidersConfig) -> &'a str;

    /// Base config, discovery overlay (in `auto` mode) and policy fields.
    ///
    /// # Errors
    ///
    /// Propagates discovery errors in `auto` mode.
    async fn resolve_config(
        &self,
        config: &ProvidersConfig,
        idp: Option<&str>,
        resolver: &DiscoveryResolver,
    ) -> OidcResult<ProviderConfig> {
        let mut resolved = self.build_base_config(config, idp);

        if config.discovery_mode == DiscoveryMode::Auto {
            let correlation_id = format!("{}-{}", self.provider_key(), generate_correlation_id());
            let metadata = resolver
                .resolve_from_issuer(&resolved.issuer, &correlation_id)
                .await?;
            resolved.apply_metadata(metadata);
        }

        resolved.scope = normalize_scope(self.configured_scope(config), self.default_scope());
        resolved.acr_values = resolve_acr_values(self.configured_acr_values(config), &config.min_loa);
        resolved.min_acr = config.min_loa.clone();
        resolved.allow_missing_acr = false;

        Ok(resolved)
    }
}

/// Collapses whitespace runs; blank scopes fall back to `default`.
#[must_use]
pub fn normalize_scope(scope: &str, default: &str) -> String {
    let normalized = scope.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        default.to_string()
    } else {
        normalized
    }
}

/// Explicit override, else the SPID LoA URI for `min_loa` (SpidL2 if unknown).
#[must_use]
pub fn resolve_acr_values(explicit: &str, min_loa: &str) -> String {
    if !explicit.trim().is_empty() {
        return explicit.to_string();
    }
    SPID_ACR_URIS
        .iter()
        .find(|(level, _)| *level == min_loa)
        .or_else(|| SPID_ACR_URIS.iter().find(|(level, _)| *level == "SpidL2"))
        .map(|(_, uri)| (*uri).to_string())
        .unwrap_or_default()
}

/// Returns the override when set and non-blank, otherwise `fallback`.
pub(crate) fn pick(value: Option<&String>, fallback: impl Into<String>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.into(),
    }
}
