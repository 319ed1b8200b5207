//! Provider registry.
//!
//! Maps provider keys to profiles, applies the enablement policy and fills in
//! the relying party's client identity.

use crate::OidcResult;
use crate::config::{ProviderMode, ProvidersConfig, RelyingPartySettings};
use crate::error::OidcError;

use super::cie::CieProfile;
use super::discovery::DiscoveryResolver;
use super::profile::{ProviderConfig, ProviderKind, ProviderProfile};
use super::spid::SpidProfile;

/// Registry of the supported providers.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: ProvidersConfig,
    client_id: String,
    resolver: DiscoveryResolver,
    spid: SpidProfile,
    cie: CieProfile,
}

impl ProviderRegistry {
    /// Creates a registry for the given relying party.
    #[must_use]
    pub fn new(
        relying_party: &RelyingPartySettings,
        providers: ProvidersConfig,
        resolver: DiscoveryResolver,
    ) -> Self {
        Self {
            providers,
            client_id: relying_party.client_id(),
            resolver,
            spid: SpidProfile,
            cie: CieProfile,
        }
    }

    /// The relying party `client_id`.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Provider settings this registry was built with.
    #[must_use]
    pub fn providers_config(&self) -> &ProvidersConfig {
        &self.providers
    }

    /// Profile for a provider key.
    ///
    /// # Errors
    ///
    /// Returns `ProviderNotSupported` for unknown keys.
    pub fn profile(&self, provider: &str) -> OidcResult<(ProviderKind, &dyn ProviderProfile)> {
        let kind = ProviderKind::parse(provider)
            .ok_or_else(|| OidcError::ProviderNotSupported(provider.to_string()))?;
        let profile: &dyn ProviderProfile = match kind {
            ProviderKind::Spid => &self.spid,
            ProviderKind::Cie => &self.cie,
        };
        Ok((kind, profile))
    }

    /// Parses `provider` and checks that it is enabled.
    ///
    /// # Errors
    ///
    /// - `ProviderNotSupported` for unknown keys
    /// - `ProviderDisabled` if the provider is turned off
    pub fn enabled_kind(&self, provider: &str) -> OidcResult<ProviderKind> {
        let (kind, _) = self.profile(provider)?;
        if !self.is_enabled(kind) {
            return Err(OidcError::ProviderDisabled(provider.to_string()));
        }
        Ok(kind)
    }

    /// Whether the mode allows `kind` and its flag is not explicitly off.
    #[must_use]
    pub fn is_enabled(&self, kind: ProviderKind) -> bool {
        let allowed_by_mode = match (self.providers.mode, kind) {
            (ProviderMode::Both, _) => true,
            (ProviderMode::SpidOnly, ProviderKind::Spid) => true,
            (ProviderMode::CieOnly, ProviderKind::Cie) => true,
            _ => false,
        };
        let flag = match kind {
            ProviderKind::Spid => self.providers.spid.enabled,
            ProviderKind::Cie => self.providers.cie.enabled,
        };
        allowed_by_mode && flag != Some(false)
    }

    /// Enabled providers, SPID first.
    #[must_use]
    pub fn enabled_providers(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }

    /// Trust anchors of the enabled providers, deduplicated, SPID first.
    #[must_use]
    pub fn trust_anchors(&self) -> Vec<String> {
        let mut anchors: Vec<String> = Vec::new();
        for kind in self.enabled_providers() {
            let anchor = match kind {
                ProviderKind::Spid => self.providers.spid.trust_anchor.trim(),
                ProviderKind::Cie => self.providers.cie.trust_anchor.trim(),
            };
            if !anchor.is_empty() && !anchors.iter().any(|a| a == anchor) {
                anchors.push(anchor.to_string());
            }
        }
        anchors
    }

    /// Callback URL registered for `kind`.
    #[must_use]
    pub fn redirect_uri(&self, kind: ProviderKind) -> String {
        format!("{}?oidc_action=callback&provider={kind}", self.client_id)
    }

    /// Resolves the configuration for one authentication attempt.
    ///
    /// # Errors
    ///
    /// - `ProviderNotSupported` for unknown keys
    /// - `ProviderDisabled` if the provider is turned off
    /// - Any discovery error in `auto` mode
    pub async fn resolve_config(
        &self,
        provider: &str,
        idp: Option<&str>,
    ) -> OidcResult<ProviderConfig> {
        let kind = self.enabled_kind(provider)?;
        let (_, profile) = self.profile(provider)?;

        let mut config = profile
            .resolve_config(&self.providers, idp, &self.resolver)
            .await?;
        config.client_id = self.client_id.clone();
        config.client_secret = String::new();
        config.redirect_uri = self.redirect_uri(kind);
        Ok(config)
    }
}
