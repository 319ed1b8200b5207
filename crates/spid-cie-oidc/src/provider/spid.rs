//! SPID provider profile.
//!
//! SPID federates many identity providers. The requested IdP is looked up in
//! the configured catalog; when absent, the AgID validator is used, then the
//! first catalog entry, then the built-in validator entry.

use std::borrow::Cow;

use super::profile::{ProviderConfig, ProviderKind, ProviderProfile, pick};
use crate::config::{ProvidersConfig, SpidIdentityProvider};

const DEFAULT_SCOPE: &str = "openid profile";

/// SPID profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpidProfile;

impl SpidProfile {
    /// Picks the catalog entry for `requested`, falling back as described above.
    #[must_use]
    pub fn select_identity_provider<'a>(
        catalog: &'a [SpidIdentityProvider],
        requested: Option<&str>,
    ) -> Cow<'a, SpidIdentityProvider> {
        let by_key = |key: &str| catalog.iter().find(|idp| idp.key == key);

        requested
            .filter(|key| !key.is_empty())
            .and_then(by_key)
            .or_else(|| by_key("validator"))
            .or_else(|| catalog.first())
            .map_or_else(|| Cow::Owned(SpidIdentityProvider::validator()), Cow::Borrowed)
    }
}

impl ProviderProfile for SpidProfile {
    fn provider_key(&self) -> ProviderKind {
        ProviderKind::Spid
    }

    fn build_base_config(&self, config: &ProvidersConfig, idp: Option<&str>) -> ProviderConfig {
        let settings = &config.spid;
        let overrides = &settings.endpoints;
        let selected = Self::select_identity_provider(&settings.identity_providers, idp);

        let issuer = pick(overrides.issuer.as_ref(), selected.issuer.trim_end_matches('/'));
        let issuer = issuer.trim_end_matches('/').to_string();

        let mut base = ProviderConfig::base(ProviderKind::Spid, selected.key.clone());
        base.authorization_endpoint = pick(
            overrides.authorization_endpoint.as_ref(),
            selected.authorization_endpoint.clone(),
        );
        base.token_endpoint = pick(
            overrides.token_endpoint.as_ref(),
            format!("{issuer}/oidc/op/token"),
        );
        base.jwks_uri = pick(overrides.jwks_uri.as_ref(), format!("{issuer}/oidc/op/jwks"));
        base.userinfo_endpoint = pick(overrides.userinfo_endpoint.as_ref(), "");
        base.end_session_endpoint = pick(overrides.end_session_endpoint.as_ref(), "");
        base.issuer = issuer;
        base
    }

    fn configured_scope<'a>(&self, config: &'a ProvidersConfig) -> &'a str {
        &config.spid.scope
    }

    fn default_scope(&self) -> &'static str {
        DEFAULT_SCOPE
    }

    fn configured_acr_values<'a>(&self, config: &'a ProvidersConfig) -> &'a str {
        &config.spid.acr_values
    }
}
