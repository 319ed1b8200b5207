//! CIE provider profile.

use super::profile::{ProviderConfig, ProviderKind, ProviderProfile, pick};
use crate::config::ProvidersConfig;

pub const DEFAULT_ISSUER: &str = "https://id.cie.gov.it/oidc/op";
pub const DEFAULT_AUTHORIZATION_ENDPOINT: &str = "https://id.cie.gov.it/oidc/authorization";
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://id.cie.gov.it/oidc/token";
pub const DEFAULT_JWKS_URI: &str = "https://id.cie.gov.it/oidc/jwks";

const DEFAULT_SCOPE: &str = "openid profile email";

/// CIE profile. A single national identity provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct CieProfile;

impl ProviderProfile for CieProfile {
    fn provider_key(&self) -> ProviderKind {
        ProviderKind::Cie
    }

    fn build_base_config(&self, config: &ProvidersConfig, _idp: Option<&str>) -> ProviderConfig {
        let overrides = &config.cie.endpoints;

        let mut base = ProviderConfig::base(ProviderKind::Cie, "cie");
        base.issuer = pick(overrides.issuer.as_ref(), DEFAULT_ISSUER)
            .trim_end_matches('/')
            .to_string();
        base.authorization_endpoint = pick(
            overrides.authorization_endpoint.as_ref(),
            DEFAULT_AUTHORIZATION_ENDPOINT,
        );
        base.token_endpoint = pick(overrides.token_endpoint.as_ref(), DEFAULT_TOKEN_ENDPOINT);
        base.jwks_uri = pick(overrides.jwks_uri.as_ref(), DEFAULT_JWKS_URI);
        base.userinfo_endpoint = pick(overrides.userinfo_endpoint.as_ref(), "");
        base.end_session_endpoint = pick(overrides.end_session_endpoint.as_ref(), "");
        base
    }

    fn configured_scope<'a>(&self, config: &'a ProvidersConfig) -> &'a str {
        &config.cie.scope
    }

    fn default_scope(&self) -> &'static str {
        DEFAULT_SCOPE
    }

    fn configured_acr_values<'a>(&self, config: &'a ProvidersConfig) -> &'a str {
        &config.cie.acr_values
    }
}
