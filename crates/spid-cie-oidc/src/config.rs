//! Relying party configuration.
//!
//! A single strongly typed [`RelyingPartyConfig`] replaces the loose option
//! map of a plugin-style deployment. It is built once at startup, validated,
//! and handed to each component constructor.
//!
//! # Example (TOML)
//!
//! ```toml
//! [relying_party]
//! base_url = "https://comune.example.it"
//! organization_name = "Comune di Esempio"
//! ipa_code = "c_x000"
//!
//! [providers]
//! mode = "both"
//! discovery_mode = "auto"
//! min_loa = "SpidL2"
//!
//! [providers.cie]
//! enabled = false
//!
//! [security]
//! state_ttl = "10m"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration of the relying party.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RelyingPartyConfig {
    /// Identity of this relying party.
    pub relying_party: RelyingPartySettings,

    /// SPID and CIE provider settings.
    pub providers: ProvidersConfig,

    /// OpenID Federation metadata settings.
    pub federation: FederationConfig,

    /// State, clock skew and transport safety.
    pub security: SecurityConfig,

    /// Outbound HTTP limits.
    pub http: HttpConfig,

    /// JWKS caching.
    pub jwks_cache: JwksCacheConfig,

    /// Local account handling.
    pub users: UsersConfig,
}

/// Organization and URL settings of the relying party.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelyingPartySettings {
    /// Public base URL of the application.
    pub base_url: String,

    /// Overrides the base URL used as `client_id` and entity id.
    pub issuer_override: Option<String>,

    /// Organization name, used as `client_name` and certificate O.
    pub organization_name: String,

    /// IPA code of the public administration.
    pub ipa_code: String,

    /// Numeric fiscal number of the administration.
    pub fiscal_number: String,

    /// Technical contact address.
    pub contacts_email: String,

    /// Privacy policy page. Defaults to `{base}/privacy-policy`.
    pub policy_uri: Option<String>,

    /// Organization logo. Defaults to `{base}/logo.png`.
    pub logo_uri: Option<String>,

    /// Page that receives failed logins. Defaults to `{base}/login`.
    pub login_error_url: Option<String>,
}

impl Default for RelyingPartySettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            issuer_override: None,
            organization_name: "Relying Party".to_string(),
            ipa_code: String::new(),
            fiscal_number: String::new(),
            contacts_email: String::new(),
            policy_uri: None,
            logo_uri: None,
            login_error_url: None,
        }
    }
}

impl RelyingPartySettings {
    /// Canonical base URL without trailing slash.
    ///
    /// This is the RP `client_id` and its federation entity id.
    #[must_use]
    pub fn client_id(&self) -> String {
        let base = self
            .issuer_override
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.base_url);
        base.trim().trim_end_matches('/').to_string()
    }

    /// Home page URL, always with a trailing slash.
    #[must_use]
    pub fn homepage_uri(&self) -> String {
        format!("{}/", self.base_url.trim().trim_end_matches('/'))
    }

    /// Privacy policy URL.
    #[must_use]
    pub fn policy_uri(&self) -> String {
        self.policy_uri
            .clone()
            .unwrap_or_else(|| format!("{}privacy-policy", self.homepage_uri()))
    }

    /// Logo URL.
    #[must_use]
    pub fn logo_uri(&self) -> String {
        self.logo_uri
            .clone()
            .unwrap_or_else(|| format!("{}logo.png", self.homepage_uri()))
    }

    /// URL failed logins are redirected to.
    #[must_use]
    pub fn login_error_url(&self) -> String {
        self.login_error_url
            .clone()
            .unwrap_or_else(|| format!("{}login", self.homepage_uri()))
    }

    /// Value of `organization_identifier` in federation metadata.
    #[must_use]
    pub fn organization_identifier(&self) -> String {
        let id = if self.fiscal_number.trim().is_empty() {
            self.ipa_code.trim()
        } else {
            self.fiscal_number.trim()
        };
        format!("PA:IT-{id}")
    }
}

/// Which providers may be used at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderMode {
    /// SPID and CIE.
    #[default]
    Both,
    /// SPID only.
    SpidOnly,
    /// CIE only.
    CieOnly,
}

/// How provider endpoints are obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Fetch `.well-known/openid-configuration`; discovered values win.
    #[default]
    Auto,
    /// Use configured or built-in endpoints only.
    Manual,
}

/// Provider selection and assurance policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Global provider mode.
    pub mode: ProviderMode,

    /// Discovery mode applied to both providers.
    pub discovery_mode: DiscoveryMode,

    /// Minimum level of assurance (`SpidL1`, `SpidL2`, `SpidL3`).
    pub min_loa: String,

    /// SPID settings.
    pub spid: SpidSettings,

    /// CIE settings.
    pub cie: CieSettings,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            mode: ProviderMode::Both,
            discovery_mode: DiscoveryMode::Auto,
            min_loa: "SpidL2".to_string(),
            spid: SpidSettings::default(),
            cie: CieSettings::default(),
        }
    }
}

/// Operator overrides for provider endpoints.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointOverrides {
    pub issuer: Option<String>,
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub jwks_uri: Option<String>,
    pub userinfo_endpoint: Option<String>,
    pub end_session_endpoint: Option<String>,
}

/// One entry of the SPID identity provider catalog.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SpidIdentityProvider {
    /// Key used in the `idp` request parameter.
    pub key: String,
    /// Display name.
    pub name: String,
    /// Issuer URL.
    pub issuer: String,
    /// Authorization endpoint.
    pub authorization_endpoint: String,
}

impl SpidIdentityProvider {
    fn new(key: &str, name: &str, issuer: &str) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            issuer: issuer.to_string(),
            authorization_endpoint: format!("{issuer}/oidc/op/authorization"),
        }
    }

    /// The AgID validator, used when nothing else is available.
    #[must_use]
    pub fn validator() -> Self {
        Self::new("validator", "SPID Validator", "https://validator.spid.gov.it")
    }
}

/// SPID provider settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SpidSettings {
    /// `None` leaves the provider governed by `mode` only.
    pub enabled: Option<bool>,
    pub scope: String,
    /// Explicit `acr_values`; empty derives it from `min_loa`.
    pub acr_values: String,
    pub trust_anchor: String,
    pub endpoints: EndpointOverrides,
    pub identity_providers: Vec<SpidIdentityProvider>,
}

impl Default for SpidSettings {
    fn default() -> Self {
        Self {
            enabled: None,
            scope: "openid profile".to_string(),
            acr_values: String::new(),
            trust_anchor: "https://registry.agid.gov.it/".to_string(),
            endpoints: EndpointOverrides::default(),
            identity_providers: vec![
                SpidIdentityProvider::validator(),
                SpidIdentityProvider::new("demo", "SPID Demo", "https://demo.spid.gov.it"),
            ],
        }
    }
}

/// CIE provider settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CieSettings {
    /// `None` leaves the provider governed by `mode` only.
    pub enabled: Option<bool>,
    pub scope: String,
    /// Explicit `acr_values`; empty derives it from `min_loa`.
    pub acr_values: String,
    pub trust_anchor: String,
    pub endpoints: EndpointOverrides,
}

impl Default for CieSettings {
    fn default() -> Self {
        Self {
            enabled: None,
            scope: "openid profile email".to_string(),
            acr_values: String::new(),
            trust_anchor: "https://registry.interno.gov.it/".to_string(),
            endpoints: EndpointOverrides::default(),
        }
    }
}

/// OpenID Federation metadata settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FederationConfig {
    /// Directory holding `private.key`, `public.key` and `public.crt`.
    pub key_dir: PathBuf,

    /// Trust Mark JWTs issued to this entity.
    pub trust_marks: Vec<String>,

    /// Validity of entity statements and resolve responses.
    #[serde(with = "humantime_serde")]
    pub statement_lifetime: Duration,

    /// Validity of the self-signed certificate.
    #[serde(with = "humantime_serde")]
    pub certificate_validity: Duration,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            key_dir: PathBuf::from("spid-cie-oidc-keys"),
            trust_marks: Vec::new(),
            statement_lifetime: Duration::from_secs(6 * 3600),
            certificate_validity: Duration::from_secs(365 * 86400),
        }
    }
}

/// Security-related settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Lifetime of an authentication context.
    #[serde(with = "humantime_serde")]
    pub state_ttl: Duration,

    /// Tolerance applied to `exp` and `iat`.
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,

    /// Upper bound on concurrently pending logins. `0` means unbounded.
    pub max_pending_states: usize,

    /// Allow plain HTTP and loopback issuers. Only for local testing.
    pub allow_http: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            state_ttl: Duration::from_secs(600),
            clock_skew: Duration::from_secs(60),
            max_pending_states: 0,
            allow_http: false,
        }
    }
}

/// Outbound HTTP limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    #[serde(with = "humantime_serde")]
    pub discovery_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub token_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub jwks_timeout: Duration,

    /// Maximum redirects followed per request.
    pub max_redirects: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(10),
            token_timeout: Duration::from_secs(15),
            jwks_timeout: Duration::from_secs(10),
            max_redirects: 2,
        }
    }
}

impl HttpConfig {
    /// Builds the shared outbound client with the redirect cap applied.
    ///
    /// Timeouts are applied per request since they differ per endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(self.max_redirects))
            .user_agent(concat!("spid-cie-oidc/", env!("CARGO_PKG_VERSION")))
            .build()
    }
}

/// JWKS cache settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JwksCacheConfig {
    /// Disable to fetch the key set on every validation.
    pub enabled: bool,

    /// TTL used when the response has no `Cache-Control: max-age`.
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,

    #[serde(with = "humantime_serde")]
    pub min_ttl: Duration,

    #[serde(with = "humantime_serde")]
    pub max_ttl: Duration,
}

impl Default for JwksCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Duration::from_secs(300),
            min_ttl: Duration::from_secs(60),
            max_ttl: Duration::from_secs(3600),
        }
    }
}

/// Local account handling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UsersConfig {
    /// Create an account on first login.
    pub auto_provisioning: bool,

    /// Role assigned to provisioned accounts.
    pub default_role: String,
}

impl Default for UsersConfig {
    fn default() -> Self {
        Self {
            auto_provisioning: false,
            default_role: "subscriber".to_string(),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl RelyingPartyConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The base URL is empty or not an absolute http(s) URL
    /// - A timeout or the state TTL is zero
    /// - More than 10 redirects are allowed
    /// - The JWKS cache bounds are inverted
    /// - A SPID catalog entry has no key or issuer
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relying_party.base_url.trim().is_empty() {
            return Err(ConfigError::Missing("relying_party.base_url".to_string()));
        }

        let base = url::Url::parse(&self.relying_party.client_id()).map_err(|e| {
            ConfigError::InvalidValue(format!("relying_party.base_url is not a URL: {e}"))
        })?;
        if !matches!(base.scheme(), "http" | "https") || base.host_str().is_none() {
            return Err(ConfigError::InvalidValue(
                "relying_party.base_url must be an absolute http(s) URL".to_string(),
            ));
        }

        if self.security.state_ttl.is_zero() {
            return Err(ConfigError::InvalidValue(
                "security.state_ttl must be > 0".to_string(),
            ));
        }

        for (name, value) in [
            ("http.discovery_timeout", self.http.discovery_timeout),
            ("http.token_timeout", self.http.token_timeout),
            ("http.jwks_timeout", self.http.jwks_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue(format!("{name} must be > 0")));
            }
        }

        if self.http.max_redirects > 10 {
            return Err(ConfigError::InvalidValue(format!(
                "http.max_redirects must be <= 10, got {}",
                self.http.max_redirects
            )));
        }

        if self.jwks_cache.min_ttl > self.jwks_cache.max_ttl {
            return Err(ConfigError::InvalidValue(
                "jwks_cache.min_ttl must not exceed jwks_cache.max_ttl".to_string(),
            ));
        }

        for idp in &self.providers.spid.identity_providers {
            if idp.key.trim().is_empty() || idp.issuer.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "providers.spid.identity_providers entries need key and issuer".to_string(),
                ));
            }
        }

        Ok(())
    }
}
