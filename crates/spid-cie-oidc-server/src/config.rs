//! Server configuration.
//!
//! Loaded from a TOML file (default `spid-cie-oidc.toml`) with environment
//! overrides, e.g. `SPIDCIE__SECURITY__STATE_TTL=5m` or
//! `SPIDCIE__PROVIDERS__CIE__ENABLED=false`.

use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use spid_cie_oidc::config::{
    FederationConfig, HttpConfig, JwksCacheConfig, ProvidersConfig, RelyingPartyConfig,
    RelyingPartySettings, SecurityConfig, UsersConfig,
};

pub const DEFAULT_CONFIG_FILE: &str = "spid-cie-oidc.toml";
pub const ENV_PREFIX: &str = "SPIDCIE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub relying_party: RelyingPartySettings,
    pub providers: ProvidersConfig,
    pub federation: FederationConfig,
    pub security: SecurityConfig,
    pub http: HttpConfig,
    pub jwks_cache: JwksCacheConfig,
    pub users: UsersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// The relying party part of the configuration.
    pub fn relying_party_config(&self) -> RelyingPartyConfig {
        RelyingPartyConfig {
            relying_party: self.relying_party.clone(),
            providers: self.providers.clone(),
            federation: self.federation.clone(),
            security: self.security.clone(),
            http: self.http.clone(),
            jwks_cache: self.jwks_cache.clone(),
            users: self.users.clone(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        self.relying_party_config()
            .validate()
            .map_err(|e| e.to_string())
    }
}

/// Loads the configuration from `path` (if it exists) and the process
/// environment.
pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
    load_config_with_env(path, None)
}

/// Like [`load_config`], reading overrides from `env` instead of the process
/// environment when given.
pub fn load_config_with_env(
    path: Option<&str>,
    env: Option<config::Map<String, String>>,
) -> Result<AppConfig, String> {
    let mut builder = Config::builder();
    let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
    if pathbuf.exists() {
        builder = builder.add_source(File::from(pathbuf));
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .separator("__")
            .source(env),
    );
    let cfg = builder
        .build()
        .map_err(|e| format!("config build error: {e}"))?;
    let merged: AppConfig = cfg
        .try_deserialize()
        .map_err(|e| format!("config deserialize error: {e}"))?;
    merged.validate()?;
    Ok(merged)
}
