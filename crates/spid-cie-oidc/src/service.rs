//! Service composition.
//!
//! [`OidcServices`] wires every component from one [`RelyingPartyConfig`].
//! It is cheap to clone and is the shared state of the HTTP handlers.

use std::sync::Arc;

use url::Url;

use crate::client::OidcClient;
use crate::config::{ConfigError, RelyingPartyConfig};
use crate::federation::{FederationError, FederationSigner, KeyStore};
use crate::identity::{IdentityMapper, IdentityResolver, UserDirectory};
use crate::oauth::{InMemoryStateStore, StateStore};
use crate::provider::{DiscoveryConfig, DiscoveryResolver, ProviderKind, ProviderRegistry};
use crate::token::{JwksFetcher, TokenValidator};

/// Errors raised while assembling the services.
#[derive(Debug, thiserror::Error)]
pub enum ServiceInitError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Failed to prepare federation keys: {0}")]
    Federation(#[from] FederationError),
}

/// All relying party components, built once at startup.
#[derive(Clone)]
pub struct OidcServices {
    config: Arc<RelyingPartyConfig>,
    registry: Arc<ProviderRegistry>,
    client: OidcClient,
    mapper: IdentityMapper,
    resolver: IdentityResolver,
    signer: FederationSigner,
}

impl OidcServices {
    /// Builds the services with an in-memory state store.
    ///
    /// Federation keys are loaded from `federation.key_dir`, or generated
    /// there on first start.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the HTTP client
    /// cannot be built, or the key material cannot be loaded or generated.
    pub fn from_config(
        config: RelyingPartyConfig,
        directory: Arc<dyn UserDirectory>,
    ) -> Result<Self, ServiceInitError> {
        let state_store = Arc::new(InMemoryStateStore::with_capacity_limit(
            config.security.max_pending_states,
        ));
        Self::with_state_store(config, directory, state_store)
    }

    /// Builds the services with a caller-supplied state store.
    ///
    /// # Errors
    ///
    /// See [`from_config`](Self::from_config).
    pub fn with_state_store(
        config: RelyingPartyConfig,
        directory: Arc<dyn UserDirectory>,
        state_store: Arc<dyn StateStore>,
    ) -> Result<Self, ServiceInitError> {
        config.validate()?;

        let http_client = config.http.build_client()?;

        let discovery = DiscoveryResolver::new(
            http_client.clone(),
            DiscoveryConfig::default()
                .with_request_timeout(config.http.discovery_timeout)
                .with_allow_http(config.security.allow_http),
        );
        let registry = ProviderRegistry::new(
            &config.relying_party,
            config.providers.clone(),
            discovery,
        );

        let jwks = JwksFetcher::new(
            http_client.clone(),
            config.jwks_cache.clone(),
            config.http.jwks_timeout,
        );
        let validator = TokenValidator::new(jwks, config.security.clock_skew);
        let client = OidcClient::new(
            state_store,
            validator,
            http_client,
            config.security.state_ttl,
            config.http.token_timeout,
        );

        let resolver = IdentityResolver::new(directory, config.users.clone());

        let client_id = config.relying_party.client_id();
        let host = Url::parse(&client_id)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or(client_id);
        let keys = KeyStore::new(&config.federation.key_dir).load_or_generate(
            &host,
            &config.relying_party.organization_name,
            config.federation.certificate_validity,
        )?;
        let redirect_uris = ProviderKind::ALL
            .into_iter()
            .map(|kind| registry.redirect_uri(kind))
            .collect();
        let signer = FederationSigner::new(
            &config.relying_party,
            &config.federation,
            registry.trust_anchors(),
            redirect_uris,
            keys,
        )?;

        tracing::info!(
            entity_id = %signer.entity_id(),
            kid = %signer.kid(),
            providers = ?registry.enabled_providers(),
            "Relying party services initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            client,
            mapper: IdentityMapper,
            resolver,
            signer,
        })
    }

    #[must_use]
    pub fn config(&self) -> &RelyingPartyConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    #[must_use]
    pub fn client(&self) -> &OidcClient {
        &self.client
    }

    #[must_use]
    pub fn mapper(&self) -> &IdentityMapper {
        &self.mapper
    }

    #[must_use]
    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    #[must_use]
    pub fn signer(&self) -> &FederationSigner {
        &self.signer
    }
}
