//! # spid-cie-oidc
//!
//! OpenID Connect relying party engine for the Italian public digital
//! identity schemes SPID and CIE.
//!
//! This crate provides:
//! - Authorization code flow with PKCE (S256), state and nonce
//! - Per-provider endpoint resolution with optional discovery
//! - ID token validation (RS256/PS256, claims, level of assurance)
//! - Claim normalization and local account resolution
//! - OpenID Federation entity configuration, JWKS and resolve responses
//!
//! ## Modules
//!
//! - [`config`] - Typed relying party configuration
//! - [`error`] - Error codes and categories
//! - [`logging`] - Log context redaction and correlation ids
//! - [`oauth`] - PKCE and single-use state storage
//! - [`provider`] - Discovery, SPID/CIE profiles and the provider registry
//! - [`token`] - ID token validation and JWKS caching
//! - [`client`] - Authorization request and callback handling
//! - [`identity`] - Claim mapping and account resolution
//! - [`federation`] - Key material and federation document signing
//! - [`service`] - Component wiring
//! - [`http`] - Axum handlers for federation and login routes

pub mod client;
pub mod config;
pub mod error;
pub mod federation;
pub mod http;
pub mod identity;
pub mod logging;
pub mod oauth;
pub mod provider;
pub mod service;
pub mod token;

pub use client::{AuthorizationRequest, CallbackRequest, CallbackResult, OidcClient};
pub use config::{ConfigError, RelyingPartyConfig};
pub use error::{ErrorCategory, OidcError};
pub use federation::{FederationError, FederationSigner, KeyStore};
pub use http::{AppState, LoginCompleter, router};
pub use identity::{IdentityMapper, IdentityResolver, NormalizedIdentity, UserDirectory};
pub use oauth::{InMemoryStateStore, StateStore};
pub use provider::{ProviderConfig, ProviderKind, ProviderRegistry};
pub use service::{OidcServices, ServiceInitError};
pub use token::TokenValidator;

/// Type alias for relying party results.
pub type OidcResult<T> = Result<T, OidcError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use spid_cie_oidc::prelude::*;
/// ```
pub mod prelude {
    pub use crate::OidcResult;
    pub use crate::client::{AuthorizationRequest, CallbackRequest, CallbackResult, OidcClient};
    pub use crate::config::{ConfigError, RelyingPartyConfig};
    pub use crate::error::{ErrorCategory, OidcError};
    pub use crate::federation::{FederationError, FederationSigner, KeyStore, RpKeyMaterial};
    pub use crate::http::{
        AppState, CompletedLogin, LoginCompleter, LoginCompletionError, NoopLoginCompleter, router,
    };
    pub use crate::identity::{
        IdentityMapper, IdentityResolver, InMemoryUserDirectory, NormalizedIdentity,
        UserDirectory, UserRecord,
    };
    pub use crate::oauth::{AuthenticationContext, InMemoryStateStore, PkcePair, StateStore};
    pub use crate::provider::{ProviderConfig, ProviderKind, ProviderRegistry};
    pub use crate::service::{OidcServices, ServiceInitError};
    pub use crate::token::{JwksFetcher, TokenValidator};
}
