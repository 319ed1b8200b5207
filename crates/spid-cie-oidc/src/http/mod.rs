//! HTTP handlers for the relying party.
//!
//! - [`federation`] - Entity configuration, JWKS and resolve endpoints
//! - [`login`] - Login start and callback on `/?oidc_action=…`
//!
//! [`router`] mounts both on one axum router over a shared [`AppState`].

use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use crate::service::OidcServices;

pub mod federation;
pub mod login;

pub use login::{
    CompletedLogin, LoginCompleter, LoginCompletionError, LoginQuery, NoopLoginCompleter,
    sanitize_redirect_target,
};

/// Shared state of the relying party handlers.
#[derive(Clone)]
pub struct AppState {
    pub services: OidcServices,
    pub completer: Arc<dyn LoginCompleter>,
}

impl AppState {
    #[must_use]
    pub fn new(services: OidcServices, completer: Arc<dyn LoginCompleter>) -> Self {
        Self {
            services,
            completer,
        }
    }
}

/// Builds the router with the federation and login routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/.well-known/openid-federation",
            get(federation::entity_configuration),
        )
        .route(
            "/.wellknown/openid-federation",
            get(federation::entity_configuration),
        )
        .route("/jwks.json", get(federation::jwks))
        .route("/resolve", get(federation::resolve))
        .route("/", get(login::login_flow).post(login::login_flow_form))
        .with_state(state)
}
