//! OpenID Federation endpoints.
//!
//! - `GET /.well-known/openid-federation` (and the `/.wellknown/` alias)
//! - `GET /jwks.json`
//! - `GET /resolve?sub=…&trust_anchor=…`
//!
//! Bodies are served inline, never cached and never sniffed. A signer
//! failure yields a plain 500 without detail.

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::AppState;
use crate::federation::FederationError;

pub const ENTITY_STATEMENT_CONTENT_TYPE: &str = "application/entity-statement+jwt; charset=utf-8";
pub const JWKS_CONTENT_TYPE: &str = "application/jwk-set+json; charset=utf-8";
pub const RESOLVE_RESPONSE_CONTENT_TYPE: &str = "application/resolve-response+jwt; charset=utf-8";

/// Query of the resolve endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ResolveQuery {
    pub sub: Option<String>,
    pub trust_anchor: Option<String>,
}

/// Handler for `GET /.well-known/openid-federation`.
pub async fn entity_configuration(State(state): State<AppState>) -> Response {
    match state.services.signer().entity_statement() {
        Ok(jwt) => federation_response(ENTITY_STATEMENT_CONTENT_TYPE, jwt),
        Err(e) => signer_failure("entity configuration", &e),
    }
}

/// Handler for `GET /jwks.json`.
pub async fn jwks(State(state): State<AppState>) -> Response {
    match serde_json::to_string(&state.services.signer().jwks()) {
        Ok(body) => federation_response(JWKS_CONTENT_TYPE, body),
        Err(e) => signer_failure("jwks", &FederationError::from(e)),
    }
}

/// Handler for `GET /resolve`.
pub async fn resolve(
    State(state): State<AppState>,
    Query(query): Query<ResolveQuery>,
) -> Response {
    let signed = state
        .services
        .signer()
        .resolve_response(query.sub.as_deref(), query.trust_anchor.as_deref());
    match signed {
        Ok(jwt) => federation_response(RESOLVE_RESPONSE_CONTENT_TYPE, jwt),
        Err(e) => signer_failure("resolve response", &e),
    }
}

fn federation_response(content_type: &'static str, body: String) -> Response {
    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("inline"),
    );
    response
}

fn signer_failure(document: &str, error: &FederationError) -> Response {
    tracing::error!(document, error = %error, "Failed to produce federation document");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        "OIDC federation error",
    )
        .into_response()
}
