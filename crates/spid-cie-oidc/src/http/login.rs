//! Login start and callback handlers.
//!
//! Both actions share the site root and are selected by `oidc_action`:
//!
//! ```text
//! GET  /?oidc_action=login&provider=spid&idp=validator&redirect_to=/area
//!   -> 302 to the IdP authorization endpoint
//! GET|POST /?oidc_action=callback&provider=spid&state=…&code=…
//!   -> token exchange, validation, account resolution
//!   -> 302 to the stored target, or to the login error page
//! ```
//!
//! Session issuance belongs to the host application and is delegated to a
//! [`LoginCompleter`].

use async_trait::async_trait;
use axum::extract::{Form, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::AppState;
use crate::client::CallbackRequest;
use crate::error::{ErrorCategory, OidcError};
use crate::identity::{NormalizedIdentity, UserRecord};
use crate::logging::generate_correlation_id;
use crate::token::IdTokenClaims;

/// Error code used when the authorization redirect cannot be built.
pub const START_FAILED_CODE: &str = "oidc_start_failed";

/// Error code used when the [`LoginCompleter`] fails.
pub const COMPLETION_FAILED_CODE: &str = "login_completion_failed";

/// Query (and form) parameters of the login routes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginQuery {
    pub oidc_action: Option<String>,
    pub provider: Option<String>,
    pub idp: Option<String>,
    pub redirect_to: Option<String>,
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl LoginQuery {
    /// Fills fields missing here from `other`.
    fn or(self, other: LoginQuery) -> Self {
        Self {
            oidc_action: self.oidc_action.or(other.oidc_action),
            provider: self.provider.or(other.provider),
            idp: self.idp.or(other.idp),
            redirect_to: self.redirect_to.or(other.redirect_to),
            state: self.state.or(other.state),
            code: self.code.or(other.code),
            error: self.error.or(other.error),
            error_description: self.error_description.or(other.error_description),
        }
    }
}

/// A login that passed every check and resolved to a local account.
#[derive(Debug, Clone)]
pub struct CompletedLogin {
    pub user: UserRecord,
    pub identity: NormalizedIdentity,
    pub claims: IdTokenClaims,
    pub correlation_id: String,
}

/// Session issuance failed in the host application.
#[derive(Debug, thiserror::Error)]
#[error("Login completion failed: {0}")]
pub struct LoginCompletionError(pub String);

/// Establishes the application session for a completed login.
#[async_trait]
pub trait LoginCompleter: Send + Sync {
    /// Returns headers (typically `Set-Cookie`) added to the final redirect.
    async fn complete_login(
        &self,
        login: &CompletedLogin,
    ) -> Result<HeaderMap, LoginCompletionError>;
}

/// Completer that issues no session. Used by the development server.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLoginCompleter;

#[async_trait]
impl LoginCompleter for NoopLoginCompleter {
    async fn complete_login(
        &self,
        login: &CompletedLogin,
    ) -> Result<HeaderMap, LoginCompletionError> {
        tracing::debug!(
            correlation_id = %login.correlation_id,
            user_id = login.user.id,
            "No session issued for completed login"
        );
        Ok(HeaderMap::new())
    }
}

/// Handler for `GET /`.
pub async fn login_flow(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
) -> Response {
    dispatch(&state, query).await
}

/// Handler for `POST /` with a form-encoded callback.
pub async fn login_flow_form(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
    Form(form): Form<LoginQuery>,
) -> Response {
    dispatch(&state, form.or(query)).await
}

async fn dispatch(state: &AppState, query: LoginQuery) -> Response {
    let action = query.oidc_action.as_deref().map(sanitize_key);
    let provider = query.provider.as_deref().map(sanitize_key).unwrap_or_default();
    let correlation_id = generate_correlation_id();

    match action.as_deref() {
        Some("login") => start_login(state, &provider, query, &correlation_id).await,
        Some("callback") => finish_login(state, &provider, query, &correlation_id).await,
        _ => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Not found",
        )
            .into_response(),
    }
}

async fn start_login(
    state: &AppState,
    provider: &str,
    query: LoginQuery,
    correlation_id: &str,
) -> Response {
    let services = &state.services;
    let idp = query.idp.as_deref().map(sanitize_key).filter(|k| !k.is_empty());

    let config = match services
        .registry()
        .resolve_config(provider, idp.as_deref())
        .await
    {
        Ok(config) => config,
        Err(e) => {
            log_failure(
                &e,
                correlation_id,
                provider,
                "OIDC provider config resolution failed",
            );
            return error_redirect(state, e.code());
        }
    };

    let home = services.config().relying_party.homepage_uri();
    let redirect_to = query.redirect_to.as_deref().unwrap_or_default();
    let target = sanitize_redirect_target(redirect_to, &home);

    match services
        .client()
        .build_authorization_url(&config, &target, correlation_id)
        .await
    {
        Ok(request) => {
            tracing::info!(
                correlation_id,
                provider,
                idp = %config.provider_id,
                "OIDC start login redirect"
            );
            found(&request.url, HeaderMap::new())
        }
        Err(e) => {
            log_failure(&e, correlation_id, provider, "OIDC start login failed");
            error_redirect(state, START_FAILED_CODE)
        }
    }
}

async fn finish_login(
    state: &AppState,
    provider: &str,
    query: LoginQuery,
    correlation_id: &str,
) -> Response {
    match complete(state, provider, query, correlation_id).await {
        Ok(response) => response,
        Err(e) => {
            log_failure(&e, correlation_id, provider, "OIDC callback failed");
            error_redirect(state, e.code())
        }
    }
}

async fn complete(
    state: &AppState,
    provider: &str,
    query: LoginQuery,
    correlation_id: &str,
) -> Result<Response, OidcError> {
    let services = &state.services;
    let registry = services.registry();
    let kind = registry.enabled_kind(provider)?;

    let request = CallbackRequest {
        state: query.state,
        code: query.code,
        error: query.error,
        error_description: query.error_description,
        correlation_id: Some(correlation_id.to_string()),
    };

    let result = services
        .client()
        .handle_callback_with(&request, |context| async move {
            if context.provider != kind.as_str() {
                return Err(OidcError::StateMismatch);
            }
            let idp = Some(context.provider_id.as_str()).filter(|id| !id.is_empty());
            registry.resolve_config(kind.as_str(), idp).await
        })
        .await?;

    let mapper = services.mapper();
    let identity = mapper.normalize_claims(&result.claims, kind);
    mapper.validate_mandatory_claims(&identity, correlation_id)?;

    let last_acr = match result.claims.get("acr") {
        Some(Value::String(acr)) => acr.clone(),
        _ => String::new(),
    };
    let user = services
        .resolver()
        .resolve_or_provision(&identity, &last_acr, correlation_id)
        .await?;

    let login = CompletedLogin {
        user,
        identity,
        claims: result.claims,
        correlation_id: correlation_id.to_string(),
    };
    let session_headers = match state.completer.complete_login(&login).await {
        Ok(headers) => headers,
        Err(e) => {
            tracing::error!(correlation_id, provider, error = %e, "OIDC login completion failed");
            return Ok(error_redirect(state, COMPLETION_FAILED_CODE));
        }
    };

    let home = services.config().relying_party.homepage_uri();
    let target = sanitize_redirect_target(&result.state_context.target_url, &home);

    tracing::info!(
        correlation_id,
        provider,
        user_id = login.user.id,
        "OIDC login completed"
    );
    Ok(found(&target, session_headers))
}

/// Keeps `raw` only if it points at the relying party's own host.
///
/// Empty, relative-without-slash, scheme-relative, non-http(s) and foreign
/// targets all fall back to `home`.
#[must_use]
pub fn sanitize_redirect_target(raw: &str, home: &str) -> String {
    let Ok(home_url) = Url::parse(home) else {
        return home.to_string();
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return home.to_string();
    }

    let parsed = if raw.starts_with('/') {
        if raw.starts_with("//") || raw.starts_with("/\\") {
            return home.to_string();
        }
        home_url.join(raw)
    } else {
        Url::parse(raw)
    };

    match parsed {
        Ok(url)
            if matches!(url.scheme(), "http" | "https")
                && url.host_str().is_some()
                && url.host_str() == home_url.host_str() =>
        {
            url.into()
        }
        _ => home.to_string(),
    }
}

fn error_redirect(state: &AppState, code: &str) -> Response {
    let base = state.services.config().relying_party.login_error_url();
    let code = sanitize_key(code);
    let location = match Url::parse(&base) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair("login", "failed")
                .append_pair("spid_cie_error", &code);
            url.into()
        }
        Err(_) => format!("{base}?login=failed&spid_cie_error={code}"),
    };
    found(&location, HeaderMap::new())
}

fn found(location: &str, extra: HeaderMap) -> Response {
    let Ok(location) = HeaderValue::from_str(location) else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let mut response = StatusCode::FOUND.into_response();
    let headers = response.headers_mut();
    headers.extend(extra);
    headers.insert(header::LOCATION, location);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn log_failure(error: &OidcError, correlation_id: &str, provider: &str, message: &str) {
    match error.category() {
        ErrorCategory::Input | ErrorCategory::Policy => tracing::warn!(
            correlation_id,
            provider,
            error_code = error.code(),
            "{message}"
        ),
        ErrorCategory::Integrity | ErrorCategory::Upstream | ErrorCategory::Internal => {
            tracing::error!(
                correlation_id,
                provider,
                error_code = error.code(),
                error = %error,
                "{message}"
            )
        }
    }
}

/// Lowercases and keeps only `[a-z0-9_-]`.
fn sanitize_key(value: &str) -> String {
    value
        .to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}
