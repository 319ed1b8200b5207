//! Authorization code flow with PKCE.
//!
//! [`OidcClient::build_authorization_url`] stores a single-use
//! [`AuthenticationContext`] and returns the IdP redirect.
//! [`OidcClient::handle_callback`] consumes that context, exchanges the code
//! and validates the ID token.
//!
//! ```text
//! Idle -> AuthorizationRequested -> CallbackPending -> Validated -> Completed
//!                          \______________ Failed _______________/
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use url::Url;

use crate::OidcResult;
use crate::error::OidcError;
use crate::logging::{generate_correlation_id, sanitize_context};
use crate::oauth::{AuthenticationContext, PkcePair, StateStore, generate_token};
use crate::provider::ProviderConfig;
use crate::token::{IdTokenClaims, TokenValidator};

/// Redirect to the provider for one login attempt.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Full authorization URL.
    pub url: String,
    pub state: String,
    pub correlation_id: String,
}

/// Parameters received on the callback URL.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackRequest {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub correlation_id: Option<String>,
}

/// Outcome of a successful callback.
#[derive(Debug, Clone)]
pub struct CallbackResult {
    pub claims: IdTokenClaims,
    pub state_context: AuthenticationContext,
    pub correlation_id: String,
}

/// OpenID Connect relying party client.
#[derive(Clone)]
pub struct OidcClient {
    state_store: Arc<dyn StateStore>,
    validator: TokenValidator,
    http_client: reqwest::Client,
    state_ttl: Duration,
    token_timeout: Duration,
}

impl OidcClient {
    #[must_use]
    pub fn new(
        state_store: Arc<dyn StateStore>,
        validator: TokenValidator,
        http_client: reqwest::Client,
        state_ttl: Duration,
        token_timeout: Duration,
    ) -> Self {
        Self {
            state_store,
            validator,
            http_client,
            state_ttl,
            token_timeout,
        }
    }

    /// Builds the authorization URL and stores the matching context.
    ///
    /// # Errors
    ///
    /// - `NoAuthEndpoint` if the provider has no authorization endpoint
    /// - `Url` if that endpoint is not a valid URL
    /// - `StateStoreFail` if the context cannot be stored
    pub async fn build_authorization_url(
        &self,
        provider: &ProviderConfig,
        target_url: &str,
        correlation_id: &str,
    ) -> OidcResult<AuthorizationRequest> {
        if provider.authorization_endpoint.is_empty() {
            return Err(OidcError::NoAuthEndpoint);
        }
        let mut url = Url::parse(&provider.authorization_endpoint)?;

        let state = generate_token();
        let nonce = generate_token();
        let pkce = PkcePair::generate();

        let context = AuthenticationContext {
            created_at: OffsetDateTime::now_utc().unix_timestamp(),
            nonce: nonce.clone(),
            code_verifier: pkce.verifier.as_str().to_string(),
            provider: provider.provider.to_string(),
            provider_id: provider.provider_id.clone(),
            target_url: target_url.to_string(),
            issuer: provider.issuer.clone(),
            correlation_id: correlation_id.to_string(),
        };

        self.state_store
            .store(&state, context, self.state_ttl)
            .await
            .map_err(|e| {
                tracing::error!(correlation_id, error = %e, "Failed to store authentication state");
                OidcError::StateStoreFail(e.to_string())
            })?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &provider.client_id)
                .append_pair("response_type", "code")
                .append_pair("redirect_uri", &provider.redirect_uri)
                .append_pair("scope", &provider.scope)
                .append_pair("state", &state)
                .append_pair("nonce", &nonce)
                .append_pair("code_challenge", pkce.challenge.as_str())
                .append_pair("code_challenge_method", pkce.method().as_str());
            if !provider.acr_values.is_empty() {
                query.append_pair("acr_values", &provider.acr_values);
            }
        }

        tracing::info!(
            correlation_id,
            provider = %provider.provider,
            idp = %provider.provider_id,
            "Authorization request created"
        );

        Ok(AuthorizationRequest {
            url: url.into(),
            state,
            correlation_id: correlation_id.to_string(),
        })
    }

    /// Completes the login for a callback against a known provider config.
    ///
    /// # Errors
    ///
    /// `ProviderError`, `MissingCallbackParams`, `StateMismatch`,
    /// `NoTokenEndpoint`, `TokenHttpError`, `TokenBadResponse`, `NoIdToken`,
    /// or any [`TokenValidator`] error, in that order.
    pub async fn handle_callback(
        &self,
        request: &CallbackRequest,
        provider: &ProviderConfig,
    ) -> OidcResult<CallbackResult> {
        let provider = provider.clone();
        self.handle_callback_with(request, |_| async move { Ok(provider) })
            .await
    }

    /// Completes the login for a callback, resolving the provider config from
    /// the consumed authentication context.
    ///
    /// `resolve` runs only after the state has been consumed, so the config
    /// matches the IdP the login was started with.
    ///
    /// # Errors
    ///
    /// As [`handle_callback`](Self::handle_callback), plus any error returned
    /// by `resolve` right after the state check.
    pub async fn handle_callback_with<F, Fut>(
        &self,
        request: &CallbackRequest,
        resolve: F,
    ) -> OidcResult<CallbackResult>
    where
        F: FnOnce(AuthenticationContext) -> Fut,
        Fut: Future<Output = OidcResult<ProviderConfig>>,
    {
        let correlation_id = request
            .correlation_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_correlation_id);
        let correlation_id = correlation_id.as_str();

        if let Some(error) = request.error.as_deref().filter(|e| !e.is_empty()) {
            let code = sanitize_key(error);
            tracing::warn!(correlation_id, code = %code, "OIDC callback provider error");
            return Err(OidcError::ProviderError(code));
        }

        let state = request.state.as_deref().map(str::trim).unwrap_or_default();
        let code = request.code.as_deref().map(str::trim).unwrap_or_default();
        if state.is_empty() || code.is_empty() {
            return Err(OidcError::MissingCallbackParams);
        }

        let Some(context) = self.state_store.consume(state).await else {
            tracing::error!(correlation_id, "OIDC state mismatch/expired");
            return Err(OidcError::StateMismatch);
        };

        let provider = &resolve(context.clone()).await?;

        let mut token_response = self
            .exchange_code(code, &context.code_verifier, provider, correlation_id)
            .await?;

        let id_token = match token_response.remove("id_token") {
            Some(Value::String(token)) if !token.is_empty() => token,
            _ => return Err(OidcError::NoIdToken),
        };

        let claims = self
            .validator
            .validate_id_token(&id_token, provider, &context.nonce, correlation_id)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    correlation_id,
                    error_code = e.code(),
                    error = %e,
                    "OIDC id_token validation failed"
                );
            })?;

        tracing::info!(correlation_id, provider = %provider.provider, "ID token validated");

        Ok(CallbackResult {
            claims,
            state_context: context,
            correlation_id: correlation_id.to_string(),
        })
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        provider: &ProviderConfig,
        correlation_id: &str,
    ) -> OidcResult<Map<String, Value>> {
        if provider.token_endpoint.is_empty() {
            return Err(OidcError::NoTokenEndpoint);
        }

        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", provider.redirect_uri.as_str()),
            ("client_id", provider.client_id.as_str()),
            ("code_verifier", code_verifier),
        ];
        if !provider.client_secret.is_empty() {
            form.push(("client_secret", provider.client_secret.as_str()));
        }

        let response = self
            .http_client
            .post(&provider.token_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.token_timeout)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(correlation_id, error = %e, "OIDC token request failed");
                OidcError::TokenHttpError(e.to_string())
            })?;

        let status = response.status();
        let body = response.bytes().await.unwrap_or_default();

        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(json)) if status.is_success() => Ok(json),
            parsed => {
                let context = match parsed {
                    Ok(Value::Object(json)) => Value::Object(sanitize_context(json)),
                    _ => Value::Null,
                };
                tracing::error!(
                    correlation_id,
                    http_status = status.as_u16(),
                    response = %context,
                    "OIDC token endpoint invalid response"
                );
                Err(OidcError::TokenBadResponse(status.as_u16()))
            }
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
