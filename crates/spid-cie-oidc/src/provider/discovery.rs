//! OpenID Connect discovery for SPID and CIE providers.
//!
//! Fetches `{issuer}/.well-known/openid-configuration` and keeps only the
//! endpoint fields a relying party needs.
//!
//! # Security Considerations
//!
//! - Only HTTPS issuers with a public host are contacted (SSRF guard)
//! - Requests are bounded by a timeout and the client's redirect cap
//! - Bodies over `max_response_size` are dropped before being buffered
//! - Documents missing a required endpoint are rejected as a whole
//! - Transport error text is logged, never returned to the caller
//!
//! # References
//!
//! - [OpenID Connect Discovery 1.0](https://openid.net/specs/openid-connect-discovery-1_0.html)

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::OidcError;
use crate::OidcResult;

/// Fields that must be present and non-empty in a discovery document.
pub const REQUIRED_FIELDS: [&str; 4] = [
    "issuer",
    "authorization_endpoint",
    "token_endpoint",
    "jwks_uri",
];

/// Endpoint metadata extracted from a discovery document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer without trailing slash.
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    /// Empty when not advertised.
    pub userinfo_endpoint: String,
    /// Empty when not advertised.
    pub end_session_endpoint: String,
}

/// Configuration for the discovery resolver.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// HTTP request timeout (default: 10 seconds).
    pub request_timeout: Duration,

    /// Maximum response size in bytes (default: 1 MB).
    pub max_response_size: usize,

    /// Whether to allow HTTP and loopback issuers.
    /// This should only be enabled for testing.
    pub allow_http: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_response_size: 1024 * 1024,
            allow_http: false,
        }
    }
}

impl DiscoveryConfig {
    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the largest discovery document accepted, in bytes.
    #[must_use]
    pub fn with_max_response_size(mut self, max: usize) -> Self {
        self.max_response_size = max;
        self
    }

    /// Allows HTTP and loopback issuers.
    ///
    /// # Warning
    ///
    /// This should only be used for testing against local mock servers.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }
}

/// Resolves provider metadata from an issuer URL.
#[derive(Debug, Clone)]
pub struct DiscoveryResolver {
    http_client: reqwest::Client,
    config: DiscoveryConfig,
}

impl DiscoveryResolver {
    /// Creates a resolver on top of a shared HTTP client.
    #[must_use]
    pub fn new(http_client: reqwest::Client, config: DiscoveryConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }

    /// Fetches and validates the discovery document of `issuer`.
    ///
    /// # Errors
    ///
    /// - `DiscoveryEmptyIssuer` if the issuer is blank
    /// - `UnsafeIssuer` if it is not HTTPS or targets `localhost`
    /// - `DiscoveryHttpError` on transport failure
    /// - `DiscoveryInvalidResponse` if the status is not 200 or the body is
    ///   not a JSON object
    /// - `DiscoveryMissingFields` if a required endpoint is absent
    pub async fn resolve_from_issuer(
        &self,
        issuer: &str,
        correlation_id: &str,
    ) -> OidcResult<ProviderMetadata> {
        let issuer = issuer.trim().trim_end_matches('/');
        if issuer.is_empty() {
            return Err(OidcError::DiscoveryEmptyIssuer);
        }

        self.check_issuer(issuer)?;
        let discovery_url = build_discovery_url(issuer);

        let response = self
            .http_client
            .get(&discovery_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    correlation_id,
                    issuer,
                    error = %e,
                    "OIDC discovery request failed"
                );
                OidcError::DiscoveryHttpError(e.to_string())
            })?;

        let status = response.status().as_u16();
        let body = match read_capped(response, self.config.max_response_size).await {
            Some(body) => body,
            None => {
                tracing::error!(
                    correlation_id,
                    issuer,
                    http_status = status,
                    "OIDC discovery body unreadable or too large"
                );
                return Err(OidcError::DiscoveryInvalidResponse(status));
            }
        };

        let document = match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(map)) if status == 200 => map,
            _ => {
                tracing::error!(
                    correlation_id,
                    issuer,
                    http_status = status,
                    "OIDC discovery invalid response"
                );
                return Err(OidcError::DiscoveryInvalidResponse(status));
            }
        };

        let missing: Vec<String> = REQUIRED_FIELDS
            .iter()
            .filter(|field| non_empty_str(document.get(**field)).is_none())
            .map(|field| (*field).to_string())
            .collect();
        if !missing.is_empty() {
            tracing::error!(
                correlation_id,
                issuer,
                missing = %missing.join(","),
                "OIDC discovery document incomplete"
            );
            return Err(OidcError::DiscoveryMissingFields(missing));
        }

        let field = |name: &str| non_empty_str(document.get(name)).unwrap_or_default();

        tracing::debug!(correlation_id, issuer, "OIDC discovery resolved");

        Ok(ProviderMetadata {
            issuer: field("issuer").trim_end_matches('/').to_string(),
            authorization_endpoint: field("authorization_endpoint"),
            token_endpoint: field("token_endpoint"),
            jwks_uri: field("jwks_uri"),
            userinfo_endpoint: field("userinfo_endpoint"),
            end_session_endpoint: field("end_session_endpoint"),
        })
    }

    /// Rejects issuers that would let discovery reach internal targets.
    ///
    /// # Errors
    ///
    /// Returns `UnsafeIssuer` unless the issuer is `https` with a non-empty,
    /// non-`localhost` host. With `allow_http` any http(s) URL passes.
    pub fn check_issuer(&self, issuer: &str) -> OidcResult<Url> {
        let unsafe_issuer = || OidcError::UnsafeIssuer(issuer.to_string());
        let url = Url::parse(issuer).map_err(|_| unsafe_issuer())?;

        if self.config.allow_http {
            return match url.scheme() {
                "https" | "http" if url.host_str().is_some() => Ok(url),
                _ => Err(unsafe_issuer()),
            };
        }

        if url.scheme() != "https" {
            return Err(unsafe_issuer());
        }
        match url.host_str() {
            Some(host) if !host.is_empty() && !host.eq_ignore_ascii_case("localhost") => Ok(url),
            _ => Err(unsafe_issuer()),
        }
    }
}

/// Reads the body, giving up as soon as it exceeds `max` bytes.
async fn read_capped(mut response: reqwest::Response, max: usize) -> Option<Vec<u8>> {
    let limit = u64::try_from(max).unwrap_or(u64::MAX);
    if response.content_length().is_some_and(|len| len > limit) {
        return None;
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.ok()? {
        if body.len() + chunk.len() > max {
            return None;
        }
        body.extend_from_slice(&chunk);
    }
    Some(body)
}

/// Builds the well-known discovery URL for an issuer.
#[must_use]
pub fn build_discovery_url(issuer: &str) -> String {
    format!(
        "{}/.well-known/openid-configuration",
        issuer.trim_end_matches('/')
    )
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}
