//! Provider JWKS fetching and caching.
//!
//! Key sets are cached per normalized `jwks_uri`. The TTL honours
//! `Cache-Control: max-age`, clamped to the configured bounds. When a token
//! names a `kid` missing from a cached set, or a cached key fails to verify
//! the signature, the set is refetched once so key rotation is picked up
//! without waiting for expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::RwLock;

use crate::OidcResult;
use crate::config::JwksCacheConfig;
use crate::error::OidcError;

/// RSA public key material taken from a JWK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaJwk {
    pub kid: Option<String>,
    /// Base64url modulus.
    pub n: String,
    /// Base64url exponent.
    pub e: String,
}

/// Selects the verification key for a token.
///
/// When `kid` is non-empty, keys with a different (or no) `kid` are skipped.
/// The first RSA key with non-empty `n` and `e` wins.
#[must_use]
pub fn find_jwk(keys: &[Value], kid: &str) -> Option<RsaJwk> {
    keys.iter().filter_map(Value::as_object).find_map(|key| {
        let key_kid = key.get("kid").and_then(Value::as_str);
        if !kid.is_empty() && key_kid != Some(kid) {
            return None;
        }
        let kty = key.get("kty").and_then(Value::as_str)?;
        let n = key.get("n").and_then(Value::as_str).filter(|s| !s.is_empty())?;
        let e = key.get("e").and_then(Value::as_str).filter(|s| !s.is_empty())?;
        (kty == "RSA").then(|| RsaJwk {
            kid: key_kid.map(str::to_string),
            n: n.to_string(),
            e: e.to_string(),
        })
    })
}

struct CachedJwks {
    keys: Vec<Value>,
    expires_at: Instant,
}

/// Fetches provider key sets, caching them when enabled.
#[derive(Clone)]
pub struct JwksFetcher {
    http_client: reqwest::Client,
    cache: Arc<RwLock<HashMap<String, CachedJwks>>>,
    config: JwksCacheConfig,
    request_timeout: Duration,
}

impl JwksFetcher {
    #[must_use]
    pub fn new(
        http_client: reqwest::Client,
        config: JwksCacheConfig,
        request_timeout: Duration,
    ) -> Self {
        Self {
            http_client,
            cache: Arc::new(RwLock::new(HashMap::new())),
            config,
            request_timeout,
        }
    }

    /// Returns the key to verify a token with header `kid`.
    ///
    /// # Errors
    ///
    /// - `JwksFetchFail`, `JwksHttpFail`, `JwksInvalid` from the fetch
    /// - `KidNotFound` if no usable key matches after a fresh fetch
    pub async fn get_key(
        &self,
        jwks_uri: &str,
        kid: &str,
        correlation_id: &str,
    ) -> OidcResult<RsaJwk> {
        self.resolve_key(jwks_uri, kid, correlation_id)
            .await
            .map(|(jwk, _)| jwk)
    }

    /// Like [`get_key`](Self::get_key), also reporting whether the key came
    /// from the cache.
    pub(crate) async fn resolve_key(
        &self,
        jwks_uri: &str,
        kid: &str,
        correlation_id: &str,
    ) -> OidcResult<(RsaJwk, bool)> {
        if self.config.enabled {
            if let Some(keys) = self.cached_keys(&normalize_uri(jwks_uri)).await {
                if let Some(jwk) = find_jwk(&keys, kid) {
                    tracing::trace!(correlation_id, jwks_uri, kid, "JWKS cache hit");
                    return Ok((jwk, true));
                }
                tracing::debug!(
                    correlation_id,
                    jwks_uri,
                    kid,
                    "kid not in cached JWKS, refetching"
                );
            }
        }

        self.refresh_key(jwks_uri, kid, correlation_id)
            .await
            .map(|jwk| (jwk, false))
    }

    /// Fetches the key set, bypassing the cache, and stores the result.
    ///
    /// # Errors
    ///
    /// Same as [`get_key`](Self::get_key).
    pub async fn refresh_key(
        &self,
        jwks_uri: &str,
        kid: &str,
        correlation_id: &str,
    ) -> OidcResult<RsaJwk> {
        let (keys, ttl) = self.fetch(jwks_uri, correlation_id).await?;
        let jwk = find_jwk(&keys, kid);

        if self.config.enabled {
            let mut cache = self.cache.write().await;
            cache.insert(
                normalize_uri(jwks_uri),
                CachedJwks {
                    keys,
                    expires_at: Instant::now() + ttl,
                },
            );
        }

        jwk.ok_or_else(|| OidcError::KidNotFound(kid.to_string()))
    }

    async fn cached_keys(&self, cache_key: &str) -> Option<Vec<Value>> {
        let cache = self.cache.read().await;
        cache
            .get(cache_key)
            .filter(|cached| Instant::now() < cached.expires_at)
            .map(|cached| cached.keys.clone())
    }

    /// Fetches the key set and the TTL advertised for it.
    async fn fetch(&self, jwks_uri: &str, correlation_id: &str) -> OidcResult<(Vec<Value>, Duration)> {
        let response = self
            .http_client
            .get(jwks_uri)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(correlation_id, jwks_uri, error = %e, "JWKS fetch failed");
                OidcError::JwksFetchFail(e.to_string())
            })?;

        let status = response.status().as_u16();
        let ttl = self.cache_ttl(response.headers());
        let body = response.bytes().await.unwrap_or_default();
        if status != 200 || body.is_empty() {
            tracing::error!(correlation_id, jwks_uri, http_status = status, "JWKS unavailable");
            return Err(OidcError::JwksHttpFail(status));
        }

        let keys = match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(mut document)) => match document.remove("keys") {
                Some(Value::Array(keys)) if !keys.is_empty() => keys,
                _ => return Err(OidcError::JwksInvalid),
            },
            _ => return Err(OidcError::JwksInvalid),
        };

        tracing::debug!(
            correlation_id,
            jwks_uri,
            keys = keys.len(),
            ttl_secs = ttl.as_secs(),
            "JWKS fetched"
        );
        Ok((keys, ttl))
    }

    /// TTL from `Cache-Control: max-age`, clamped to the configured bounds.
    fn cache_ttl(&self, headers: &reqwest::header::HeaderMap) -> Duration {
        let ttl = headers
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_max_age)
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_ttl);

        ttl.min(self.config.max_ttl).max(self.config.min_ttl)
    }

    /// Drops the cached set for `jwks_uri`.
    pub async fn invalidate(&self, jwks_uri: &str) {
        self.cache.write().await.remove(&normalize_uri(jwks_uri));
    }

    /// Removes expired entries.
    pub async fn cleanup(&self) {
        let mut cache = self.cache.write().await;
        let now = Instant::now();
        let before = cache.len();
        cache.retain(|_, v| v.expires_at > now);
        let removed = before - cache.len();
        if removed > 0 {
            tracing::debug!(removed, "Cleaned up expired JWKS cache entries");
        }
    }

    /// Number of cached key sets.
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }
}

fn parse_max_age(header: &str) -> Option<u64> {
    header.split(',').find_map(|directive| {
        directive
            .trim()
            .strip_prefix("max-age=")
            .and_then(|v| v.trim_matches('"').parse().ok())
    })
}

/// Normalizes a URI for use as a cache key.
fn normalize_uri(uri: &str) -> String {
    uri.trim().trim_end_matches('/').to_string()
}
