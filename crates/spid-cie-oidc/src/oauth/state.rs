//! Single-use authentication state storage.
//!
//! Every authorization request stores an [`AuthenticationContext`] under a
//! random `state` token. The callback consumes it with a destructive read,
//! so a state value can complete at most one login.
//!
//! # Security Considerations
//!
//! - There is no peek operation; reading a context deletes it
//! - `consume` must be atomic across concurrent callbacks
//! - Expired contexts are treated exactly like missing ones
//!
//! Networked implementations must use an atomic get-and-delete
//! (`GETDEL`, `DELETE ... RETURNING`) rather than a read followed by a delete.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Context captured when the authorization URL is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationContext {
    /// Unix timestamp of creation.
    pub created_at: i64,
    pub nonce: String,
    pub code_verifier: String,
    /// `spid` or `cie`.
    pub provider: String,
    /// SPID IdP key, or `cie`.
    pub provider_id: String,
    /// Where the user goes after a successful login.
    pub target_url: String,
    pub issuer: String,
    pub correlation_id: String,
}

/// Errors raised by a state store write.
#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    /// The store is full.
    #[error("State store capacity of {0} entries exceeded")]
    CapacityExceeded(usize),

    /// The backend rejected the write.
    #[error("State store backend error: {0}")]
    Backend(String),
}

/// Storage for pending authentication contexts.
///
/// Implementations must make [`consume`](StateStore::consume) atomic: two
/// concurrent calls for the same state observe at most one `Some`.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Stores `context` under `state` for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write. Callers must abort
    /// the login attempt rather than retry.
    async fn store(
        &self,
        state: &str,
        context: AuthenticationContext,
        ttl: Duration,
    ) -> Result<(), StateStoreError>;

    /// Atomically reads and deletes the context stored under `state`.
    ///
    /// Returns `None` if the state is unknown, expired or already consumed.
    async fn consume(&self, state: &str) -> Option<AuthenticationContext>;
}

struct StateEntry {
    context: AuthenticationContext,
    expires_at: Instant,
}

/// Bookkeeping for the expiry sweep run from `store`.
#[derive(Default)]
struct SweepState {
    /// Earliest expiry among entries inserted since the last sweep.
    next_expiry: Option<Instant>,
    inserts_since_sweep: usize,
    live_after_sweep: usize,
}

/// In-process [`StateStore`] backed by a concurrent map.
///
/// Keys are the SHA-256 of the state token, so raw state values are never
/// held as map keys.
///
/// Abandoned logins are evicted by `store` itself: once some entry has
/// expired and the map has grown by half since the previous sweep, expired
/// entries are dropped. The sweep cost is amortized over those inserts.
pub struct InMemoryStateStore {
    entries: DashMap<String, StateEntry>,
    max_entries: usize,
    sweep: Mutex<SweepState>,
}

impl InMemoryStateStore {
    /// Creates an unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity_limit(0)
    }

    /// Creates a store that rejects writes beyond `max_entries` live contexts.
    /// `0` means unbounded.
    #[must_use]
    pub fn with_capacity_limit(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
            sweep: Mutex::new(SweepState::default()),
        }
    }

    /// Removes expired entries and returns how many were dropped.
    pub fn cleanup(&self) -> usize {
        let mut sweep = self.sweep.lock().unwrap_or_else(PoisonError::into_inner);
        self.sweep_expired(&mut sweep, Instant::now())
    }

    fn sweep_expired(&self, sweep: &mut SweepState, now: Instant) -> usize {
        let before = self.entries.len();
        let mut next_expiry: Option<Instant> = None;
        self.entries.retain(|_, entry| {
            let live = entry.expires_at > now;
            if live {
                next_expiry = Some(
                    next_expiry.map_or(entry.expires_at, |at| at.min(entry.expires_at)),
                );
            }
            live
        });
        let removed = before.saturating_sub(self.entries.len());

        sweep.next_expiry = next_expiry;
        sweep.inserts_since_sweep = 0;
        sweep.live_after_sweep = self.entries.len();
        if removed > 0 {
            tracing::debug!(
                removed,
                remaining = sweep.live_after_sweep,
                "Evicted expired states"
            );
        }
        removed
    }

    /// Number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key(state: &str) -> String {
        hex::encode(Sha256::digest(state.as_bytes()))
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn store(
        &self,
        state: &str,
        context: AuthenticationContext,
        ttl: Duration,
    ) -> Result<(), StateStoreError> {
        let now = Instant::now();
        let mut sweep = self.sweep.lock().unwrap_or_else(PoisonError::into_inner);

        sweep.inserts_since_sweep += 1;
        let expired_pending = sweep.next_expiry.is_some_and(|at| at <= now);
        if expired_pending && sweep.inserts_since_sweep * 2 >= sweep.live_after_sweep {
            self.sweep_expired(&mut sweep, now);
        }

        if self.max_entries > 0 && self.entries.len() >= self.max_entries {
            self.sweep_expired(&mut sweep, now);
            if self.entries.len() >= self.max_entries {
                return Err(StateStoreError::CapacityExceeded(self.max_entries));
            }
        }

        let expires_at = now + ttl;
        self.entries.insert(
            Self::key(state),
            StateEntry {
                context,
                expires_at,
            },
        );
        sweep.next_expiry = Some(sweep.next_expiry.map_or(expires_at, |at| at.min(expires_at)));
        Ok(())
    }

    async fn consume(&self, state: &str) -> Option<AuthenticationContext> {
        let (_, entry) = self.entries.remove(&Self::key(state))?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.context)
    }
}

/// Generates a 128-bit random token, lowercase hex. Used for `state` and `nonce`.
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
