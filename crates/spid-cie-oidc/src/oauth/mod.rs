//! Authorization request primitives.
//!
//! - [`pkce`] - PKCE verifier/challenge generation (S256 only)
//! - [`state`] - Single-use authentication state storage

pub mod pkce;
pub mod state;

pub use pkce::{PkceChallenge, PkceChallengeMethod, PkcePair, PkceVerifier};
pub use state::{
    AuthenticationContext, InMemoryStateStore, StateStore, StateStoreError, generate_token,
};
