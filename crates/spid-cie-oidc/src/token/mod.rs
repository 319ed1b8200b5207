//! ID token verification.
//!
//! - [`acr`] - Level of assurance comparison
//! - [`jwks`] - Provider key set fetching and caching
//! - [`validator`] - Ordered ID token checks and RS256/PS256 verification

pub mod acr;
pub mod jwks;
pub mod validator;

pub use acr::{extract_loa_level, is_acr_at_least};
pub use jwks::{JwksFetcher, RsaJwk, find_jwk};
pub use validator::{IdTokenAlgorithm, IdTokenClaims, TokenValidator};
