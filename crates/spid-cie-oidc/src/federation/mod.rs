//! OpenID Federation metadata for the relying party.
//!
//! - [`keys`] - RSA key material, certificate and deterministic `kid`
//! - [`signer`] - Entity statement, JWKS and resolve response
//!
//! # References
//!
//! - [OpenID Federation 1.0](https://openid.net/specs/openid-federation-1_0.html)
//! - [RFC 7638 - JWK Thumbprint](https://datatracker.ietf.org/doc/html/rfc7638)

use std::path::PathBuf;

pub mod keys;
pub mod signer;

pub use keys::{Jwk, Jwks, KeyStore, RpKeyMaterial};
pub use signer::{FederationSigner, extract_trust_mark_id};

/// Errors raised while handling key material or signing metadata.
#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    /// Reading or writing key files failed.
    #[error("Key file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// RSA key generation or use failed.
    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),

    /// PKCS#1 or PKCS#8 private key encoding failed.
    #[error("Private key encoding error: {0}")]
    Pkcs1(String),

    /// SubjectPublicKeyInfo encoding failed.
    #[error("Public key encoding error: {0}")]
    Spki(String),

    /// Certificate generation failed.
    #[error("Certificate error: {0}")]
    Certificate(#[from] rcgen::Error),

    /// Payload serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JWT signing failed.
    #[error("JWT signing error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// An expected key file does not exist.
    #[error("Key material missing: {}", .0.display())]
    MissingKeyMaterial(PathBuf),

    /// A key file holds a different public key than `private.key`.
    #[error("Key material mismatch: {} does not match the private key", .0.display())]
    KeyMismatch(PathBuf),
}
