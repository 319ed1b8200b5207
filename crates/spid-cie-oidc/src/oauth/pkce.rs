//! PKCE (RFC 7636) verifier and challenge generation.
//!
//! Only S256 is ever sent to SPID/CIE providers. Verification of the
//! verifier is the provider's job, so nothing here parses or checks one.
//!
//! ```
//! use spid_cie_oidc::oauth::PkcePair;
//!
//! let pkce = PkcePair::generate();
//! assert_eq!(pkce.method().as_str(), "S256");
//! assert_eq!(pkce.challenge.as_str().len(), 43);
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// Random bytes behind a generated verifier (86 base64url characters).
const VERIFIER_ENTROPY_BYTES: usize = 64;

/// PKCE challenge method sent as `code_challenge_method`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PkceChallengeMethod {
    #[default]
    S256,
}

impl PkceChallengeMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S256 => "S256",
        }
    }
}

impl std::fmt::Display for PkceChallengeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Code verifier kept in the authentication context until the token exchange.
#[derive(Debug, Clone)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// 64 bytes of OS randomness, base64url without padding.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; VERIFIER_ENTROPY_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// `BASE64URL(SHA256(ASCII(code_verifier)))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge(String);

impl PkceChallenge {
    #[must_use]
    pub fn from_verifier(verifier: &PkceVerifier) -> Self {
        Self(s256(verifier.as_str()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// A verifier together with its S256 challenge.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: PkceVerifier,
    pub challenge: PkceChallenge,
}

impl PkcePair {
    /// Generate a fresh verifier and derive its challenge.
    #[must_use]
    pub fn generate() -> Self {
        let verifier = PkceVerifier::generate();
        let challenge = PkceChallenge::from_verifier(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    /// Always `S256`.
    #[must_use]
    pub fn method(&self) -> PkceChallengeMethod {
        PkceChallengeMethod::S256
    }
}
