//! Relying party error types.
//!
//! Every failure of the login flow maps to one [`OidcError`] variant with a
//! stable machine code (see [`OidcError::code`]). The `Display` output is
//! meant for logs; end users only ever see [`OidcError::user_message`].

use std::fmt;

/// Errors produced by the SPID/CIE relying party engine.
#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    // -------------------------------------------------------------------------
    // Input
    // -------------------------------------------------------------------------
    /// The callback is missing `state` or `code`.
    #[error("Callback is missing state or code")]
    MissingCallbackParams,

    /// The requested provider key is not known.
    #[error("Provider not supported: {0}")]
    ProviderNotSupported(String),

    // -------------------------------------------------------------------------
    // Policy
    // -------------------------------------------------------------------------
    /// The provider is turned off by configuration.
    #[error("Provider disabled by configuration: {0}")]
    ProviderDisabled(String),

    /// The issuer is not an HTTPS URL with a public host.
    #[error("Unsafe issuer for discovery: {0}")]
    UnsafeIssuer(String),

    /// The ID token uses an algorithm outside the allow-list.
    #[error("Algorithm not allowed: {0}")]
    AlgNotAllowed(String),

    /// The ID token carries no `acr` while one is required.
    #[error("ID token has no acr claim")]
    MissingAcr,

    /// The ID token `acr` is below the configured minimum.
    #[error("acr {actual} is below the required minimum {minimum}")]
    AcrTooLow {
        /// The `acr` presented by the provider.
        actual: String,
        /// The configured minimum level.
        minimum: String,
    },

    /// Mandatory identity claims are absent.
    #[error("Missing required claims: {}", .0.join(","))]
    MissingRequiredClaims(Vec<String>),

    /// The email address cannot be used for a new account.
    #[error("Invalid email address for provisioning")]
    InvalidEmail,

    /// No local account matches and provisioning is off.
    #[error("User not found and auto provisioning is disabled")]
    UserNotFound,

    // -------------------------------------------------------------------------
    // Integrity
    // -------------------------------------------------------------------------
    /// The state token is unknown, expired or already consumed.
    #[error("State mismatch or expired")]
    StateMismatch,

    /// The compact token does not have three segments.
    #[error("ID token is not a compact JWS")]
    InvalidToken,

    /// A token segment cannot be decoded.
    #[error("ID token segments cannot be decoded")]
    InvalidTokenFormat,

    /// The `iss` claim does not match the provider issuer.
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssMismatch {
        /// The configured issuer.
        expected: String,
        /// The issuer found in the token.
        actual: String,
    },

    /// The `aud` claim does not include our client id.
    #[error("Audience does not include the client id")]
    AudMismatch,

    /// The token is past its expiry.
    #[error("ID token expired")]
    Expired,

    /// The `iat` claim is missing or in the future.
    #[error("ID token iat is missing or in the future")]
    IatInvalid,

    /// The nonce does not match the one stored at authorization time.
    #[error("Nonce mismatch")]
    NonceMismatch,

    /// No usable RSA key for the token header.
    #[error("No signing key found for kid '{0}'")]
    KidNotFound(String),

    /// The signature does not verify.
    #[error("ID token signature verification failed")]
    BadSignature,

    /// More than one local account claims the same identity.
    #[error("Identity conflict: {0}")]
    IdentityConflict(String),

    // -------------------------------------------------------------------------
    // Upstream
    // -------------------------------------------------------------------------
    /// The provider redirected back with an `error` parameter.
    #[error("Provider returned error: {0}")]
    ProviderError(String),

    /// No issuer configured for discovery.
    #[error("Discovery issuer is empty")]
    DiscoveryEmptyIssuer,

    /// The discovery request failed at the transport level.
    #[error("Discovery request failed: {0}")]
    DiscoveryHttpError(String),

    /// The discovery document is not a JSON object or status is not 200.
    #[error("Discovery response invalid (status {0})")]
    DiscoveryInvalidResponse(u16),

    /// Required discovery fields are absent.
    #[error("Discovery document missing fields: {}", .0.join(","))]
    DiscoveryMissingFields(Vec<String>),

    /// The token request failed at the transport level.
    #[error("Token request failed: {0}")]
    TokenHttpError(String),

    /// The token endpoint answered with a non-2xx or non-JSON body.
    #[error("Token endpoint returned an invalid response (status {0})")]
    TokenBadResponse(u16),

    /// The token response carries no `id_token`.
    #[error("Token response has no id_token")]
    NoIdToken,

    /// The provider has no JWKS URI.
    #[error("Provider has no jwks_uri")]
    NoJwks,

    /// The JWKS request failed at the transport level.
    #[error("JWKS fetch failed: {0}")]
    JwksFetchFail(String),

    /// The JWKS endpoint answered with a non-200 status or an empty body.
    #[error("JWKS endpoint returned status {0}")]
    JwksHttpFail(u16),

    /// The JWKS document has no usable `keys` array.
    #[error("JWKS document is invalid")]
    JwksInvalid,

    // -------------------------------------------------------------------------
    // Internal
    // -------------------------------------------------------------------------
    /// The state store rejected the write.
    #[error("State store write failed: {0}")]
    StateStoreFail(String),

    /// The provider has no authorization endpoint.
    #[error("Provider has no authorization endpoint")]
    NoAuthEndpoint,

    /// The provider has no token endpoint.
    #[error("Provider has no token endpoint")]
    NoTokenEndpoint,

    /// The user directory failed to create the account.
    #[error("User provisioning failed: {0}")]
    UserProvisioningFailed(String),

    /// The user directory failed a lookup or update.
    #[error("User directory error: {0}")]
    Directory(String),

    /// A URL could not be parsed.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Federation key material or signing failed.
    #[error("Federation error: {0}")]
    Federation(#[from] crate::federation::FederationError),
}

impl OidcError {
    /// Creates an `IssMismatch` error.
    #[must_use]
    pub fn iss_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::IssMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates an `AcrTooLow` error.
    #[must_use]
    pub fn acr_too_low(actual: impl Into<String>, minimum: impl Into<String>) -> Self {
        Self::AcrTooLow {
            actual: actual.into(),
            minimum: minimum.into(),
        }
    }

    /// Stable machine code, safe to put in redirect URLs.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCallbackParams => "missing_callback_params",
            Self::ProviderNotSupported(_) => "provider_not_supported",
            Self::ProviderDisabled(_) => "provider_disabled",
            Self::UnsafeIssuer(_) => "unsafe_issuer",
            Self::AlgNotAllowed(_) => "alg_not_allowed",
            Self::MissingAcr => "missing_acr",
            Self::AcrTooLow { .. } => "acr_too_low",
            Self::MissingRequiredClaims(_) => "missing_required_claims",
            Self::InvalidEmail => "invalid_email",
            Self::UserNotFound => "user_not_found",
            Self::StateMismatch => "state_mismatch",
            Self::InvalidToken => "invalid_token",
            Self::InvalidTokenFormat => "invalid_token_format",
            Self::IssMismatch { .. } => "iss_mismatch",
            Self::AudMismatch => "aud_mismatch",
            Self::Expired => "expired",
            Self::IatInvalid => "iat_invalid",
            Self::NonceMismatch => "nonce_mismatch",
            Self::KidNotFound(_) => "kid_not_found",
            Self::BadSignature => "bad_signature",
            Self::IdentityConflict(_) => "identity_conflict",
            Self::ProviderError(_) => "provider_error",
            Self::DiscoveryEmptyIssuer => "discovery_empty_issuer",
            Self::DiscoveryHttpError(_) => "discovery_http_error",
            Self::DiscoveryInvalidResponse(_) => "discovery_invalid_response",
            Self::DiscoveryMissingFields(_) => "discovery_missing_fields",
            Self::TokenHttpError(_) => "token_http_error",
            Self::TokenBadResponse(_) => "token_bad_response",
            Self::NoIdToken => "no_id_token",
            Self::NoJwks => "no_jwks",
            Self::JwksFetchFail(_) => "jwks_fetch_fail",
            Self::JwksHttpFail(_) => "jwks_http_fail",
            Self::JwksInvalid => "jwks_invalid",
            Self::StateStoreFail(_) => "state_store_fail",
            Self::NoAuthEndpoint => "no_auth_endpoint",
            Self::NoTokenEndpoint => "no_token_endpoint",
            Self::UserProvisioningFailed(_) => "user_provisioning_failed",
            Self::Directory(_) => "user_directory_error",
            Self::Url(_) => "invalid_url",
            Self::Federation(_) => "federation_error",
        }
    }

    /// Returns the error category.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingCallbackParams | Self::ProviderNotSupported(_) => ErrorCategory::Input,

            Self::ProviderDisabled(_)
            | Self::UnsafeIssuer(_)
            | Self::AlgNotAllowed(_)
            | Self::MissingAcr
            | Self::AcrTooLow { .. }
            | Self::MissingRequiredClaims(_)
            | Self::InvalidEmail
            | Self::UserNotFound => ErrorCategory::Policy,

            Self::StateMismatch
            | Self::InvalidToken
            | Self::InvalidTokenFormat
            | Self::IssMismatch { .. }
            | Self::AudMismatch
            | Self::Expired
            | Self::IatInvalid
            | Self::NonceMismatch
            | Self::KidNotFound(_)
            | Self::BadSignature
            | Self::IdentityConflict(_) => ErrorCategory::Integrity,

            Self::ProviderError(_)
            | Self::DiscoveryEmptyIssuer
            | Self::DiscoveryHttpError(_)
            | Self::DiscoveryInvalidResponse(_)
            | Self::DiscoveryMissingFields(_)
            | Self::TokenHttpError(_)
            | Self::TokenBadResponse(_)
            | Self::NoIdToken
            | Self::NoJwks
            | Self::JwksFetchFail(_)
            | Self::JwksHttpFail(_)
            | Self::JwksInvalid => ErrorCategory::Upstream,

            Self::StateStoreFail(_)
            | Self::NoAuthEndpoint
            | Self::NoTokenEndpoint
            | Self::UserProvisioningFailed(_)
            | Self::Directory(_)
            | Self::Url(_)
            | Self::Federation(_) => ErrorCategory::Internal,
        }
    }

    /// Returns `true` for errors that may indicate an attack.
    #[must_use]
    pub fn is_integrity_error(&self) -> bool {
        self.category() == ErrorCategory::Integrity
    }

    /// Returns `true` for failures of a remote provider.
    #[must_use]
    pub fn is_upstream_error(&self) -> bool {
        self.category() == ErrorCategory::Upstream
    }

    /// Generic text shown to the end user. Never contains upstream detail.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Input => "Invalid authentication response.",
            ErrorCategory::Upstream => "The identity provider could not complete the request.",
            ErrorCategory::Internal => "Temporary error, please try again.",
            ErrorCategory::Policy | ErrorCategory::Integrity => {
                "SPID/CIE authentication not completed."
            }
        }
    }
}

/// Error categories used to pick log severity and user messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing or malformed request parameters.
    Input,
    /// Configuration or assurance policy refused the login.
    Policy,
    /// Possible replay, forgery or account takeover.
    Integrity,
    /// Discovery, token or JWKS endpoint failures.
    Upstream,
    /// Local failures (storage, key material).
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Policy => write!(f, "policy"),
            Self::Integrity => write!(f, "integrity"),
            Self::Upstream => write!(f, "upstream"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
