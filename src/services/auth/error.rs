//! Authentication error taxonomy.
//!
//! Every variant is a terminal rejection: re-presenting the same token can
//! never change the outcome, so nothing in this layer retries.
use serde::Serialize;
use thiserror::Error;

/// Errors produced by [`Verifier::verify`](super::verifier::Verifier::verify).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("malformed token: {0}")]
    MalformedToken(&'static str),
    #[error("unknown signing key: {0}")]
    UnknownKey(String),
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("malformed claims: {0}")]
    MalformedClaims(String),
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("invalid audience")]
    InvalidAudience,
}

/// Errors returned by [`Authenticator::authenticate`](super::authenticator::Authenticator::authenticate).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error("token revoked")]
    Revoked,
}

impl AuthError {
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            Self::MissingToken => AuthErrorKind::MissingToken,
            Self::Revoked => AuthErrorKind::Revoked,
            Self::Verification(e) => match e {
                VerificationError::MalformedToken(_) => AuthErrorKind::MalformedToken,
                VerificationError::UnknownKey(_) => AuthErrorKind::UnknownKey,
                VerificationError::SignatureMismatch => AuthErrorKind::SignatureMismatch,
                VerificationError::MalformedClaims(_) => AuthErrorKind::MalformedClaims,
                VerificationError::Expired => AuthErrorKind::Expired,
                VerificationError::NotYetValid => AuthErrorKind::NotYetValid,
                VerificationError::InvalidIssuer => AuthErrorKind::InvalidIssuer,
                VerificationError::InvalidAudience => AuthErrorKind::InvalidAudience,
            },
        }
    }
}

/// Fieldless tag of an [`AuthError`], safe to expose to clients and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    MissingToken,
    MalformedToken,
    UnknownKey,
    SignatureMismatch,
    MalformedClaims,
    Expired,
    NotYetValid,
    InvalidIssuer,
    InvalidAudience,
    Revoked,
}

impl AuthErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::MalformedToken => "malformed_token",
            Self::UnknownKey => "unknown_key",
            Self::SignatureMismatch => "signature_mismatch",
            Self::MalformedClaims => "malformed_claims",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
            Self::InvalidIssuer => "invalid_issuer",
            Self::InvalidAudience => "invalid_audience",
            Self::Revoked => "revoked",
        }
    }
}
