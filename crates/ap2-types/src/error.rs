//! Wire-level error taxonomy shared by every AP2 service.
//!
//! Internal failures are rich `thiserror` enums; what crosses a service
//! boundary is only an [`ErrorKind`] plus a stable code and a non-specific
//! detail string. Verification failures never reveal which check failed to
//! external callers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The coarse error classes AP2 services expose to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The caller passed a malformed mandate or request body.
    Validation,
    /// A signature, JWT, or attestation failed to verify.
    Authentication,
    /// The mandate chain is broken, expired, or risk-declined.
    Authorization,
    /// Replay detected, or the target is already in a terminal state.
    Conflict,
    /// DID, product, or transaction not found.
    NotFound,
    /// A downstream dependency timed out.
    Unavailable,
    /// Everything else.
    Internal,
}

impl ErrorKind {
    /// The HTTP status this kind maps to on raw (non-A2A) endpoints.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Authentication => 401,
            ErrorKind::Authorization => 403,
            ErrorKind::Conflict => 409,
            ErrorKind::NotFound => 404,
            ErrorKind::Unavailable => 504,
            ErrorKind::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = UnknownErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validation" => Ok(ErrorKind::Validation),
            "authentication" => Ok(ErrorKind::Authentication),
            "authorization" => Ok(ErrorKind::Authorization),
            "conflict" => Ok(ErrorKind::Conflict),
            "not_found" => Ok(ErrorKind::NotFound),
            "unavailable" => Ok(ErrorKind::Unavailable),
            "internal" => Ok(ErrorKind::Internal),
            other => Err(UnknownErrorKind(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown error kind: {0}")]
pub struct UnknownErrorKind(String);

/// The error payload carried in `ap2.errors.*` A2A responses and raw HTTP
/// error bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    /// Stable machine-readable code, e.g. `"authorization_failed"`.
    pub code: String,
    /// Human-readable but non-specific detail. Never names the failed check.
    pub detail: String,
}

impl ErrorBody {
    pub fn new<C: Into<String>, D: Into<String>>(kind: ErrorKind, code: C, detail: D) -> Self {
        Self {
            kind,
            code: code.into(),
            detail: detail.into(),
        }
    }

    /// The opaque body returned for any verification failure.
    pub fn authorization_failed() -> Self {
        Self::new(
            ErrorKind::Authorization,
            "authorization_failed",
            "authorization failed",
        )
    }
}
