//! Service-layer error type and its HTTP mapping.
//!
//! [`ServiceError`] is what every handler returns. Internally it keeps the
//! specific cause for logs; externally it renders as the taxonomy-mapped
//! status with an opaque body, so a caller can tell *that* authorization
//! failed but never *why*.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use ap2_types::error::{ErrorBody, ErrorKind};
use ap2_types::mandate::MandateError;

use crate::crypto::CryptoError;

#[derive(Debug, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct ServiceError {
    pub kind: ErrorKind,
    /// Stable machine-readable code for the wire body.
    pub code: &'static str,
    /// Internal detail; logged, never sent to verification callers.
    pub detail: String,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, code: &'static str, detail: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            detail: detail.into(),
        }
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, "invalid_request", detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, "not_found", detail)
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, "downstream_timeout", detail)
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, "conflict", detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, "internal", detail)
    }

    /// The body shown to external callers. Authentication and authorization
    /// failures collapse to a fixed opaque body.
    pub fn wire_body(&self) -> ErrorBody {
        match self.kind {
            ErrorKind::Authentication => ErrorBody::new(
                ErrorKind::Authentication,
                "authentication_failed",
                "authentication failed",
            ),
            ErrorKind::Authorization => ErrorBody::authorization_failed(),
            _ => ErrorBody::new(self.kind, self.code, self.detail.clone()),
        }
    }
}

impl From<CryptoError> for ServiceError {
    fn from(error: CryptoError) -> Self {
        let kind = error.kind();
        let code = match kind {
            ErrorKind::Conflict => "replay",
            ErrorKind::NotFound => "key_not_found",
            ErrorKind::Authentication => "authentication_failed",
            ErrorKind::Authorization => "authorization_failed",
            _ => "crypto_error",
        };
        Self::new(kind, code, error.to_string())
    }
}

impl From<MandateError> for ServiceError {
    fn from(error: MandateError) -> Self {
        match &error {
            MandateError::Canonicalization(_) | MandateError::InvalidCart(_) => {
                Self::new(ErrorKind::Validation, "invalid_mandate", error.to_string())
            }
            MandateError::ChainBroken(_) | MandateError::CartExpired(_) => {
                Self::new(ErrorKind::Authorization, "authorization_failed", error.to_string())
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        tracing::warn!(kind = %self.kind, code = self.code, detail = %self.detail, "request failed");
        let status = StatusCode::from_u16(self.kind.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.wire_body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_body_is_opaque() {
        let error = ServiceError::new(
            ErrorKind::Authorization,
            "authorization_failed",
            "cart_hash mismatch on field total.value",
        );
        let body = error.wire_body();
        assert_eq!(body.detail, "authorization failed");
        assert!(!body.detail.contains("cart_hash"));
    }

    #[test]
    fn test_crypto_error_mapping() {
        let error: ServiceError = CryptoError::JtiReplay.into();
        assert_eq!(error.kind, ErrorKind::Conflict);
        let error: ServiceError = CryptoError::SignatureInvalid.into();
        assert_eq!(error.kind, ErrorKind::Authentication);
        let error: ServiceError = CryptoError::KeyNotFound("x".to_string()).into();
        assert_eq!(error.kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_validation_detail_passes_through() {
        let error = ServiceError::validation("missing field: contents");
        assert_eq!(error.wire_body().detail, "missing field: contents");
    }
}
