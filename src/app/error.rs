//! Errors surfaced by the application services.
//!
//! Each variant carries a stable machine-readable code; the HTTP layer maps
//! variants to status codes.

use crate::crypto::SealError;
use crate::domain::biometric::MatchError;
use crate::domain::credential::WorkflowError;
use crate::domain::notarization::NotaryError;
use crate::infra::face::FaceServiceError;
use crate::storage::{DocumentError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Validation(String),
    #[error("invalid JSON body: {0}")]
    InvalidJson(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("biometric verification failed")]
    BiometricMismatch { confidence: Option<f64> },
    #[error("wallet signature was produced by {recovered}, not by the signer")]
    WalletSignatureMismatch { recovered: String },
    #[error("{0}")]
    Forbidden(String),
    #[error("no biometric enrolled for this account")]
    BiometricNotEnrolled,
    #[error("it is not your turn to sign; waiting for {expected}")]
    NotYourTurn { expected: String },
    #[error("{0} is not a signer of this credential")]
    NotASigner(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0} has already signed")]
    AlreadySigned(String),
    #[error("credential is already fully signed")]
    AlreadyCompleted,
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("upstream service error: {0}")]
    Upstream(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Validation(_) => "VALIDATION",
            AppError::InvalidJson(_) => "INVALID_JSON",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::BiometricMismatch { .. } => "BIOMETRIC_MISMATCH",
            AppError::WalletSignatureMismatch { .. } => "WALLET_SIGNATURE_MISMATCH",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::BiometricNotEnrolled => "BIOMETRIC_NOT_ENROLLED",
            AppError::NotYourTurn { .. } => "NOT_YOUR_TURN",
            AppError::NotASigner(_) => "NOT_A_SIGNER",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::AlreadySigned(_) => "ALREADY_SIGNED",
            AppError::AlreadyCompleted => "ALREADY_COMPLETED",
            AppError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            AppError::Upstream(_) => "UPSTREAM",
            AppError::Unavailable(_) => "UNAVAILABLE",
            AppError::Internal(_) => "INTERNAL",
        }
    }

    pub fn unauthorized() -> Self {
        AppError::Unauthorized("authentication required".to_string())
    }
}

impl From<WorkflowError> for AppError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::NotASigner(w) => AppError::NotASigner(w),
            WorkflowError::AlreadySigned(w) => AppError::AlreadySigned(w),
            WorkflowError::NotYourTurn { expected } => AppError::NotYourTurn { expected },
            WorkflowError::AlreadyCompleted => AppError::AlreadyCompleted,
            other => AppError::Validation(other.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(what) => AppError::Conflict(format!("{} already exists", what)),
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::Workflow(e) => e.into(),
            StoreError::Database(e) => AppError::Internal(format!("database: {}", e)),
            StoreError::Corrupt(e) => AppError::Internal(format!("corrupt record: {}", e)),
        }
    }
}

impl From<NotaryError> for AppError {
    fn from(err: NotaryError) -> Self {
        AppError::Upstream(err.to_string())
    }
}

impl From<FaceServiceError> for AppError {
    fn from(err: FaceServiceError) -> Self {
        match err {
            FaceServiceError::Disabled => AppError::Unavailable(err.to_string()),
            FaceServiceError::InvalidImage(_) => AppError::Validation(err.to_string()),
            FaceServiceError::NoFace(_) => AppError::BadRequest(err.to_string()),
            FaceServiceError::Unavailable(_) | FaceServiceError::InvalidResponse(_) => {
                AppError::Upstream(err.to_string())
            }
        }
    }
}

impl From<MatchError> for AppError {
    fn from(err: MatchError) -> Self {
        AppError::Upstream(format!("face embedding: {}", err))
    }
}

impl From<DocumentError> for AppError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::TooLarge { .. } => AppError::PayloadTooLarge(err.to_string()),
            DocumentError::Empty | DocumentError::UnsupportedType => AppError::Validation(err.to_string()),
            DocumentError::Io(e) => AppError::Internal(format!("document storage: {}", e)),
        }
    }
}

impl From<SealError> for AppError {
    fn from(err: SealError) -> Self {
        AppError::Internal(format!("biometric template: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_errors_keep_their_codes() {
        let e: AppError = WorkflowError::NotYourTurn {
            expected: "0xabc".into(),
        }
        .into();
        assert_eq!(e.code(), "NOT_YOUR_TURN");
        let e: AppError = StoreError::Workflow(WorkflowError::AlreadyCompleted).into();
        assert_eq!(e.code(), "ALREADY_COMPLETED");
        let e: AppError = WorkflowError::InvalidOrder.into();
        assert_eq!(e.code(), "VALIDATION");
    }

    #[test]
    fn store_errors() {
        let e: AppError = StoreError::Conflict("credential x".into()).into();
        assert_eq!(e.code(), "CONFLICT");
        let e: AppError = StoreError::NotFound("credential x".into()).into();
        assert_eq!(e.code(), "NOT_FOUND");
    }

    #[test]
    fn upload_errors() {
        let e: AppError = DocumentError::TooLarge { max: 1 }.into();
        assert_eq!(e.code(), "PAYLOAD_TOO_LARGE");
        let e: AppError = DocumentError::UnsupportedType.into();
        assert_eq!(e.code(), "VALIDATION");
    }
}
