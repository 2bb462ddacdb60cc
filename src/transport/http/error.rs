//! HTTP rendering of [`AppError`].

use crate::app::AppError;
use crate::transport::http::types::ApiResponse;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

pub fn status_of(err: &AppError) -> StatusCode {
    match err {
        AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        AppError::Validation(_) | AppError::InvalidJson(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AppError::Unauthorized(_) | AppError::BiometricMismatch { .. } | AppError::WalletSignatureMismatch { .. } => {
            StatusCode::UNAUTHORIZED
        }
        AppError::Forbidden(_)
        | AppError::BiometricNotEnrolled
        | AppError::NotYourTurn { .. }
        | AppError::NotASigner(_) => StatusCode::FORBIDDEN,
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::Conflict(_) | AppError::AlreadySigned(_) | AppError::AlreadyCompleted => StatusCode::CONFLICT,
        AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
        AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_of(&self);

        let message = match &self {
            AppError::Internal(_) => {
                tracing::error!(error = %self, "internal error");
                "an internal error occurred".to_string()
            }
            AppError::Upstream(_) | AppError::Unavailable(_) => {
                tracing::warn!(error = %self, "dependency error");
                self.to_string()
            }
            _ => self.to_string(),
        };

        let data = match &self {
            AppError::BiometricMismatch {
                confidence: Some(c),
            } => Some(serde_json::json!({ "confidence": c })),
            AppError::NotYourTurn { expected } => Some(serde_json::json!({ "expected": expected })),
            AppError::WalletSignatureMismatch { recovered } => Some(serde_json::json!({ "recovered": recovered })),
            _ => None,
        };

        (status, Json(ApiResponse::failure(self.code(), message, data))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn render(err: AppError) -> (StatusCode, serde_json::Value) {
        let resp = err.into_response();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn internal_details_are_hidden() {
        let (status, body) = render(AppError::Internal("db password=hunter2".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "INTERNAL");
        assert!(!body["error"]["message"].as_str().unwrap().contains("hunter2"));
    }

    #[tokio::test]
    async fn mismatch_carries_confidence() {
        let (status, body) = render(AppError::BiometricMismatch {
            confidence: Some(0.5),
        })
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "BIOMETRIC_MISMATCH");
        assert_eq!(body["data"]["confidence"], 0.5);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            status_of(&AppError::NotYourTurn { expected: "x".into() }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(status_of(&AppError::AlreadySigned("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_of(&AppError::WalletSignatureMismatch { recovered: "0x1".into() }),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status_of(&AppError::InvalidJson("x".into())), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_of(&AppError::Upstream("x".into())), StatusCode::BAD_GATEWAY);
    }
}
