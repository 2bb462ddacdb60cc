use crate::app::{AccountService, AppError, CredentialService};
use crate::domain::biometric::BiometricProof;
use crate::storage::Store;
use axum::extract::rejection::JsonRejection;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub accounts: Arc<AccountService>,
    pub credentials: Arc<CredentialService>,
    /// Name of the active notary backend, reported by `/health`.
    pub notary: String,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct ApiError {
    /// Stable machine-readable code, e.g. `NOT_YOUR_TURN`.
    pub code: String,
    pub message: String,
}

/// Envelope for every response.
#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub data: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl ApiResponse {
    pub fn ok<T: Serialize>(data: T) -> Result<Json<ApiResponse>, AppError> {
        let data = serde_json::to_value(data).map_err(|e| AppError::Internal(format!("serialize response: {}", e)))?;
        Ok(Json(ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }))
    }

    pub fn failure(code: &str, message: String, data: Option<JsonValue>) -> ApiResponse {
        ApiResponse {
            success: false,
            data,
            error: Some(ApiError {
                code: code.to_string(),
                message,
            }),
        }
    }
}

/// Handler result: the success envelope or an [`AppError`] rendered as one.
pub type ApiResult = Result<Json<ApiResponse>, AppError>;

/// Unwraps a JSON body, turning extractor rejections into `INVALID_JSON`.
pub fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(v)| v).map_err(|e| AppError::InvalidJson(e.body_text()))
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct WalletRequest {
    pub email: String,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct WalletResponse {
    pub email: String,
    pub wallet_address: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct FaceEnrollRequest {
    /// Base64 image or `data:image/...;base64,` URL.
    pub image: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct FingerprintEnrollRequest {
    /// Authenticator credential id from the browser.
    pub credential_id: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct VerifyFaceRequest {
    /// The credential the caller is about to sign.
    pub credential_id: String,
    pub image: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct SignRequest {
    pub proof: BiometricProof,
    /// `personal_sign` of the text from `GET /credentials/{id}/sign-message`, hex `r || s || v`.
    pub wallet_signature: String,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub notary: String,
}
