use crate::app::AppError;
use crate::transport::http::auth::Caller;
use crate::transport::http::types::{ApiResponse, ApiResult, AppState};
use axum::extract::{Multipart, State};

/// Multipart field carrying the certificate file.
pub const UPLOAD_FIELD: &str = "certificate";

#[utoipa::path(
    get,
    path = "/institution/students",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Registered students", body = ApiResponse),
        (status = 403, description = "Caller is not an institution", body = ApiResponse)
    )
)]
pub async fn students_handler(State(state): State<AppState>, caller: Caller) -> ApiResult {
    ApiResponse::ok(state.accounts.list_students(&caller.account).await?)
}

#[utoipa::path(
    post,
    path = "/institution/upload",
    request_body(content_type = "multipart/form-data", description = "Field `certificate`: PDF, PNG or JPEG"),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Document stored", body = ApiResponse),
        (status = 413, description = "Document too large", body = ApiResponse),
        (status = 422, description = "Missing field or unsupported type", body = ApiResponse)
    )
)]
pub async fn upload_handler(State(state): State<AppState>, caller: Caller, mut multipart: Multipart) -> ApiResult {
    caller.require_issuer()?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("malformed multipart body: {}", e.body_text())))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await.map_err(|e| {
            if e.status() == axum::http::StatusCode::PAYLOAD_TOO_LARGE {
                AppError::PayloadTooLarge(format!(
                    "document exceeds {} bytes",
                    state.credentials.max_upload_bytes()
                ))
            } else {
                AppError::BadRequest(format!("failed to read upload: {}", e.body_text()))
            }
        })?;
        let stored = state
            .credentials
            .upload_document(&caller.account, &bytes, file_name.as_deref())
            .await?;
        return ApiResponse::ok(stored);
    }

    Err(AppError::Validation(format!(
        "multipart field '{}' is required",
        UPLOAD_FIELD
    )))
}
