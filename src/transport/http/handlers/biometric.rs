use crate::transport::http::auth::Caller;
use crate::transport::http::types::{
    json_body, ApiResponse, ApiResult, AppState, FaceEnrollRequest, FingerprintEnrollRequest, VerifyFaceRequest,
};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;

#[utoipa::path(
    get,
    path = "/biometric/status/{email}",
    params(("email" = String, Path, description = "Account email")),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Enrolment status", body = ApiResponse),
        (status = 403, description = "Not allowed to view this account", body = ApiResponse),
        (status = 404, description = "No such account", body = ApiResponse)
    )
)]
pub async fn status_handler(State(state): State<AppState>, caller: Caller, Path(email): Path<String>) -> ApiResult {
    ApiResponse::ok(state.accounts.biometric_status(&caller.account, &email).await?)
}

#[utoipa::path(
    post,
    path = "/biometric/face",
    request_body = FaceEnrollRequest,
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Face enrolled", body = ApiResponse),
        (status = 400, description = "No face detected", body = ApiResponse),
        (status = 502, description = "Face service error", body = ApiResponse),
        (status = 503, description = "Face service not configured", body = ApiResponse)
    )
)]
pub async fn enroll_face_handler(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<FaceEnrollRequest>, JsonRejection>,
) -> ApiResult {
    let req = json_body(body)?;
    ApiResponse::ok(state.accounts.enroll_face(&caller.account, &req.image).await?)
}

#[utoipa::path(
    post,
    path = "/biometric/fingerprint",
    request_body = FingerprintEnrollRequest,
    security(("bearer" = [])),
    responses((status = 200, description = "Fingerprint enrolled", body = ApiResponse))
)]
pub async fn enroll_fingerprint_handler(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<FingerprintEnrollRequest>, JsonRejection>,
) -> ApiResult {
    let req = json_body(body)?;
    ApiResponse::ok(
        state
            .accounts
            .enroll_fingerprint(&caller.account, &req.credential_id)
            .await?,
    )
}

#[utoipa::path(
    post,
    path = "/biometric/verify-face",
    request_body = VerifyFaceRequest,
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Face matches the enrolment", body = ApiResponse),
        (status = 401, description = "Face does not match", body = ApiResponse),
        (status = 403, description = "Not enrolled, or not a signer of the credential", body = ApiResponse)
    )
)]
pub async fn verify_face_handler(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<VerifyFaceRequest>, JsonRejection>,
) -> ApiResult {
    let req = json_body(body)?;
    ApiResponse::ok(
        state
            .credentials
            .verify_face_for_credential(&caller.account, &req.credential_id, &req.image)
            .await?,
    )
}
