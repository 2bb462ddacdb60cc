use crate::app::credential_service::IssueRequest;
use crate::transport::http::auth::Caller;
use crate::transport::http::types::{json_body, ApiResponse, ApiResult, AppState, SignRequest};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;

#[utoipa::path(
    post,
    path = "/credentials",
    request_body = IssueRequest,
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Credential issued; notarization attempted", body = ApiResponse),
        (status = 403, description = "Caller is not an institution", body = ApiResponse),
        (status = 409, description = "Credential id already used", body = ApiResponse),
        (status = 422, description = "Invalid signers, fields or wallets", body = ApiResponse)
    )
)]
pub async fn issue_handler(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<IssueRequest>, JsonRejection>,
) -> ApiResult {
    let req = json_body(body)?;
    ApiResponse::ok(state.credentials.issue(&caller.account, req).await?)
}

#[utoipa::path(
    get,
    path = "/credentials",
    security(("bearer" = [])),
    responses((status = 200, description = "Credentials the caller issued, receives or signs", body = ApiResponse))
)]
pub async fn list_handler(State(state): State<AppState>, caller: Caller) -> ApiResult {
    ApiResponse::ok(state.credentials.list_for(&caller.account).await?)
}

#[utoipa::path(
    get,
    path = "/credentials/{id}",
    params(("id" = String, Path, description = "Credential id")),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Credential with signers and fields", body = ApiResponse),
        (status = 403, description = "Caller is not a party", body = ApiResponse),
        (status = 404, description = "Unknown credential", body = ApiResponse)
    )
)]
pub async fn get_handler(State(state): State<AppState>, caller: Caller, Path(id): Path<String>) -> ApiResult {
    ApiResponse::ok(state.credentials.get(&id, &caller.account).await?)
}

#[utoipa::path(
    get,
    path = "/credentials/{id}/status",
    params(("id" = String, Path, description = "Credential id")),
    security(("bearer" = [])),
    responses((status = 200, description = "Signers in order and signing progress", body = ApiResponse))
)]
pub async fn status_handler(State(state): State<AppState>, caller: Caller, Path(id): Path<String>) -> ApiResult {
    ApiResponse::ok(state.credentials.status(&id, &caller.account).await?)
}

#[utoipa::path(
    get,
    path = "/credentials/{id}/sign-message",
    params(("id" = String, Path, description = "Credential id")),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Text for the caller's wallet to personal_sign", body = ApiResponse),
        (status = 403, description = "Caller is not a signer", body = ApiResponse),
        (status = 404, description = "Unknown credential", body = ApiResponse)
    )
)]
pub async fn sign_message_handler(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult {
    ApiResponse::ok(state.credentials.signing_message(&id, &caller.account).await?)
}

#[utoipa::path(
    post,
    path = "/credentials/{id}/sign",
    params(("id" = String, Path, description = "Credential id")),
    request_body = SignRequest,
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Signature recorded", body = ApiResponse),
        (status = 401, description = "Biometric or wallet signature mismatch", body = ApiResponse),
        (status = 403, description = "Not a signer, not your turn, or not enrolled", body = ApiResponse),
        (status = 409, description = "Already signed or already completed", body = ApiResponse)
    )
)]
pub async fn sign_handler(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    body: Result<Json<SignRequest>, JsonRejection>,
) -> ApiResult {
    let req = json_body(body)?;
    ApiResponse::ok(
        state
            .credentials
            .sign(&id, &caller.account, &req.proof, &req.wallet_signature)
            .await?,
    )
}

#[utoipa::path(
    get,
    path = "/credentials/{id}/verify",
    params(("id" = String, Path, description = "Credential id")),
    responses(
        (status = 200, description = "Integrity and notarization report", body = ApiResponse),
        (status = 404, description = "Unknown credential", body = ApiResponse)
    )
)]
pub async fn verify_handler(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    ApiResponse::ok(state.credentials.verify(&id).await?)
}

#[utoipa::path(
    get,
    path = "/verify/{credential_hash}",
    params(("credential_hash" = String, Path, description = "0x-prefixed credential hash")),
    responses(
        (status = 200, description = "Integrity and notarization report", body = ApiResponse),
        (status = 404, description = "No credential has this hash", body = ApiResponse),
        (status = 422, description = "Not a 32-byte hex hash", body = ApiResponse)
    )
)]
pub async fn verify_hash_handler(State(state): State<AppState>, Path(hash): Path<String>) -> ApiResult {
    ApiResponse::ok(state.credentials.verify_hash(&hash).await?)
}

#[utoipa::path(
    post,
    path = "/credentials/{id}/notarize",
    params(("id" = String, Path, description = "Credential id")),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Notarization attempted", body = ApiResponse),
        (status = 403, description = "Caller is neither issuer nor admin", body = ApiResponse)
    )
)]
pub async fn notarize_handler(State(state): State<AppState>, caller: Caller, Path(id): Path<String>) -> ApiResult {
    ApiResponse::ok(state.credentials.renotarize(&id, &caller.account).await?)
}
