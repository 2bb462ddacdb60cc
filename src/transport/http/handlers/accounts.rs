use crate::app::account_service::{LoginRequest, SignupRequest};
use crate::domain::account::AccountView;
use crate::transport::http::auth::Caller;
use crate::transport::http::types::{json_body, ApiResponse, ApiResult, AppState, WalletRequest, WalletResponse};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

#[utoipa::path(
    post,
    path = "/signup",
    request_body = SignupRequest,
    responses(
        (status = 200, description = "Account created", body = ApiResponse),
        (status = 403, description = "Role cannot be self-assigned", body = ApiResponse),
        (status = 409, description = "Email or wallet already registered", body = ApiResponse),
        (status = 422, description = "Invalid input", body = ApiResponse)
    )
)]
pub async fn signup_handler(
    State(state): State<AppState>,
    body: Result<Json<SignupRequest>, JsonRejection>,
) -> ApiResult {
    let req = json_body(body)?;
    ApiResponse::ok(state.accounts.signup(req).await?)
}

#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session token issued", body = ApiResponse),
        (status = 401, description = "Invalid email or password", body = ApiResponse)
    )
)]
pub async fn login_handler(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult {
    let req = json_body(body)?;
    ApiResponse::ok(state.accounts.login(req).await?)
}

#[utoipa::path(
    post,
    path = "/logout",
    security(("bearer" = [])),
    responses((status = 200, description = "Session revoked", body = ApiResponse))
)]
pub async fn logout_handler(State(state): State<AppState>, caller: Caller) -> ApiResult {
    state.accounts.logout(&caller.token).await?;
    ApiResponse::ok(serde_json::json!({ "logged_out": true }))
}

#[utoipa::path(
    get,
    path = "/me",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "The authenticated account", body = ApiResponse),
        (status = 401, description = "Missing or invalid session", body = ApiResponse)
    )
)]
pub async fn me_handler(caller: Caller) -> ApiResult {
    ApiResponse::ok(AccountView::from(&caller.account))
}

#[utoipa::path(
    post,
    path = "/wallet",
    request_body = WalletRequest,
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Wallet address of the account", body = ApiResponse),
        (status = 404, description = "No such account", body = ApiResponse)
    )
)]
pub async fn wallet_handler(
    State(state): State<AppState>,
    _caller: Caller,
    body: Result<Json<WalletRequest>, JsonRejection>,
) -> ApiResult {
    let req = json_body(body)?;
    let wallet = state.accounts.wallet_of(&req.email).await?;
    ApiResponse::ok(WalletResponse {
        email: req.email.trim().to_lowercase(),
        wallet_address: wallet.to_string(),
    })
}
