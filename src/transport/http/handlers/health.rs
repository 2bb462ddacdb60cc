use crate::transport::http::types::{ApiResponse, AppState, HealthResponse};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy (store reachable)", body = ApiResponse),
        (status = 503, description = "Service is unhealthy (store unreachable)", body = ApiResponse)
    )
)]
pub async fn healthcheck_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                data: serde_json::to_value(HealthResponse {
                    status: "ok".to_string(),
                    notary: state.notary.clone(),
                })
                .ok(),
                error: None,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::failure(
                    "UNAVAILABLE",
                    "store unreachable".to_string(),
                    Some(serde_json::json!({ "status": "unhealthy" })),
                )),
            )
                .into_response()
        }
    }
}
