use crate::app::account_service::{BiometricCheck, BiometricStatus, LoginRequest, LoginResponse, SignupRequest};
use crate::app::credential_service::{
    CredentialStatusView, CredentialView, IssueRequest, SignResponse, SigningMessage, VerificationReport,
};
use crate::domain::account::{AccountView, BiometricKind, Role};
use crate::domain::biometric::BiometricProof;
use crate::domain::credential::{
    CredentialStatus, FieldSpec, Notarization, NotarizationState, Progress, SignatureField, Signer, SignerSpec,
    SigningMode,
};
use crate::domain::notarization::ChainStatus;
use crate::storage::StoredDocument;
use crate::transport::http::auth::auth_middleware;
use crate::transport::http::handlers::{accounts, biometric, credentials, health, institution};
use crate::transport::http::types::{
    ApiError, ApiResponse, AppState, FaceEnrollRequest, FingerprintEnrollRequest, HealthResponse, SignRequest,
    VerifyFaceRequest, WalletRequest, WalletResponse,
};
use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// Room for multipart framing and JSON-encoded images on top of the document limit.
const BODY_OVERHEAD_BYTES: usize = 64 * 1024;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some("Session token returned by POST /login"))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::healthcheck_handler,
        accounts::signup_handler,
        accounts::login_handler,
        accounts::logout_handler,
        accounts::me_handler,
        accounts::wallet_handler,
        biometric::status_handler,
        biometric::enroll_face_handler,
        biometric::enroll_fingerprint_handler,
        biometric::verify_face_handler,
        institution::students_handler,
        institution::upload_handler,
        credentials::issue_handler,
        credentials::list_handler,
        credentials::get_handler,
        credentials::status_handler,
        credentials::sign_message_handler,
        credentials::sign_handler,
        credentials::verify_handler,
        credentials::verify_hash_handler,
        credentials::notarize_handler
    ),
    components(schemas(
        ApiResponse,
        ApiError,
        HealthResponse,
        SignupRequest,
        LoginRequest,
        LoginResponse,
        AccountView,
        Role,
        WalletRequest,
        WalletResponse,
        BiometricKind,
        BiometricStatus,
        BiometricCheck,
        BiometricProof,
        FaceEnrollRequest,
        FingerprintEnrollRequest,
        VerifyFaceRequest,
        StoredDocument,
        IssueRequest,
        SignerSpec,
        FieldSpec,
        SigningMode,
        CredentialStatus,
        Signer,
        SignatureField,
        Notarization,
        NotarizationState,
        Progress,
        CredentialView,
        CredentialStatusView,
        SigningMessage,
        SignRequest,
        SignResponse,
        VerificationReport,
        ChainStatus
    )),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

pub fn create_router(app_state: AppState) -> Router {
    let body_limit = app_state.credentials.max_upload_bytes() + BODY_OVERHEAD_BYTES;

    let protected = Router::new()
        .route("/logout", post(accounts::logout_handler))
        .route("/me", get(accounts::me_handler))
        .route("/wallet", post(accounts::wallet_handler))
        .route("/biometric/status/:email", get(biometric::status_handler))
        .route("/biometric/face", post(biometric::enroll_face_handler))
        .route("/biometric/fingerprint", post(biometric::enroll_fingerprint_handler))
        .route("/biometric/verify-face", post(biometric::verify_face_handler))
        .route("/institution/students", get(institution::students_handler))
        .route("/institution/upload", post(institution::upload_handler))
        .route(
            "/credentials",
            post(credentials::issue_handler).get(credentials::list_handler),
        )
        .route("/credentials/:id", get(credentials::get_handler))
        .route("/credentials/:id/status", get(credentials::status_handler))
        .route("/credentials/:id/sign-message", get(credentials::sign_message_handler))
        .route("/credentials/:id/sign", post(credentials::sign_handler))
        .route("/credentials/:id/notarize", post(credentials::notarize_handler))
        .route_layer(from_fn_with_state(app_state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health::healthcheck_handler))
        .route("/signup", post(accounts::signup_handler))
        .route("/login", post(accounts::login_handler))
        .route("/credentials/:id/verify", get(credentials::verify_handler))
        .route("/verify/:credential_hash", get(credentials::verify_hash_handler))
        .merge(protected)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(app_state)
}
