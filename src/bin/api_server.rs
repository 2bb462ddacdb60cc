// src/bin/api_server.rs

use anyhow::Context;
use axum::http::HeaderValue;
use signchain::crypto::TemplateSealer;
use signchain::domain::notarization::{Notary, NotarizationWorker};
use signchain::infra::config::Config;
use signchain::infra::ethereum::{EvmNotary, MockNotary};
use signchain::infra::face::{DisabledFaceEmbedder, FaceEmbedder, HttpFaceEmbedder};
use signchain::infra::telemetry;
use signchain::storage::{DocumentStore, MemoryStore, PostgresStore, Store};
use signchain::transport;
use signchain::{AccountService, CredentialService};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    telemetry::init(config.log_json);
    tracing::info!(?config, "configuration loaded");

    // --- Store ---
    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let pg = PostgresStore::connect(url, config.db_max_connections)
                .await
                .context("failed to connect to Postgres")?;
            tracing::info!("using Postgres store");
            Arc::new(pg)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store (data is lost on restart)");
            Arc::new(MemoryStore::new())
        }
    };

    // --- Notary ---
    let notary: Arc<dyn Notary> = match &config.chain {
        Some(chain) => Arc::new(EvmNotary::new(chain).context("failed to build Ethereum notary")?),
        None => {
            tracing::warn!("ETH_RPC_URL not set; using in-process mock notary");
            Arc::new(MockNotary::new())
        }
    };

    // --- Face service ---
    let face: Arc<dyn FaceEmbedder> = match &config.face_service {
        Some(face_cfg) => {
            let embedder = HttpFaceEmbedder::new(face_cfg).context("failed to build face service client")?;
            tracing::info!(endpoint = embedder.endpoint(), "face service configured");
            Arc::new(embedder)
        }
        None => {
            tracing::warn!("FACE_SERVICE_URL not set; face enrollment and verification are disabled");
            Arc::new(DisabledFaceEmbedder)
        }
    };

    // --- Services ---
    let accounts = Arc::new(AccountService::new(
        store.clone(),
        face,
        TemplateSealer::new(&config.biometric_secret),
        config.face_match_threshold,
        config.session_ttl,
    ));

    tokio::fs::create_dir_all(&config.document_dir)
        .await
        .with_context(|| format!("failed to create document dir {}", config.document_dir.display()))?;
    let documents = DocumentStore::new(config.document_dir.clone(), config.max_upload_bytes);

    let worker = Arc::new(NotarizationWorker::new(
        store.clone(),
        notary.clone(),
        config.notary_retry_interval,
        config.notary_max_attempts,
    ));
    let worker_handle = worker.clone().start();
    // Pick up anything left unsettled by a previous run.
    worker.trigger();

    let credentials = Arc::new(CredentialService::new(
        store.clone(),
        accounts.clone(),
        documents,
        worker.clone(),
        config.explorer_tx_url.clone(),
    ));

    let app_state = transport::http::AppState {
        store,
        accounts,
        credentials,
        notary: notary.name().to_string(),
    };

    // --- API Server ---
    let cors = if config.cors_origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins = config
            .cors_origins
            .iter()
            .map(|o| o.parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()
            .context("CORS_ORIGINS contains an invalid origin")?;
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    }
    .allow_methods(Any)
    .allow_headers(Any);

    let app = transport::http::create_router(app_state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", transport::http::ApiDoc::openapi()))
        .layer(cors)
        .layer(telemetry::http_trace_layer());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "API server listening; Swagger UI at /swagger-ui");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown signal received");
        })
        .await?;

    worker.shutdown();
    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "notarization worker task failed");
    }
    tracing::info!("graceful shutdown complete");
    Ok(())
}
