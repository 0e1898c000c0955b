//! LedgerLens: bank-statement analysis backend.
//!
//! PDF upload → wave-orchestrated agents (layout, tampering, extraction,
//! fraud, insights) → per-statement and cross-statement results over HTTP.

use anyhow::{Context, Result};
use axum::{
    http::HeaderValue,
    middleware as axum_mw,
    routing::{get, post},
    Json, Router,
};
use ledgerlens_backend::{
    api::{analysis, documents, AppState},
    auth::{api as auth_api, auth_middleware, AuthState, JwtHandler, UserStore},
    llm::ModelClient,
    middleware::logging::request_logging,
    models::Config,
    orchestrator::Orchestrator,
    store::AnalysisStore,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    std::fs::create_dir_all(&config.upload_dir).context("create upload dir")?;

    let store = AnalysisStore::new(&config.database_path)?;
    let user_store = Arc::new(UserStore::new(&config.database_path)?);
    let jwt_handler = Arc::new(JwtHandler::new(
        config.jwt_secret.clone(),
        config.jwt_expiry_hours,
    ));

    let http_client = reqwest::Client::new();
    let model = ModelClient::from_config(http_client.clone(), &config);
    if model.is_enabled() {
        info!("🤖 Model service configured (deployment: {})", config.model_deployment);
    } else {
        warn!("⚠️  Model service not configured — narrative/vision features degrade to fallbacks");
    }

    let orchestrator = Orchestrator::new(store.clone(), model.clone(), config.clone());
    let app_state = AppState {
        store: store.clone(),
        orchestrator,
        config: config.clone(),
    };
    let auth_state = AuthState::new(user_store, jwt_handler.clone());

    // Public auth routes
    let auth_router = Router::new()
        .route("/api/auth/register", post(auth_api::register))
        .route("/api/auth/login", post(auth_api::login))
        .with_state(auth_state.clone());

    // Profile route behind the JWT middleware
    let me_router = Router::new()
        .route("/api/auth/me", get(auth_api::me))
        .route_layer(axum_mw::from_fn_with_state(jwt_handler.clone(), auth_middleware))
        .with_state(auth_state);

    // Protected API routes
    let protected_routes = Router::new()
        .route("/api/upload", post(documents::upload_documents))
        .route("/api/documents", get(documents::list_documents))
        .route(
            "/api/documents/:document_id",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route("/api/groups", get(documents::list_groups))
        .route("/api/analyze/:document_id", post(analysis::analyze_document))
        .route("/api/analyze/group/:group_id", post(analysis::analyze_group))
        .route("/api/status/group/:group_id", get(analysis::get_group_status))
        .route("/api/results/group/:group_id", get(analysis::get_group_results))
        .route("/api/results/:document_id", get(analysis::get_results))
        .route(
            "/api/results/:document_id/:agent_type",
            get(analysis::get_agent_result),
        )
        .route("/api/transactions/:document_id", get(analysis::get_transactions))
        .route("/api/metrics/group/:group_id", get(analysis::get_group_metrics))
        .route("/api/metrics/:document_id", get(analysis::get_metrics))
        .route_layer(axum_mw::from_fn_with_state(jwt_handler.clone(), auth_middleware))
        .with_state(app_state.clone());

    // Public routes (health check)
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .with_state(app_state);

    let cors = build_cors(&config);
    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(auth_router)
        .merge(me_router)
        .layer(cors)
        .layer(axum_mw::from_fn(request_logging));

    info!("🔍 Request logging middleware enabled");

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("🎯 API server listening on {addr}");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

fn build_cors(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    if origins.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok", "service": "ledgerlens"}))
}
