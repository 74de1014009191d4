pub mod response;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;

use crate::config::Config;
use crate::features::{self, imports::ImportTasks};
use crate::middleware;
use crate::store::CompanyStore;

pub use response::{ApiResponse, ErrorResponse};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CompanyStore>,
}

/// Create the application router with all routes and middleware
///
/// Commit-mode jobs are spawned on `tasks`; drain it on shutdown.
pub fn create_router(
    store: Arc<dyn CompanyStore>,
    config: &Config,
    tasks: ImportTasks,
) -> Router {
    let feature_state = features::FeatureState {
        store: store.clone(),
        import: Arc::new(config.import.clone()),
        tasks,
    };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .with_state(AppState { store })
        .nest("/api/v1", features::router(feature_state))
        // Each layer wraps the ones added before it; CORS ends up outermost
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "bizreg",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// Health check handler
async fn health_check(State(state): State<AppState>) -> Result<Response, StatusCode> {
    match state.store.health_check().await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "store": state.store.backend()
            })),
        )
            .into_response()),
        Err(e) => {
            tracing::error!("Store health check failed: {:?}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        },
    }
}
