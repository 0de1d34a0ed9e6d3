// Summary Information - HTTP trigger
// Runs the pipeline on POST /api/invoke, one blocking worker per invocation

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use log::{error, info};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use summary_information::{lambda_handler, Config, InvocationResponse};

/// Shared application state
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/invoke - Run the summary pipeline
///
/// The body is an optional JSON event, passed through to the handler.
async fn invoke(State(state): State<AppState>, body: String) -> impl IntoResponse {
    let event: Option<serde_json::Value> = serde_json::from_str(&body).ok();
    let config = state.config.clone();

    let result = tokio::task::spawn_blocking(move || {
        lambda_handler(&config, event.as_ref(), None)
    })
    .await;

    match result {
        Ok(Ok(response)) => (StatusCode::OK, Json(response)).into_response(),
        Ok(Err(e)) => {
            error!("Summary run failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(InvocationResponse {
                    message: e.to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Summary worker panicked: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(InvocationResponse {
                    message: "Summary worker failed".to_string(),
                }),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let state = AppState {
        config: Arc::new(Config::from_env()),
    };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/invoke", post(invoke))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let addr = std::env::var("SUMMARY_SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("🚀 Summary trigger listening on http://{}", addr);
    info!("   POST /api/invoke to run the pipeline");

    axum::serve(listener, app).await?;
    Ok(())
}
