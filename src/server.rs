//! JSON HTTP server.
//!
//! Exposes the resolver's boundary operations over HTTP. Every handler is a
//! thin wrapper around [`NlqService`]; the service is shared by `Arc` and
//! requests run concurrently.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version and alias count) |
//! | `POST` | `/filters` | Compile a query into filters and diagnostics |
//! | `POST` | `/plan` | Compile and plan without touching the store |
//! | `POST` | `/run` | Full pipeline, degraded mode on store failure |
//! | `GET`  | `/suggest?q=&limit=` | Alias completions |
//! | `POST` | `/aliases/reload` | Rebuild the alias index from disk |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "store_unavailable", "message": "store unavailable after 3 attempts: ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `cancelled` (408), `store_rejected` (502),
//! `store_unavailable` (503), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use disclosure_nlq_core::models::{Diagnostics, FilterConfig};

use crate::config::Config;
use crate::executor::ExecutionError;
use crate::pipeline::{CompileRequest, NlqService, RunOptions, RunResult};

/// Starts the HTTP server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config, bind: Option<&str>) -> anyhow::Result<()> {
    let bind_addr = bind.map(str::to_string).unwrap_or_else(|| config.server.bind.clone());
    let service = Arc::new(NlqService::open(config.clone()).await?);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "nlq server listening");
    axum::serve(listener, router(service)).await?;

    Ok(())
}

/// Builds the router over a shared service.
pub fn router(service: Arc<NlqService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/filters", post(handle_filters))
        .route("/plan", post(handle_plan))
        .route("/run", post(handle_run))
        .route("/suggest", get(handle_suggest))
        .route("/aliases/reload", post(handle_reload))
        .layer(cors)
        .with_state(service)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<ExecutionError> for AppError {
    fn from(err: ExecutionError) -> Self {
        let (status, code) = match &err {
            ExecutionError::StoreUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
            }
            ExecutionError::Rejected(_) => (StatusCode::BAD_GATEWAY, "store_rejected"),
            ExecutionError::Cancelled => (StatusCode::REQUEST_TIMEOUT, "cancelled"),
            ExecutionError::InvalidPlan(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    aliases: usize,
}

async fn handle_health(State(service): State<Arc<NlqService>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        aliases: service.alias_count(),
    })
}

// ============ POST /filters ============

#[derive(Deserialize)]
struct FiltersRequest {
    query: String,
    #[serde(flatten)]
    options: CompileRequest,
}

#[derive(Serialize)]
struct FiltersResponse {
    filters: FilterConfig,
    diagnostics: Diagnostics,
}

/// Never touches the store; always succeeds for a well-formed body.
async fn handle_filters(
    State(service): State<Arc<NlqService>>,
    Json(req): Json<FiltersRequest>,
) -> Json<FiltersResponse> {
    let compilation = service
        .compile_filters(&req.query, &req.options, &CancellationToken::new())
        .await;
    Json(FiltersResponse {
        filters: compilation.filters,
        diagnostics: compilation.diagnostics,
    })
}

// ============ POST /plan, POST /run ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunRequest {
    query: String,
    /// Serve the static dataset when the store is unavailable.
    #[serde(default = "default_fallback")]
    fallback: bool,
    #[serde(flatten)]
    options: RunOptions,
}

fn default_fallback() -> bool {
    true
}

async fn handle_plan(
    State(service): State<Arc<NlqService>>,
    Json(req): Json<RunRequest>,
) -> Result<Json<RunResult>, AppError> {
    let result = service
        .plan(&req.query, &req.options, &CancellationToken::new())
        .await?;
    Ok(Json(result))
}

/// Dropping the request (client disconnect) drops the future, which aborts
/// the in-flight store call along with it.
async fn handle_run(
    State(service): State<Arc<NlqService>>,
    Json(req): Json<RunRequest>,
) -> Result<Json<RunResult>, AppError> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let schema = service.config().table.clone();
    let result = if req.fallback {
        service
            .run_query_or_fallback(&req.query, &schema, &req.options, &cancel)
            .await?
    } else {
        service.run_query(&req.query, &schema, &req.options, &cancel).await?
    };
    Ok(Json(result))
}

// ============ GET /suggest ============

#[derive(Deserialize)]
struct SuggestParams {
    q: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
struct SuggestResponse {
    suggestions: Vec<String>,
}

async fn handle_suggest(
    State(service): State<Arc<NlqService>>,
    Query(params): Query<SuggestParams>,
) -> Result<Json<SuggestResponse>, AppError> {
    if params.limit == Some(0) {
        return Err(bad_request("limit must be at least 1"));
    }
    Ok(Json(SuggestResponse {
        suggestions: service.suggest(&params.q, params.limit),
    }))
}

// ============ POST /aliases/reload ============

#[derive(Serialize)]
struct ReloadResponse {
    aliases: usize,
}

async fn handle_reload(
    State(service): State<Arc<NlqService>>,
) -> Result<Json<ReloadResponse>, AppError> {
    let aliases = service
        .reload_aliases()
        .map_err(|e| internal(format!("alias reload failed: {:#}", e)))?;
    Ok(Json(ReloadResponse { aliases }))
}
