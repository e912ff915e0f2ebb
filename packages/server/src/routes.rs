//! HTTP surface: the processing trigger, the abort flag, and a health check.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use statute_pipeline::{
    DocumentId, DocumentStore, OpenAiOracle, PartId, Pipeline, PipelineConfig, PipelineError,
    PostgresStore, ProcessMode, ProcessReport, ProcessRequest,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub oracle: Arc<OpenAiOracle>,
    pub pipeline_config: PipelineConfig,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/documents/process", post(process_handler))
        .route("/documents/:id/abort", post(abort_handler))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}

/// Processing trigger request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    pub document_id: Uuid,

    /// Defaults to a full reprocess of all parts.
    #[serde(default)]
    pub mode: Option<ProcessMode>,

    /// Overrides `mode`; processes exactly one part.
    #[serde(default)]
    pub reprocess_part_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    success: bool,
    document_id: Uuid,
    parts_processed: usize,
    provisions_extracted: usize,
    rules_extracted: usize,
    processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    stopped: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parts_completed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    part_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_provisions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_rules: Option<usize>,
}

impl From<ProcessReport> for TriggerResponse {
    fn from(report: ProcessReport) -> Self {
        Self {
            success: true,
            document_id: report.document_id.0,
            parts_processed: report.parts_processed,
            provisions_extracted: report.provisions_extracted,
            rules_extracted: report.rules_extracted,
            processing_time_ms: report.processing_time_ms,
            stopped: report.stopped.then_some(true),
            parts_completed: report.parts_completed,
            part_id: report.part_id.map(|p| p.0),
            total_provisions: report.total_provisions,
            total_rules: report.total_rules,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (
        status,
        Json(ErrorResponse {
            success: false,
            error,
        }),
    )
        .into_response()
}

/// Trigger a full, resume, or single-part processing run.
pub async fn process_handler(
    Extension(state): Extension<AppState>,
    Json(request): Json<TriggerRequest>,
) -> Response {
    let pipeline = Pipeline::new(
        PostgresStore::new(state.db_pool.clone()),
        state.oracle.as_ref().clone(),
    )
    .with_config(state.pipeline_config.clone());

    let process_request = ProcessRequest {
        document_id: DocumentId(request.document_id),
        mode: request.mode.unwrap_or_default(),
        reprocess_part_id: request.reprocess_part_id.map(PartId),
    };

    match pipeline
        .process(&process_request, CancellationToken::new())
        .await
    {
        Ok(report) => (StatusCode::OK, Json(TriggerResponse::from(report))).into_response(),
        Err(err @ PipelineError::DocumentNotFound { .. })
        | Err(err @ PipelineError::PartNotFound { .. }) => {
            error_response(StatusCode::NOT_FOUND, err.to_string())
        }
        Err(err) => {
            tracing::error!(
                document_id = %request.document_id,
                error = %err,
                "Document processing failed"
            );
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

/// Raise the cooperative abort flag for an in-flight run.
///
/// The pipeline honors the flag at the next part boundary.
pub async fn abort_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
) -> Response {
    let store = PostgresStore::new(state.db_pool.clone());
    let document_id = DocumentId(id);

    match store.get_document(document_id).await {
        Ok(Some(_)) => match store.set_abort_requested(document_id, true).await {
            Ok(()) => (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({ "status": "abort requested" })),
            )
                .into_response(),
            Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        },
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("document not found: {id}")),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    database: DatabaseHealth,
    connection_pool: ConnectionPoolHealth,
}

#[derive(Serialize)]
pub struct DatabaseHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
pub struct ConnectionPoolHealth {
    size: u32,
    idle_connections: usize,
}

/// Health check endpoint
///
/// Returns 200 OK if the database is reachable, 503 otherwise.
pub async fn health_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let db_health = match tokio::time::timeout(
        std::time::Duration::from_secs(5),
        sqlx::query("SELECT 1").execute(&state.db_pool),
    )
    .await
    {
        Ok(Ok(_)) => DatabaseHealth {
            status: "ok".to_string(),
            error: None,
        },
        Ok(Err(e)) => DatabaseHealth {
            status: "error".to_string(),
            error: Some(format!("Query failed: {}", e)),
        },
        Err(_) => DatabaseHealth {
            status: "error".to_string(),
            error: Some("Query timeout (>5s)".to_string()),
        },
    };

    let pool_health = ConnectionPoolHealth {
        size: state.db_pool.size(),
        idle_connections: state.db_pool.num_idle(),
    };

    let is_healthy = db_health.status == "ok";
    let status_code = if is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if is_healthy { "healthy" } else { "unhealthy" }.to_string(),
            database: db_health,
            connection_pool: pool_health,
        }),
    )
}
