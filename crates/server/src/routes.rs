use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ingest_core::{format_hms, BatchScheduler, GenerationError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

/// Shared state for the axum handlers
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<BatchScheduler>,
    /// Held for the duration of a generation run; one run at a time.
    pub running: Arc<tokio::sync::Mutex<()>>,
}

impl AppState {
    pub fn new(scheduler: BatchScheduler) -> Self {
        Self {
            scheduler: Arc::new(scheduler),
            running: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default = "default_count")]
    pub count: u64,
}

fn default_count() -> u64 {
    20_000
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub message: String,
    pub duration: String,
    pub rate: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/patient/generate", post(generate_patients))
        .route("/api/patient/generate/progress", get(generation_progress))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn generate_patients(
    State(state): State<AppState>,
    request: Result<Json<GenerateRequest>, JsonRejection>,
) -> Response {
    // Negative or non-integer counts fail deserialization; answer them like range errors.
    let Json(request) = match request {
        Ok(request) => request,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid generation request: {}", rejection.body_text()),
            )
        }
    };

    let Ok(_running) = state.running.try_lock() else {
        return error_response(
            StatusCode::CONFLICT,
            "A generation job is already running".to_string(),
        );
    };

    info!("Generation requested for {} patients", request.count);
    match state.scheduler.run(request.count).await {
        Ok(report) => Json(GenerateResponse {
            message: format!("Successfully generated {} patients", report.total_records),
            duration: format_hms(report.duration_ms / 1000),
            rate: format!("{:.0} patients/sec", report.records_per_second),
        })
        .into_response(),
        Err(e @ GenerationError::Validation { .. }) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            error!("Error generating patients: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("An error occurred while generating patients: {}", e),
            )
        }
    }
}

async fn generation_progress(State(state): State<AppState>) -> Response {
    match state.scheduler.current_job() {
        Some(job) => Json(job.snapshot()).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            "No generation job has been started".to_string(),
        ),
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
