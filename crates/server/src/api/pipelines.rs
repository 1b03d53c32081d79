//! Pipeline API handlers.

use alembic_core::{CrucibleSummary, PipelineDefinition, PipelineHandle, PipelineStatus};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response for listing pipelines
#[derive(Debug, Serialize, Deserialize)]
pub struct ListPipelinesResponse {
    pub pipelines: Vec<PipelineStatus>,
    pub summary: CrucibleSummary,
}

/// Response for a newly started pipeline
#[derive(Debug, Serialize, Deserialize)]
pub struct StartPipelineResponse {
    pub id: PipelineHandle,
    pub name: String,
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct PipelineErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<PipelineErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(PipelineErrorResponse {
            error: error.into(),
        }),
    )
}

fn parse_handle(id: &str) -> Result<PipelineHandle, ApiError> {
    id.parse()
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, format!("Invalid pipeline id: {}", id)))
}

// ============================================================================
// Handlers
// ============================================================================

/// List every registered pipeline
pub async fn list_pipelines(State(state): State<Arc<AppState>>) -> Json<ListPipelinesResponse> {
    let crucible = state.crucible();
    Json(ListPipelinesResponse {
        pipelines: crucible.status(),
        summary: crucible.summary(),
    })
}

/// Get a pipeline by ID
pub async fn get_pipeline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PipelineStatus>, ApiError> {
    let handle = parse_handle(&id)?;
    state
        .crucible()
        .status_of(handle)
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Pipeline not found: {}", id)))
}

/// Start a pipeline from a definition
pub async fn create_pipeline(
    State(state): State<Arc<AppState>>,
    Json(definition): Json<PipelineDefinition>,
) -> Result<(StatusCode, Json<StartPipelineResponse>), ApiError> {
    let crucible = state.crucible();
    match crucible.start(definition) {
        Ok(handle) => {
            let name = crucible
                .status_of(handle)
                .map(|status| status.name)
                .unwrap_or_default();
            Ok((
                StatusCode::CREATED,
                Json(StartPipelineResponse { id: handle, name }),
            ))
        }
        Err(e) if e.is_config() => Err(api_error(StatusCode::BAD_REQUEST, e.to_string())),
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// Cancel a running pipeline
pub async fn cancel_pipeline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<PipelineStatus>), ApiError> {
    let handle = parse_handle(&id)?;
    let crucible = state.crucible();

    let status = crucible
        .status_of(handle)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Pipeline not found: {}", id)))?;

    if !crucible.cancel(handle) {
        return Err(api_error(
            StatusCode::CONFLICT,
            format!("Pipeline already {}", status.state.as_str()),
        ));
    }

    Ok((StatusCode::ACCEPTED, Json(status)))
}
