//! HTTP surface for the dispatch engine
//!
//! Collection and lifecycle routes over the engine. Success is 200 with a
//! JSON body (204 for deletes); failures map to non-2xx with a plain message
//! body.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use drover_shared::dispatch::{Mission, MissionDraft, RoverStatus, Task, Zone, ZoneDraft};
use drover_shared::tasking::TaskStatus;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::engine::EngineError;
use crate::state::AppState;
use crate::store::TaskFilter;

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::UnknownZone
            | EngineError::UnknownMission
            | EngineError::UnknownTask
            | EngineError::NoTaskInFlight => StatusCode::NOT_FOUND,
            EngineError::MissionDisabled | EngineError::Transition(_) => StatusCode::CONFLICT,
            EngineError::NotBound(_) => StatusCode::FORBIDDEN,
        };
        (status, self.to_string()).into_response()
    }
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// Zones

pub async fn list_zones(State(state): State<AppState>) -> Json<Vec<Zone>> {
    Json(state.engine.store().list_zones().await)
}

pub async fn create_zone(
    State(state): State<AppState>,
    Json(draft): Json<ZoneDraft>,
) -> Json<Zone> {
    Json(state.engine.create_zone(draft).await)
}

pub async fn update_zone(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(draft): Json<ZoneDraft>,
) -> Result<Json<Zone>, EngineError> {
    Ok(Json(state.engine.update_zone(id, draft).await?))
}

pub async fn delete_zone(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, EngineError> {
    state.engine.delete_zone(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Missions

pub async fn list_missions(State(state): State<AppState>) -> Json<Vec<Mission>> {
    Json(state.engine.store().list_missions().await)
}

pub async fn create_mission(
    State(state): State<AppState>,
    Json(draft): Json<MissionDraft>,
) -> Result<Json<Mission>, EngineError> {
    Ok(Json(state.engine.create_mission(draft).await?))
}

pub async fn update_mission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(draft): Json<MissionDraft>,
) -> Result<Json<Mission>, EngineError> {
    Ok(Json(state.engine.update_mission(id, draft).await?))
}

pub async fn delete_mission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, EngineError> {
    state.engine.delete_mission(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn start_mission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, EngineError> {
    Ok(Json(state.engine.start_mission(id).await?))
}

pub async fn stop_mission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, EngineError> {
    Ok(Json(state.engine.stop_mission(id).await?))
}

// Tasks

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQuery {
    pub status: Option<TaskStatus>,
    pub rover_id: Option<String>,
    pub mission_id: Option<Uuid>,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskQuery>,
) -> Json<Vec<Task>> {
    let filter = TaskFilter {
        status: query.status,
        rover_id: query.rover_id,
        mission_id: query.mission_id,
    };
    Json(state.engine.store().list_tasks(&filter).await)
}

pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, EngineError> {
    Ok(Json(state.engine.cancel_task(id).await?))
}

// Rovers

pub async fn list_rovers(State(state): State<AppState>) -> Json<Vec<RoverStatus>> {
    Json(state.engine.registry().connected().await)
}
