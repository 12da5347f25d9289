//! REST API handlers

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use curio_core::{LightMode, LightingChange, SceneError, SelectionOutcome, SessionId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::state::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

fn status_for(error: &SceneError) -> StatusCode {
    match error {
        SceneError::UnsupportedFormat { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        SceneError::UnknownAsset(_) => StatusCode::NOT_FOUND,
        SceneError::CapabilityUnsupported
        | SceneError::NotRequested
        | SceneError::NoActiveAsset
        | SceneError::SessionBusy => StatusCode::CONFLICT,
        SceneError::SessionRequestFailed(_)
        | SceneError::MetadataUnavailable(_)
        | SceneError::NarrationBackendFailure(_)
        | SceneError::Store(_) => StatusCode::BAD_GATEWAY,
        SceneError::SceneClosed => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn scene_error(error: SceneError) -> Response {
    debug!(error = %error, "Request rejected");
    (status_for(&error), Json(ApiError::new(error.to_string()))).into_response()
}

/// Current view state
pub async fn get_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.scene.snapshot().await {
        Ok(view) => Json(view).into_response(),
        Err(e) => scene_error(e),
    }
}

/// Remote model library
pub async fn get_library(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.scene.snapshot().await {
        Ok(view) => Json(view.library).into_response(),
        Err(e) => scene_error(e),
    }
}

pub async fn refresh_library(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("Library refresh requested");
    match state.scene.refresh_library().await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"status": "refreshing"})),
        )
            .into_response(),
        Err(e) => scene_error(e),
    }
}

pub async fn refresh_metadata(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("Metadata refresh requested");
    match state.scene.refresh_metadata().await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"status": "refreshing"})),
        )
            .into_response(),
        Err(e) => scene_error(e),
    }
}

#[derive(Deserialize)]
pub struct UploadQuery {
    name: String,
}

/// Upload a local model; the raw body is the file content
pub async fn upload(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> impl IntoResponse {
    info!(file = %query.name, bytes = body.len(), "Model upload");
    match state.scene.upload(query.name, body.to_vec()).await {
        Ok(asset) => Json(asset).into_response(),
        Err(e) => scene_error(e),
    }
}

#[derive(Deserialize)]
pub struct SelectRequest {
    name: String,
}

/// Pick a model from the remote library
pub async fn select(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SelectRequest>,
) -> impl IntoResponse {
    match state.scene.select(req.name).await {
        Ok(outcome) => {
            let outcome = match outcome {
                SelectionOutcome::Applied => "applied",
                SelectionOutcome::Superseded => "superseded",
            };
            Json(serde_json::json!({"outcome": outcome})).into_response()
        }
        Err(e) => scene_error(e),
    }
}

/// View in AR
pub async fn view_in_ar(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.scene.view_in_ar().await {
        Ok(session) => Json(serde_json::json!({"session": session})).into_response(),
        Err(e) => scene_error(e),
    }
}

/// Read Aloud button
pub async fn toggle_narration(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.scene.read_aloud().await {
        Ok(narration) => Json(narration).into_response(),
        Err(e) => scene_error(e),
    }
}

#[derive(Deserialize, Default)]
pub struct FinishedRequest {
    #[serde(default)]
    text: Option<String>,
}

/// Client finished speaking an utterance
pub async fn narration_finished(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FinishedRequest>,
) -> impl IntoResponse {
    match state.scene.narration_finished(req.text).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => scene_error(e),
    }
}

#[derive(Deserialize)]
pub struct AmbientRequest {
    intensity: f32,
}

#[derive(Deserialize)]
pub struct DirectionalRequest {
    position: [f32; 3],
    intensity: f32,
}

#[derive(Deserialize)]
pub struct SpotRequest {
    position: [f32; 3],
    intensity: f32,
    angle: f32,
}

#[derive(Deserialize)]
pub struct ModeRequest {
    mode: LightMode,
}

async fn adjust(state: &AppState, change: LightingChange) -> Response {
    match state.scene.adjust_lighting(change).await {
        Ok(lighting) => Json(lighting).into_response(),
        Err(e) => scene_error(e),
    }
}

pub async fn set_ambient(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AmbientRequest>,
) -> impl IntoResponse {
    adjust(&state, LightingChange::Ambient { intensity: req.intensity }).await
}

pub async fn set_directional(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DirectionalRequest>,
) -> impl IntoResponse {
    adjust(
        &state,
        LightingChange::Directional {
            position: req.position,
            intensity: req.intensity,
        },
    )
    .await
}

pub async fn set_spot(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SpotRequest>,
) -> impl IntoResponse {
    adjust(
        &state,
        LightingChange::Spot {
            position: req.position,
            intensity: req.intensity,
            angle: req.angle,
        },
    )
    .await
}

pub async fn set_mode(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ModeRequest>,
) -> impl IntoResponse {
    adjust(&state, LightingChange::Mode(req.mode)).await
}

#[derive(Deserialize)]
pub struct CapabilityReport {
    supported: bool,
}

/// Browser answers an XR capability probe
pub async fn xr_capability(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CapabilityReport>,
) -> impl IntoResponse {
    let answered = state.bridge.capability_reported(req.supported);
    Json(serde_json::json!({"answered": answered}))
}

#[derive(Deserialize)]
pub struct SessionAnswer {
    request_id: Uuid,
    granted: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Browser answers an XR session request
pub async fn xr_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SessionAnswer>,
) -> impl IntoResponse {
    match state
        .bridge
        .session_answered(req.request_id, req.granted, req.reason)
    {
        Some(Ok(session)) => Json(serde_json::json!({"session": session})).into_response(),
        Some(Err(reason)) => Json(serde_json::json!({"denied": reason})).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiError::new("No pending session request")),
        )
            .into_response(),
    }
}

/// Browser reports that an XR session ended
pub async fn xr_session_end(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.scene.ar_session_ended(SessionId(id)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => scene_error(e),
    }
}

/// Uploaded model bytes
pub async fn get_blob(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.blobs.get(&id) {
        Some(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes.to_vec(),
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiError::new("Blob not found")),
        )
            .into_response(),
    }
}
