use axum::Json;
use axum::extract::{Path, State};
use axum::response::Response;
use chatrank_domain::snapshots::list_cache_key;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use super::cached_json;
use crate::error::ApiError;
use crate::state::AppState;
use crate::validation;

#[derive(Debug, Deserialize, Validate)]
pub(super) struct CreateSnapshotRequest {
    #[validate(length(min = 1, max = 200))]
    title: String,
    data: Value,
}

#[derive(Serialize)]
pub(super) struct CreatedSnapshot {
    id: i64,
}

#[derive(Serialize)]
pub(super) struct DeletedSnapshot {
    status: &'static str,
}

fn snapshot_id(raw: &str) -> Result<i64, ApiError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ApiError::Validation("snapshot_id must be an integer".into()))
}

pub(super) async fn list_snapshots(State(state): State<AppState>) -> Result<Response, ApiError> {
    let cached = state.snapshots.list().await?;
    Ok(cached_json(list_cache_key().endpoint(), cached))
}

pub(super) async fn create_snapshot(
    State(state): State<AppState>,
    Json(payload): Json<CreateSnapshotRequest>,
) -> Result<Json<CreatedSnapshot>, ApiError> {
    validation::validate(&payload)?;
    let id = state
        .snapshots
        .create(&payload.title, payload.data)
        .await?;
    tracing::info!(snapshot_id = id, "snapshot created");
    Ok(Json(CreatedSnapshot { id }))
}

pub(super) async fn get_snapshot(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = snapshot_id(&raw_id)?;
    let cached = state
        .snapshots
        .get(id)
        .await
        .map_err(|err| ApiError::from_domain(err, "snapshot"))?;
    Ok(cached_json("snapshot", cached))
}

pub(super) async fn delete_snapshot(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<DeletedSnapshot>, ApiError> {
    let id = snapshot_id(&raw_id)?;
    state
        .snapshots
        .delete(id)
        .await
        .map_err(|err| ApiError::from_domain(err, "snapshot"))?;
    tracing::info!(snapshot_id = id, "snapshot deleted");
    Ok(Json(DeletedSnapshot { status: "deleted" }))
}
