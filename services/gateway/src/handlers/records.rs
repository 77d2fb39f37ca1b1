use crate::error::AppError;
use crate::models::UpsertRecordResponse;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use types::record::{RawRecord, RecordKey};

fn parse_address(address: &str) -> Result<RecordKey, AppError> {
    let key = RecordKey::new(address);
    if key.is_empty() {
        return Err(AppError::BadRequest("Record address must not be empty".into()));
    }
    Ok(key)
}

/// Store a record document. The change notification feeds connected clients.
pub async fn upsert_record(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Json(record): Json<RawRecord>,
) -> Result<Json<UpsertRecordResponse>, AppError> {
    let key = parse_address(&address)?;
    let op = state.store.insert(key.clone(), record);
    tracing::debug!(key = %key, op = op.label(), "Record stored");

    Ok(Json(UpsertRecordResponse { address: key, op }))
}

pub async fn delete_record(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<StatusCode, AppError> {
    let key = parse_address(&address)?;
    match state.store.remove(key.clone()) {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(AppError::NotFound(format!("Record {} not found", key))),
    }
}
