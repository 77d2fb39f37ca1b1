use crate::models::HealthResponse;
use crate::state::AppState;
use axum::{Json, extract::State};

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: feed::SERVICE_VERSION,
        connections: state.engine.connection_count(),
        records: state.store.len(),
        metrics: state.engine.metrics().export(),
    })
}
