use crate::handlers::{health, records, ws};
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route(
            "/records/{address}",
            put(records::upsert_record).delete(records::delete_record),
        )
        .route("/health", get(health::health));

    Router::new()
        .nest("/v1", api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
