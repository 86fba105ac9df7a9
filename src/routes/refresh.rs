//! Scheduler status and user-triggered refresh.

use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::get, routing::post, Json,
    Router,
};
use serde::Serialize;
use tracing::info;

use super::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/status", get(status))
        .route("/refresh", post(refresh))
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.view.status())
}

#[derive(Serialize)]
struct RefreshAccepted {
    generation: u64,
}

/// Handle `POST /refresh`.
///
/// Returns immediately; any cycle in flight is superseded.
async fn refresh(State(state): State<AppState>) -> impl IntoResponse {
    // ---
    let generation = state.refresh.trigger();
    info!("POST /refresh - generation {}", generation);
    (StatusCode::ACCEPTED, Json(RefreshAccepted { generation }))
}
