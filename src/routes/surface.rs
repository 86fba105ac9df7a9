//! Read-only views of the latest rendered snapshot.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::AppState;
use crate::{aqi::AqiCategory, models::AqiPoint};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/surface", get(surface))
        .route("/stations", get(stations))
        .route("/estimate", get(estimate))
}

/// Handle `GET /surface`: the full snapshot, or 204 before the first render.
async fn surface(State(state): State<AppState>) -> impl IntoResponse {
    // ---
    match state.view.latest() {
        Some(snapshot) => (StatusCode::OK, Json(snapshot.as_ref())).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn stations(State(state): State<AppState>) -> impl IntoResponse {
    // ---
    match state.view.latest() {
        Some(snapshot) => (StatusCode::OK, Json(&snapshot.stations)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// Query parameters for a point estimate
#[derive(Debug, Deserialize)]
pub struct EstimateQuery {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Serialize)]
struct EstimateResponse {
    latitude: f64,
    longitude: f64,
    estimate: f64,
    aqi: u16,
    category: AqiCategory,
    advisory: &'static str,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Handle `GET /estimate?lat=..&lon=..`: IDW AQI at an arbitrary location.
async fn estimate(
    Query(params): Query<EstimateQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // ---
    debug!("GET /estimate - {:?}", params);

    if !(-90.0..=90.0).contains(&params.lat) || !(-180.0..=180.0).contains(&params.lon) {
        return error(StatusCode::BAD_REQUEST, "lat/lon out of range");
    }

    let Some(snapshot) = state.view.latest() else {
        return error(StatusCode::NOT_FOUND, "no surface rendered yet");
    };

    let points: Vec<AqiPoint> = snapshot.stations.iter().filter_map(|s| s.point()).collect();
    match state.interpolator.estimate(&points, params.lat, params.lon) {
        Ok(estimate) => {
            let aqi = estimate.round().clamp(0.0, f64::from(u16::MAX)) as u16;
            let category = AqiCategory::from_aqi(aqi);
            Json(EstimateResponse {
                latitude: params.lat,
                longitude: params.lon,
                estimate,
                aqi,
                category,
                advisory: category.advisory(),
            })
            .into_response()
        }
        Err(e) => error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    }
}
