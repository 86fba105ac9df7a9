//! Route gateway for the presenter-facing HTTP API.
//!
//! Each sibling module exports a subrouter; this gateway merges them and
//! attaches the shared state, so `main.rs` never sees individual endpoints.

use axum::Router;

use crate::{interpolate::SpatialInterpolator, presenter::DashboardView, scheduler::RefreshHandle};

mod health;
mod refresh;
mod surface;

// ---

/// State shared by all routes.
#[derive(Clone)]
pub struct AppState {
    // ---
    pub view: DashboardView,
    pub refresh: RefreshHandle,
    /// Used for point estimates, configured like the scheduler's.
    pub interpolator: SpatialInterpolator,
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(surface::router())
        .merge(refresh::router())
        .merge(health::router())
        .with_state(state)
}
