//! Hand-off point between the refresh cycle and whatever renders the map.
//!
//! The scheduler pushes complete [`Snapshot`]s and [`Notice`]s through the
//! [`Presenter`] trait. [`DashboardView`] is the in-process implementation
//! backing the HTTP routes: each snapshot replaces the previous one
//! atomically, so a reader sees either the old surface or the new one, never
//! a half-built grid.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::{
    interpolate::InterpolatedSurface,
    models::{BoundingBox, StationDetail, Summary},
    scheduler::RefreshState,
};

// ---

/// Output of one successful refresh cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    // ---
    pub cycle: u64,
    pub computed_at: DateTime<Utc>,
    pub region: BoundingBox,
    pub summary: Summary,
    pub stations: Vec<StationDetail>,
    pub surface: InterpolatedSurface,
}

/// Non-fatal condition worth showing next to the map.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// Transient failure; the previous surface is still shown.
    Warning { message: String },
    /// Bad data was dropped; the previous surface is still shown.
    Error { message: String },
    /// The region currently has no usable stations.
    NoStations,
}

/// Scheduler progress as exposed to readers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    // ---
    pub state: RefreshState,
    pub cycle: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub notice: Option<Notice>,
}

impl Default for Status {
    fn default() -> Self {
        Status {
            state: RefreshState::Idle,
            cycle: 0,
            last_updated: None,
            notice: None,
        }
    }
}

/// Receiver of refresh-cycle output.
pub trait Presenter: Send + Sync {
    /// Replace the displayed surface with a fully computed one.
    fn update(&self, snapshot: Snapshot);

    /// Surface a condition without touching the displayed surface.
    fn notify(&self, notice: Notice);

    /// Observe a scheduler state transition.
    fn state_changed(&self, _state: RefreshState, _cycle: u64) {}
}

/// Latest snapshot and status, shared between the scheduler and readers.
#[derive(Debug, Clone)]
pub struct DashboardView {
    snapshot: Arc<watch::Sender<Option<Arc<Snapshot>>>>,
    status: Arc<watch::Sender<Status>>,
}

impl Default for DashboardView {
    fn default() -> Self {
        Self::new()
    }
}

impl DashboardView {
    pub fn new() -> Self {
        // ---
        let (snapshot, _) = watch::channel(None);
        let (status, _) = watch::channel(Status::default());
        DashboardView {
            snapshot: Arc::new(snapshot),
            status: Arc::new(status),
        }
    }

    /// The most recent complete snapshot, if any cycle has rendered yet.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.borrow().clone()
    }

    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    /// Wait-able view of snapshot replacements.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.snapshot.subscribe()
    }
}

impl Presenter for DashboardView {
    fn update(&self, snapshot: Snapshot) {
        // ---
        let computed_at = snapshot.computed_at;
        self.snapshot.send_replace(Some(Arc::new(snapshot)));
        self.status.send_modify(|status| {
            status.last_updated = Some(computed_at);
            status.notice = None;
        });
    }

    fn notify(&self, notice: Notice) {
        self.status.send_modify(|status| status.notice = Some(notice));
    }

    fn state_changed(&self, state: RefreshState, cycle: u64) {
        self.status.send_modify(|status| {
            status.state = state;
            status.cycle = cycle;
        });
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::interpolate::SpatialInterpolator;
    use crate::models::AqiPoint;

    fn snapshot(cycle: u64, aqi: u16) -> Snapshot {
        // ---
        let points = [AqiPoint {
            latitude: 51.5,
            longitude: -0.1,
            aqi,
        }];
        Snapshot {
            cycle,
            computed_at: Utc::now(),
            region: BoundingBox::new(-0.5, 51.3, 0.3, 51.7).unwrap(),
            summary: Summary::from_stations(&[]),
            stations: Vec::new(),
            surface: SpatialInterpolator::default()
                .interpolate(&points, 0.05)
                .unwrap(),
        }
    }

    #[test]
    fn test_update_replaces_snapshot() {
        // ---
        let view = DashboardView::new();
        assert!(view.latest().is_none());

        view.update(snapshot(1, 40));
        let first = view.latest().unwrap();
        assert_eq!(first.cycle, 1);

        view.update(snapshot(2, 90));
        assert_eq!(view.latest().unwrap().cycle, 2);

        // An earlier reader keeps its own complete copy
        assert_eq!(first.surface.values[0], 40.0);
    }

    #[test]
    fn test_notice_does_not_touch_snapshot() {
        // ---
        let view = DashboardView::new();
        view.update(snapshot(1, 40));
        view.notify(Notice::Warning {
            message: "timeout".into(),
        });

        assert_eq!(view.latest().unwrap().cycle, 1);
        assert_eq!(
            view.status().notice,
            Some(Notice::Warning {
                message: "timeout".into()
            })
        );
    }

    #[test]
    fn test_state_changes_are_visible() {
        // ---
        let view = DashboardView::new();
        view.state_changed(RefreshState::Fetching, 3);
        let status = view.status();
        assert_eq!(status.state, RefreshState::Fetching);
        assert_eq!(status.cycle, 3);
    }
}
