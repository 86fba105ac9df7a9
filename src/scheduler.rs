//! Refresh cycle state machine.
//!
//! ```text
//! Idle -> Fetching -> Computing -> Rendered --(refresh interval)--> Idle
//!            |            |
//!            +------------+-> Failed --(retry backoff)--> Idle
//! ```
//!
//! One cycle runs at a time on a single task. A user-triggered refresh bumps
//! the trigger generation; a cycle that finds the generation moved on when it
//! completes drops its result (last trigger wins) and the pending trigger
//! starts the next cycle immediately. Nothing is interrupted mid-flight.
//!
//! The generation is checked after the fetch and again after interpolation.
//! A trigger that lands after the second check still lets that cycle
//! publish; its pending permit then cuts the following pause short, so the
//! newer request is always served by a cycle that started after it.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::{
    aqi::AqiCalculator,
    error::{CycleError, FetchError, InterpolationError},
    fetcher::StationReadingFetcher,
    interpolate::{GridResolution, SpatialInterpolator},
    models::{AqiPoint, BoundingBox, StationDetail, StationReading, Summary},
    presenter::{Notice, Presenter, Snapshot},
};

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshState {
    Idle,
    Fetching,
    Computing,
    Rendered,
    Failed,
}

impl RefreshState {
    pub fn can_transition_to(self, next: RefreshState) -> bool {
        // ---
        use RefreshState::*;
        matches!(
            (self, next),
            (Idle, Fetching)
                | (Fetching, Computing)
                | (Fetching, Failed)
                | (Computing, Rendered)
                | (Computing, Failed)
                | (Rendered, Idle)
                | (Failed, Idle)
                // superseded cycles drop their result
                | (Fetching, Idle)
                | (Computing, Idle)
        )
    }
}

/// How a single cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Rendered,
    Failed(CycleError),
    /// A newer trigger arrived while this cycle was in flight.
    Discarded,
}

/// Cloneable trigger for user-initiated refreshes.
#[derive(Debug, Clone, Default)]
pub struct RefreshHandle {
    inner: Arc<HandleInner>,
}

#[derive(Debug, Default)]
struct HandleInner {
    generation: AtomicU64,
    notify: Notify,
}

impl RefreshHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a refresh now. Any cycle already in flight will have its
    /// result discarded.
    pub fn trigger(&self) -> u64 {
        // ---
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.notify.notify_one();
        generation
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    async fn triggered(&self) {
        self.inner.notify.notified().await
    }
}

/// Scheduler settings derived from the service configuration.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    // ---
    pub region: BoundingBox,
    pub fetch_limit: usize,
    pub resolution: GridResolution,
    pub refresh_interval: Duration,
    pub retry_backoff: Duration,
}

pub struct RefreshScheduler<F, P> {
    // ---
    fetcher: F,
    presenter: P,
    calculator: AqiCalculator,
    interpolator: SpatialInterpolator,
    settings: SchedulerSettings,
    handle: RefreshHandle,
    state: RefreshState,
    cycle: u64,
    /// Last accepted reading per station; keeps timestamps from regressing.
    accepted: HashMap<String, StationReading>,
}

impl<F, P> RefreshScheduler<F, P>
where
    F: StationReadingFetcher,
    P: Presenter,
{
    pub fn new(
        fetcher: F,
        presenter: P,
        calculator: AqiCalculator,
        interpolator: SpatialInterpolator,
        settings: SchedulerSettings,
        handle: RefreshHandle,
    ) -> Self {
        // ---
        RefreshScheduler {
            fetcher,
            presenter,
            calculator,
            interpolator,
            settings,
            handle,
            state: RefreshState::Idle,
            cycle: 0,
            accepted: HashMap::new(),
        }
    }

    pub fn state(&self) -> RefreshState {
        self.state
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Run cycles until the task is dropped.
    pub async fn run(mut self) {
        // ---
        info!(
            "Refresh scheduler started: region {}, every {:?}, retry after {:?}, IDW power {}",
            self.settings.region,
            self.settings.refresh_interval,
            self.settings.retry_backoff,
            self.interpolator.power()
        );

        loop {
            let pause = match self.run_cycle().await {
                CycleOutcome::Rendered => Some(self.settings.refresh_interval),
                CycleOutcome::Failed(_) => Some(self.settings.retry_backoff),
                CycleOutcome::Discarded => None,
            };

            match pause {
                Some(pause) => {
                    tokio::select! {
                        _ = tokio::time::sleep(pause) => {
                            debug!("Refresh timer fired after {:?}", pause);
                        }
                        _ = self.handle.triggered() => {
                            info!("Refresh requested");
                        }
                    }
                }
                // The trigger that superseded the cycle left a permit; take it
                // so it does not cut the next pause short.
                None => self.handle.triggered().await,
            }

            if self.state != RefreshState::Idle {
                self.transition(RefreshState::Idle);
            }
        }
    }

    /// One fetch-compute-render pass starting from `Idle`.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        // ---
        self.cycle += 1;
        let generation = self.handle.generation();
        self.transition(RefreshState::Fetching);

        let fetched = self
            .fetcher
            .fetch(&self.settings.region, self.settings.fetch_limit)
            .await;

        if self.superseded(generation) {
            return self.discard();
        }

        let readings = match fetched {
            Ok(readings) => readings,
            Err(e) => return self.fail(e.into()),
        };

        self.transition(RefreshState::Computing);

        let readings = self.enforce_monotonic(readings);
        let stations = self.station_details(&readings);
        let points: Vec<AqiPoint> = stations.iter().filter_map(StationDetail::point).collect();

        let resolution = self.settings.resolution.resolve(&self.settings.region);
        let surface = match self.interpolator.interpolate(&points, resolution) {
            Ok(surface) => surface,
            Err(e) => return self.fail(e.into()),
        };

        if self.superseded(generation) {
            return self.discard();
        }

        info!(
            "Cycle {}: {} stations, {} interpolated, grid {}x{}",
            self.cycle,
            stations.len(),
            points.len(),
            surface.rows,
            surface.cols
        );

        self.presenter.update(Snapshot {
            cycle: self.cycle,
            computed_at: Utc::now(),
            region: self.settings.region,
            summary: Summary::from_stations(&stations),
            stations,
            surface,
        });
        self.transition(RefreshState::Rendered);
        CycleOutcome::Rendered
    }

    fn station_details(&self, readings: &[StationReading]) -> Vec<StationDetail> {
        // ---
        readings
            .iter()
            .map(|reading| {
                let aqi = match self.calculator.aqi(reading.pm25) {
                    Ok(aqi) => Some(aqi),
                    Err(e) => {
                        warn!("Skipping station {} for interpolation: {}", reading.station_id, e);
                        None
                    }
                };
                StationDetail::new(reading, aqi)
            })
            .collect()
    }

    fn enforce_monotonic(&mut self, readings: Vec<StationReading>) -> Vec<StationReading> {
        // ---
        let mut kept = Vec::with_capacity(readings.len());
        for reading in readings {
            let newer = self
                .accepted
                .get(&reading.station_id)
                .filter(|previous| previous.timestamp > reading.timestamp)
                .cloned();

            match newer {
                Some(previous) => {
                    info!(
                        "Station {} reported {} after {}, keeping the newer reading",
                        reading.station_id, reading.timestamp, previous.timestamp
                    );
                    kept.push(previous);
                }
                None => {
                    self.accepted
                        .insert(reading.station_id.clone(), reading.clone());
                    kept.push(reading);
                }
            }
        }
        kept
    }

    fn superseded(&self, generation: u64) -> bool {
        self.handle.generation() != generation
    }

    fn discard(&mut self) -> CycleOutcome {
        // ---
        info!("Cycle {} superseded by a newer refresh, result discarded", self.cycle);
        self.transition(RefreshState::Idle);
        CycleOutcome::Discarded
    }

    fn fail(&mut self, e: CycleError) -> CycleOutcome {
        // ---
        let notice = match &e {
            CycleError::Fetch(FetchError::Network(msg)) => {
                warn!("Cycle {} fetch failed, will retry: {}", self.cycle, msg);
                Notice::Warning {
                    message: e.to_string(),
                }
            }
            CycleError::Fetch(FetchError::DataFormat(msg)) => {
                error!("Cycle {} dropped malformed data: {}", self.cycle, msg);
                Notice::Error {
                    message: e.to_string(),
                }
            }
            CycleError::Interpolation(InterpolationError::InsufficientData) => {
                warn!("Cycle {}: no stations with AQI in {}", self.cycle, self.settings.region);
                Notice::NoStations
            }
            CycleError::Interpolation(other) => {
                error!("Cycle {} interpolation failed: {}", self.cycle, other);
                Notice::Error {
                    message: e.to_string(),
                }
            }
        };
        self.presenter.notify(notice);
        self.transition(RefreshState::Failed);
        CycleOutcome::Failed(e)
    }

    fn transition(&mut self, next: RefreshState) {
        // ---
        if !self.state.can_transition_to(next) {
            warn!("Unexpected refresh transition {:?} -> {:?}", self.state, next);
        }
        debug!("Cycle {}: {:?} -> {:?}", self.cycle, self.state, next);
        self.state = next;
        self.presenter.state_changed(next, self.cycle);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{aqi::OutOfRangePolicy, presenter::DashboardView};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use std::{
        collections::VecDeque,
        sync::{atomic::AtomicUsize, Mutex},
    };
    use tokio_test::assert_ok;

    type Scripted = Result<Vec<StationReading>, FetchError>;

    /// Replays scripted responses; optionally fires a user refresh mid-fetch.
    struct ScriptedFetcher {
        responses: Mutex<VecDeque<Scripted>>,
        trigger_during_fetch: Option<RefreshHandle>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedFetcher {
        fn new(responses: Vec<Scripted>) -> Self {
            ScriptedFetcher {
                responses: Mutex::new(responses.into()),
                trigger_during_fetch: None,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl StationReadingFetcher for ScriptedFetcher {
        async fn fetch(
            &self,
            _bbox: &BoundingBox,
            _limit: usize,
        ) -> Result<Vec<StationReading>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(handle) = &self.trigger_during_fetch {
                handle.trigger();
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Network("script exhausted".into())))
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 26, hour, 0, 0).unwrap()
    }

    fn reading(id: &str, lat: f64, lon: f64, pm25: f64, hour: u32) -> StationReading {
        // ---
        StationReading {
            station_id: id.into(),
            latitude: lat,
            longitude: lon,
            timestamp: at(hour),
            pm25,
        }
    }

    fn stations() -> Vec<StationReading> {
        vec![
            reading("1", 51.52, -0.12, 12.0, 10),
            reading("2", 51.48, -0.01, 35.4, 10),
            reading("3", 51.40, -0.30, 5.0, 10),
        ]
    }

    fn scheduler(
        fetcher: ScriptedFetcher,
        view: DashboardView,
        handle: RefreshHandle,
    ) -> RefreshScheduler<ScriptedFetcher, DashboardView> {
        // ---
        RefreshScheduler::new(
            fetcher,
            view,
            AqiCalculator::new(OutOfRangePolicy::Reject),
            SpatialInterpolator::default(),
            SchedulerSettings {
                region: BoundingBox::new(-0.5, 51.3, 0.3, 51.7).unwrap(),
                fetch_limit: 1000,
                resolution: GridResolution::Fixed(0.02),
                refresh_interval: Duration::from_secs(300),
                retry_backoff: Duration::from_secs(30),
            },
            handle,
        )
    }

    #[test]
    fn test_transition_table() {
        // ---
        use RefreshState::*;
        assert!(Idle.can_transition_to(Fetching));
        assert!(Fetching.can_transition_to(Computing));
        assert!(Computing.can_transition_to(Rendered));
        assert!(Rendered.can_transition_to(Idle));
        assert!(Failed.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(Rendered));
        assert!(!Rendered.can_transition_to(Fetching));
        assert!(!Failed.can_transition_to(Fetching));
    }

    #[tokio::test]
    async fn test_successful_cycle_renders() {
        // ---
        let view = DashboardView::new();
        let mut sched = scheduler(
            ScriptedFetcher::new(vec![Ok(stations())]),
            view.clone(),
            RefreshHandle::new(),
        );

        assert_eq!(sched.run_cycle().await, CycleOutcome::Rendered);
        assert_eq!(sched.state(), RefreshState::Rendered);

        let snapshot = view.latest().unwrap();
        assert_eq!(snapshot.cycle, 1);
        assert_eq!(snapshot.stations.len(), 3);
        assert_eq!(snapshot.stations[0].aqi, Some(50));
        assert_eq!(snapshot.stations[1].aqi, Some(100));
        assert_eq!(snapshot.summary.station_count, 3);
        assert!(!snapshot.surface.values.is_empty());

        let status = view.status();
        assert_eq!(status.state, RefreshState::Rendered);
        assert!(status.last_updated.is_some());
        assert_eq!(status.notice, None);
    }

    #[tokio::test]
    async fn test_malformed_data_keeps_previous_surface() {
        // ---
        let view = DashboardView::new();
        let mut sched = scheduler(
            ScriptedFetcher::new(vec![
                Ok(stations()),
                Err(FetchError::DataFormat("results is not a list".into())),
            ]),
            view.clone(),
            RefreshHandle::new(),
        );

        assert_eq!(sched.run_cycle().await, CycleOutcome::Rendered);
        let before = view.latest().unwrap();

        let outcome = sched.run_cycle().await;
        assert!(matches!(
            outcome,
            CycleOutcome::Failed(CycleError::Fetch(FetchError::DataFormat(_)))
        ));
        assert_eq!(sched.state(), RefreshState::Failed);

        let after = view.latest().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(matches!(view.status().notice, Some(Notice::Error { .. })));
    }

    #[tokio::test]
    async fn test_network_error_warns() {
        // ---
        let view = DashboardView::new();
        let mut sched = scheduler(
            ScriptedFetcher::new(vec![Err(FetchError::Network("connection refused".into()))]),
            view.clone(),
            RefreshHandle::new(),
        );

        match sched.run_cycle().await {
            CycleOutcome::Failed(e) => assert!(e.is_transient()),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(view.latest().is_none());
        assert!(matches!(view.status().notice, Some(Notice::Warning { .. })));
    }

    #[tokio::test]
    async fn test_no_stations_shows_empty_state() {
        // ---
        let view = DashboardView::new();
        let mut sched = scheduler(
            ScriptedFetcher::new(vec![Ok(Vec::new())]),
            view.clone(),
            RefreshHandle::new(),
        );

        assert_eq!(
            sched.run_cycle().await,
            CycleOutcome::Failed(CycleError::Interpolation(
                InterpolationError::InsufficientData
            ))
        );
        assert_eq!(view.status().notice, Some(Notice::NoStations));
    }

    #[tokio::test]
    async fn test_out_of_range_station_is_skipped() {
        // ---
        let view = DashboardView::new();
        let mut readings = stations();
        readings.push(reading("4", 51.60, 0.05, 812.0, 10));
        let mut sched = scheduler(
            ScriptedFetcher::new(vec![Ok(readings)]),
            view.clone(),
            RefreshHandle::new(),
        );

        assert_eq!(sched.run_cycle().await, CycleOutcome::Rendered);
        let snapshot = view.latest().unwrap();
        assert_eq!(snapshot.stations.len(), 4);
        assert_eq!(snapshot.stations[3].aqi, None);
        // The skipped station does not pull the surface toward 500
        assert!(snapshot.surface.max_value().unwrap() <= 100.0 + 1e-9);
    }

    #[tokio::test]
    async fn test_user_trigger_mid_flight_discards_result() {
        // ---
        let view = DashboardView::new();
        let handle = RefreshHandle::new();
        let mut fetcher = ScriptedFetcher::new(vec![Ok(stations()), Ok(stations())]);
        fetcher.trigger_during_fetch = Some(handle.clone());
        let mut sched = scheduler(fetcher, view.clone(), handle);

        assert_eq!(sched.run_cycle().await, CycleOutcome::Discarded);
        assert_eq!(sched.state(), RefreshState::Idle);
        assert!(view.latest().is_none());
    }

    #[tokio::test]
    async fn test_timestamps_never_regress() {
        // ---
        let view = DashboardView::new();
        let mut sched = scheduler(
            ScriptedFetcher::new(vec![
                Ok(vec![reading("1", 51.52, -0.12, 12.0, 10)]),
                Ok(vec![reading("1", 51.52, -0.12, 90.0, 9)]),
            ]),
            view.clone(),
            RefreshHandle::new(),
        );

        assert_eq!(sched.run_cycle().await, CycleOutcome::Rendered);
        sched.transition(RefreshState::Idle);
        assert_eq!(sched.run_cycle().await, CycleOutcome::Rendered);

        let snapshot = view.latest().unwrap();
        assert_eq!(snapshot.cycle, 2);
        assert_eq!(snapshot.stations[0].timestamp, at(10));
        assert_eq!(snapshot.stations[0].pm25, 12.0);
    }

    #[tokio::test]
    async fn test_run_loop_recovers_and_refreshes_on_trigger() {
        // ---
        let view = DashboardView::new();
        let handle = RefreshHandle::new();
        let sched = scheduler(
            ScriptedFetcher::new(vec![
                Err(FetchError::Network("timeout".into())),
                Ok(stations()),
            ]),
            view.clone(),
            handle.clone(),
        );
        let mut updates = view.subscribe();
        let task = tokio::spawn(sched.run());

        // First cycle fails; the retry backoff is cut short by a user refresh
        handle.trigger();
        let changed = tokio::time::timeout(Duration::from_secs(5), updates.changed()).await;
        assert_ok!(assert_ok!(changed));
        assert_eq!(view.latest().unwrap().stations.len(), 3);

        task.abort();
    }

    /// Let the paused clock run forward; timers due before then fire.
    async fn advance(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rendered_refreshes_after_interval() {
        // ---
        let view = DashboardView::new();
        let fetcher = ScriptedFetcher::new(vec![Ok(stations()), Ok(stations())]);
        let calls = fetcher.calls.clone();
        let task = tokio::spawn(scheduler(fetcher, view.clone(), RefreshHandle::new()).run());

        advance(299).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(view.status().state, RefreshState::Rendered);
        assert_eq!(view.latest().unwrap().cycle, 1);

        advance(2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(view.status().state, RefreshState::Rendered);
        assert_eq!(view.latest().unwrap().cycle, 2);

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_retries_after_backoff() {
        // ---
        let view = DashboardView::new();
        let fetcher = ScriptedFetcher::new(vec![
            Err(FetchError::Network("timeout".into())),
            Ok(stations()),
        ]);
        let calls = fetcher.calls.clone();
        let task = tokio::spawn(scheduler(fetcher, view.clone(), RefreshHandle::new()).run());

        advance(29).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(view.status().state, RefreshState::Failed);
        assert!(view.latest().is_none());

        advance(2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(view.status().state, RefreshState::Rendered);
        assert_eq!(view.latest().unwrap().stations.len(), 3);

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_cuts_refresh_interval_short() {
        // ---
        let view = DashboardView::new();
        let handle = RefreshHandle::new();
        let fetcher = ScriptedFetcher::new(vec![Ok(stations()), Ok(stations())]);
        let calls = fetcher.calls.clone();
        let task = tokio::spawn(scheduler(fetcher, view.clone(), handle.clone()).run());

        advance(10).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Arrives after the first cycle published, so a fresh one must follow
        handle.trigger();
        advance(1).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(view.latest().unwrap().cycle, 2);

        advance(200).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        task.abort();
    }
}
