//! Live PM2.5 air-quality surface.
//!
//! Fetches the latest station readings for a map region, converts PM2.5 to
//! US EPA AQI, interpolates a continuous AQI surface with inverse-distance
//! weighting, and refreshes on a timer or on demand. The rendered state is
//! served as JSON for a map front end.
//!
//! Data flow of one refresh cycle:
//!
//! ```text
//! RefreshScheduler -> StationReadingFetcher -> AqiCalculator
//!                  -> SpatialInterpolator -> Presenter
//! ```
//!
//! Modules follow the Explicit Module Boundary Pattern (EMBP): routes only
//! know their gateway, and the binary only wires modules together.

pub mod aqi;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod interpolate;
pub mod models;
pub mod presenter;
pub mod routes;
pub mod scheduler;

pub use aqi::{pm25_to_aqi, AqiCalculator, AqiCategory, OutOfRangePolicy};
pub use config::Config;
pub use error::{AqiError, CycleError, FetchError, InterpolationError};
pub use fetcher::{OpenAqFetcher, StationReadingFetcher};
pub use interpolate::{GridResolution, InterpolatedSurface, SpatialInterpolator};
pub use models::{AqiPoint, BoundingBox, StationDetail, StationReading, Summary};
pub use presenter::{DashboardView, Notice, Presenter, Snapshot, Status};
pub use scheduler::{CycleOutcome, RefreshHandle, RefreshScheduler, RefreshState, SchedulerSettings};
