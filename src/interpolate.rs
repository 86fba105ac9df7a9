//! Inverse-distance-weighted interpolation of station AQI onto a grid.
//!
//! The surface covers the bounding rectangle of the input points, padded by a
//! fixed margin, sampled at regular grid nodes. Each node value is
//!
//! ```text
//! v(x) = Σ w_i · aqi_i / Σ w_i,   w_i = 1 / d(x, p_i)^power
//! ```
//!
//! Distances use an equirectangular approximation (longitude scaled by the
//! cosine of the mean latitude), which is accurate at city and region scale.
//!
//! Points are put into a canonical order before any summation, so the output
//! does not depend on input order. Points coincident with a query location
//! (distance below [`COINCIDENT_DEG`]) take over that location entirely; when
//! several coincide their AQI values are averaged.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    error::InterpolationError,
    models::{AqiPoint, BoundingBox},
};

// ---

pub const DEFAULT_POWER: f64 = 2.0;

/// Largest accepted IDW exponent.
pub const MAX_POWER: f64 = 10.0;

/// Padding around the station extent, in degrees.
pub const DEFAULT_MARGIN_DEG: f64 = 0.1;

/// Grids larger than this are coarsened before computing.
pub const MAX_GRID_CELLS: usize = 250_000;

/// Distance under which a station is treated as sitting on the query point.
pub const COINCIDENT_DEG: f64 = 1e-9;

/// Grid spacing in degrees, either fixed or derived from the map extent.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum GridResolution {
    #[default]
    Auto,
    Fixed(f64),
}

impl GridResolution {
    /// Urban extents get a fine grid, countries a coarse one.
    pub fn resolve(&self, extent: &BoundingBox) -> f64 {
        // ---
        match *self {
            GridResolution::Fixed(res) => res,
            GridResolution::Auto => {
                let span = extent.span();
                if span < 1.0 {
                    0.005
                } else if span < 5.0 {
                    0.02
                } else {
                    0.05
                }
            }
        }
    }
}

impl FromStr for GridResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(GridResolution::Auto);
        }
        let res = s
            .parse::<f64>()
            .map_err(|e| format!("invalid grid resolution '{s}': {e}"))?;
        if !res.is_finite() || res <= 0.0 {
            return Err(format!("grid resolution must be positive, got {res}"));
        }
        Ok(GridResolution::Fixed(res))
    }
}

/// Estimated AQI at regular nodes over a rectangular region.
///
/// Node `(row, col)` sits at `(min_lat + row * resolution,
/// min_lon + col * resolution)`; `values` is row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolatedSurface {
    // ---
    pub bounds: BoundingBox,
    pub resolution: f64,
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<f64>,
}

impl InterpolatedSurface {
    // ---
    pub fn value(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.values.get(row * self.cols + col).copied()
    }

    /// `(latitude, longitude)` of a grid node.
    pub fn node(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.bounds.min_lat + row as f64 * self.resolution,
            self.bounds.min_lon + col as f64 * self.resolution,
        )
    }

    /// Value of the grid node nearest to a location, `None` outside the grid.
    pub fn sample(&self, latitude: f64, longitude: f64) -> Option<f64> {
        // ---
        if !self.bounds.contains(latitude, longitude) {
            return None;
        }
        let row = ((latitude - self.bounds.min_lat) / self.resolution).round() as usize;
        let col = ((longitude - self.bounds.min_lon) / self.resolution).round() as usize;
        self.value(row.min(self.rows - 1), col.min(self.cols - 1))
    }

    pub fn min_value(&self) -> Option<f64> {
        self.values.iter().copied().min_by(f64::total_cmp)
    }

    pub fn max_value(&self) -> Option<f64> {
        self.values.iter().copied().max_by(f64::total_cmp)
    }
}

/// Deterministic IDW interpolator.
#[derive(Debug, Clone, Copy)]
pub struct SpatialInterpolator {
    power: f64,
    margin: f64,
}

impl Default for SpatialInterpolator {
    fn default() -> Self {
        SpatialInterpolator::new(DEFAULT_POWER)
    }
}

impl SpatialInterpolator {
    pub fn new(power: f64) -> Self {
        SpatialInterpolator {
            power,
            margin: DEFAULT_MARGIN_DEG,
        }
    }

    pub fn power(&self) -> f64 {
        self.power
    }

    /// Build the full surface for a point set at the given node spacing.
    pub fn interpolate(
        &self,
        points: &[AqiPoint],
        resolution: f64,
    ) -> Result<InterpolatedSurface, InterpolationError> {
        // ---
        if !resolution.is_finite() || resolution <= 0.0 {
            return Err(InterpolationError::InvalidResolution(resolution));
        }
        let points = canonical(points)?;
        let bounds = self.extent(&points);
        let resolution = capped_resolution(&bounds, resolution);

        let cols = node_count(bounds.max_lon - bounds.min_lon, resolution);
        let rows = node_count(bounds.max_lat - bounds.min_lat, resolution);

        let mut surface = InterpolatedSurface {
            bounds,
            resolution,
            rows,
            cols,
            values: Vec::with_capacity(rows * cols),
        };

        if let [only] = points.as_slice() {
            surface.values.resize(rows * cols, f64::from(only.aqi));
            return Ok(surface);
        }

        for row in 0..rows {
            for col in 0..cols {
                let (lat, lon) = surface.node(row, col);
                surface.values.push(self.weighted(&points, lat, lon));
            }
        }
        Ok(surface)
    }

    /// Estimated AQI at a single location.
    pub fn estimate(
        &self,
        points: &[AqiPoint],
        latitude: f64,
        longitude: f64,
    ) -> Result<f64, InterpolationError> {
        // ---
        let points = canonical(points)?;
        if let [only] = points.as_slice() {
            return Ok(f64::from(only.aqi));
        }
        Ok(self.weighted(&points, latitude, longitude))
    }

    fn weighted(&self, points: &[AqiPoint], latitude: f64, longitude: f64) -> f64 {
        // ---
        let mut coincident_sum = 0.0;
        let mut coincident_count = 0u32;
        let mut nearest = f64::INFINITY;

        let distances: Vec<f64> = points
            .iter()
            .map(|p| distance_deg(latitude, longitude, p.latitude, p.longitude))
            .collect();
        for (p, &d) in points.iter().zip(&distances) {
            if d < COINCIDENT_DEG {
                coincident_sum += f64::from(p.aqi);
                coincident_count += 1;
            } else {
                nearest = nearest.min(d);
            }
        }
        if coincident_count > 0 {
            return coincident_sum / f64::from(coincident_count);
        }

        // Relative to the nearest station every weight lies in (0, 1] and the
        // nearest contributes exactly 1, so the sum stays finite and non-zero.
        let mut weight_sum = 0.0;
        let mut value_sum = 0.0;
        for (p, &d) in points.iter().zip(&distances) {
            let w = (d / nearest).powf(-self.power);
            weight_sum += w;
            value_sum += w * f64::from(p.aqi);
        }
        value_sum / weight_sum
    }

    fn extent(&self, points: &[AqiPoint]) -> BoundingBox {
        // ---
        let (mut min_lat, mut max_lat) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut min_lon, mut max_lon) = (f64::INFINITY, f64::NEG_INFINITY);
        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lon = min_lon.min(p.longitude);
            max_lon = max_lon.max(p.longitude);
        }
        BoundingBox {
            min_lon: (min_lon - self.margin).max(-180.0),
            min_lat: (min_lat - self.margin).max(-90.0),
            max_lon: (max_lon + self.margin).min(180.0),
            max_lat: (max_lat + self.margin).min(90.0),
        }
    }
}

/// Sort points into a total order so floating-point sums are reproducible.
fn canonical(points: &[AqiPoint]) -> Result<Vec<AqiPoint>, InterpolationError> {
    // ---
    if points.is_empty() {
        return Err(InterpolationError::InsufficientData);
    }
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| {
        a.latitude
            .total_cmp(&b.latitude)
            .then_with(|| a.longitude.total_cmp(&b.longitude))
            .then_with(|| a.aqi.cmp(&b.aqi))
    });
    Ok(sorted)
}

fn distance_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    // ---
    let mean_lat = ((lat1 + lat2) / 2.0).to_radians();
    let dx = (lon2 - lon1) * mean_lat.cos();
    let dy = lat2 - lat1;
    dx.hypot(dy)
}

fn node_count(span: f64, resolution: f64) -> usize {
    nodes(span, resolution) as usize
}

/// Node count along one axis, kept in `f64` so tiny spacings cannot overflow.
fn nodes(span: f64, resolution: f64) -> f64 {
    (span / resolution + 1e-9).floor() + 1.0
}

fn capped_resolution(bounds: &BoundingBox, resolution: f64) -> f64 {
    // ---
    let width = bounds.max_lon - bounds.min_lon;
    let height = bounds.max_lat - bounds.min_lat;
    let cells = |res: f64| nodes(width, res) * nodes(height, res);
    let max_cells = MAX_GRID_CELLS as f64;

    if cells(resolution) <= max_cells {
        return resolution;
    }

    // Area over cell budget is a lower bound on the spacing; the extra nodes
    // on each edge need a few more percent at most.
    let mut res = (width * height / max_cells).sqrt().max(resolution);
    while cells(res) > max_cells {
        res *= 1.01;
    }
    warn!(
        "Grid at resolution {} exceeds {} cells, coarsened to {:.5}",
        resolution, MAX_GRID_CELLS, res
    );
    res
}
