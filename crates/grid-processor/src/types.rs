//! Core data types for in-memory climate grids.

use chrono::{NaiveDate, NaiveDateTime};
use climate_common::{ExplorerError, ExplorerResult, ReductionMethod};
use serde::{Deserialize, Serialize};

/// A variable on a regular (time, latitude, longitude) grid.
///
/// `data` is row-major: time slowest, longitude fastest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDataset {
    pub source_id: String,
    pub variable_id: String,
    /// Name of the variable inside the raw source stores.
    pub variable_key: String,
    pub units: String,
    pub long_name: String,
    pub times: Vec<NaiveDateTime>,
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
    pub data: Vec<f32>,
}

impl RawDataset {
    /// Check that the data buffer matches the coordinate vectors.
    pub fn validate_shape(&self) -> ExplorerResult<()> {
        let expected = self.times.len() * self.grid_len();
        if self.data.len() != expected {
            return Err(ExplorerError::invalid_source(format!(
                "data has {} values, expected {} ({} x {} x {})",
                self.data.len(),
                expected,
                self.times.len(),
                self.latitudes.len(),
                self.longitudes.len()
            )));
        }
        Ok(())
    }

    pub fn n_times(&self) -> usize {
        self.times.len()
    }

    /// Number of cells in one time step.
    pub fn grid_len(&self) -> usize {
        self.latitudes.len() * self.longitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// The grid at time index `t`.
    pub fn time_slice(&self, t: usize) -> &[f32] {
        let n = self.grid_len();
        &self.data[t * n..(t + 1) * n]
    }

    /// First and last timestamp, if any.
    pub fn time_bounds(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        Some((*self.times.first()?, *self.times.last()?))
    }

    /// Copy of the metadata with replaced coordinates and data.
    pub(crate) fn with_parts(
        &self,
        times: Vec<NaiveDateTime>,
        latitudes: Vec<f64>,
        longitudes: Vec<f64>,
        data: Vec<f32>,
    ) -> Self {
        Self {
            source_id: self.source_id.clone(),
            variable_id: self.variable_id.clone(),
            variable_key: self.variable_key.clone(),
            units: self.units.clone(),
            long_name: self.long_name.clone(),
            times,
            latitudes,
            longitudes,
            data,
        }
    }

    /// Approximate heap size, used for memory cache accounting.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
            + (self.latitudes.len() + self.longitudes.len()) * std::mem::size_of::<f64>()
            + self.times.len() * std::mem::size_of::<NaiveDateTime>()
    }
}

/// NaN-skipping statistics over a selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Number of non-missing values.
    pub count: u64,
}

impl Summary {
    pub fn empty() -> Self {
        Self {
            mean: f64::NAN,
            min: f64::NAN,
            max: f64::NAN,
            count: 0,
        }
    }
}

/// A 2D (latitude x longitude) reduction over time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
    /// Row-major, latitude slowest.
    pub values: Vec<f32>,
    pub aggregation: ReductionMethod,
    pub units: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Statistics over the time-restricted data the layer was reduced from.
    pub summary: Summary,
}

impl Layer {
    pub fn shape(&self) -> (usize, usize) {
        (self.latitudes.len(), self.longitudes.len())
    }

    pub fn get(&self, lat_idx: usize, lon_idx: usize) -> Option<f32> {
        if lat_idx >= self.latitudes.len() || lon_idx >= self.longitudes.len() {
            return None;
        }
        self.values
            .get(lat_idx * self.longitudes.len() + lon_idx)
            .copied()
    }
}

/// One point of a time series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub time: NaiveDateTime,
    pub value: f64,
}

/// A 1D time-indexed reduction over space.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Series {
    pub points: Vec<SeriesPoint>,
}

impl Series {
    pub fn new(points: Vec<SeriesPoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.value)
    }
}
