//! Aggregation engine.
//!
//! Pure functions over in-memory datasets: no caching, no I/O. All
//! reductions skip missing values (NaN); a reduction with no valid input
//! yields NaN rather than an error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use climate_common::time::format_date;
use climate_common::{BoundingBox, DateRange, ExplorerError, ExplorerResult, ReductionMethod};
use metrics::counter;
use tracing::debug;

use crate::types::{Layer, RawDataset, Series, SeriesPoint, Summary};

/// Running state of a NaN-skipping reduction.
#[derive(Debug, Clone, Copy)]
struct Accumulator {
    acc: f64,
    count: u64,
}

impl Accumulator {
    fn new(method: ReductionMethod) -> Self {
        let acc = match method {
            ReductionMethod::Mean | ReductionMethod::Sum => 0.0,
            ReductionMethod::Max => f64::NEG_INFINITY,
            ReductionMethod::Min => f64::INFINITY,
        };
        Self { acc, count: 0 }
    }

    #[inline]
    fn push(&mut self, method: ReductionMethod, v: f64) {
        if v.is_nan() {
            return;
        }
        self.count += 1;
        match method {
            ReductionMethod::Mean | ReductionMethod::Sum => self.acc += v,
            ReductionMethod::Max => self.acc = self.acc.max(v),
            ReductionMethod::Min => self.acc = self.acc.min(v),
        }
    }

    fn finish(&self, method: ReductionMethod) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        match method {
            ReductionMethod::Mean => self.acc / self.count as f64,
            _ => self.acc,
        }
    }
}

/// Reduce a sequence of values, skipping NaN.
pub fn reduce_values<I>(values: I, method: ReductionMethod) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let mut acc = Accumulator::new(method);
    for v in values {
        acc.push(method, v);
    }
    acc.finish(method)
}

/// Keep the time steps whose calendar day lies in `[start, end]`.
///
/// The result may have zero time steps; deciding whether that is an
/// error is up to the caller.
pub fn restrict_time(ds: &RawDataset, start: NaiveDate, end: NaiveDate) -> ExplorerResult<RawDataset> {
    let range = DateRange::new(start, end)?;
    let n = ds.grid_len();

    let mut times = Vec::new();
    let mut data = Vec::new();
    for (t, ts) in ds.times.iter().enumerate() {
        if range.contains(ts) {
            times.push(*ts);
            data.extend_from_slice(&ds.data[t * n..(t + 1) * n]);
        }
    }

    Ok(ds.with_parts(times, ds.latitudes.clone(), ds.longitudes.clone(), data))
}

fn lon_in_bbox(bbox: &BoundingBox, lon: f64) -> bool {
    // sources may use 0..360 while boxes use -180..180
    bbox.contains_lon(lon) || bbox.contains_lon(lon - 360.0) || bbox.contains_lon(lon + 360.0)
}

/// Keep the grid cells inside `bbox`.
pub fn restrict_space(ds: &RawDataset, bbox: &BoundingBox) -> ExplorerResult<RawDataset> {
    let lat_idx: Vec<usize> = (0..ds.latitudes.len())
        .filter(|&i| bbox.contains_lat(ds.latitudes[i]))
        .collect();
    let lon_idx: Vec<usize> = (0..ds.longitudes.len())
        .filter(|&j| lon_in_bbox(bbox, ds.longitudes[j]))
        .collect();

    if lat_idx.is_empty() || lon_idx.is_empty() {
        return Err(ExplorerError::InvalidRequest(format!(
            "region {} contains no grid points",
            bbox.cache_key()
        )));
    }

    let n_lon = ds.longitudes.len();
    let mut data = Vec::with_capacity(ds.n_times() * lat_idx.len() * lon_idx.len());
    for t in 0..ds.n_times() {
        let slice = ds.time_slice(t);
        for &i in &lat_idx {
            for &j in &lon_idx {
                data.push(slice[i * n_lon + j]);
            }
        }
    }

    let latitudes = lat_idx.iter().map(|&i| ds.latitudes[i]).collect();
    let longitudes = lon_idx.iter().map(|&j| ds.longitudes[j]).collect();
    Ok(ds.with_parts(ds.times.clone(), latitudes, longitudes, data))
}

/// Mean, min and max over every value of the dataset.
pub fn summarize(ds: &RawDataset) -> Summary {
    let mut mean = Accumulator::new(ReductionMethod::Mean);
    let mut min = Accumulator::new(ReductionMethod::Min);
    let mut max = Accumulator::new(ReductionMethod::Max);

    for &v in &ds.data {
        let v = v as f64;
        mean.push(ReductionMethod::Mean, v);
        min.push(ReductionMethod::Min, v);
        max.push(ReductionMethod::Max, v);
    }

    if mean.count == 0 {
        return Summary::empty();
    }

    Summary {
        mean: mean.finish(ReductionMethod::Mean),
        min: min.finish(ReductionMethod::Min),
        max: max.finish(ReductionMethod::Max),
        count: mean.count,
    }
}

/// Reduce over the time axis, producing a layer.
///
/// The layer's dates are the calendar days of the first and last time
/// step. Fails with `EmptyRange` when the dataset has no time steps.
pub fn reduce_time(ds: &RawDataset, method: ReductionMethod) -> ExplorerResult<Layer> {
    let (first, last) = ds.time_bounds().ok_or_else(|| ExplorerError::EmptyRange {
        start: "-".to_string(),
        end: "-".to_string(),
    })?;

    let n = ds.grid_len();
    let mut cells = vec![Accumulator::new(method); n];
    for t in 0..ds.n_times() {
        for (cell, &v) in cells.iter_mut().zip(ds.time_slice(t)) {
            cell.push(method, v as f64);
        }
    }

    Ok(Layer {
        latitudes: ds.latitudes.clone(),
        longitudes: ds.longitudes.clone(),
        values: cells.iter().map(|c| c.finish(method) as f32).collect(),
        aggregation: method,
        units: ds.units.clone(),
        start_date: first.date(),
        end_date: last.date(),
        summary: summarize(ds),
    })
}

/// Reduce over both spatial axes, one value per time step.
pub fn reduce_space(ds: &RawDataset, method: ReductionMethod) -> ExplorerResult<Series> {
    let points = ds
        .times
        .iter()
        .enumerate()
        .map(|(t, time)| SeriesPoint {
            time: *time,
            value: reduce_values(ds.time_slice(t).iter().map(|&v| v as f64), method),
        })
        .collect();
    Ok(Series::new(points))
}

/// Index of the coordinate closest to `target`.
pub fn nearest_index(coords: &[f64], target: f64, periodic: bool) -> Option<usize> {
    let distance = |c: f64| {
        let d = (c - target).abs();
        if periodic {
            d.min((d - 360.0).abs())
        } else {
            d
        }
    };

    coords
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_finite())
        .min_by(|(_, a), (_, b)| distance(**a).total_cmp(&distance(**b)))
        .map(|(i, _)| i)
}

/// Time series at the grid point nearest to (`lat`, `lon`).
pub fn point_series(ds: &RawDataset, lat: f64, lon: f64) -> ExplorerResult<Series> {
    if !lat.is_finite() || !lon.is_finite() {
        return Err(ExplorerError::InvalidRequest(format!(
            "invalid point ({}, {})",
            lat, lon
        )));
    }

    let i = nearest_index(&ds.latitudes, lat, false);
    let j = nearest_index(&ds.longitudes, lon, true);
    let (i, j) = match (i, j) {
        (Some(i), Some(j)) => (i, j),
        _ => {
            return Err(ExplorerError::InvalidRequest(
                "dataset has an empty grid".to_string(),
            ))
        }
    };

    let offset = i * ds.longitudes.len() + j;
    let points = ds
        .times
        .iter()
        .enumerate()
        .map(|(t, time)| SeriesPoint {
            time: *time,
            value: ds.time_slice(t)[offset] as f64,
        })
        .collect();
    Ok(Series::new(points))
}

/// Aggregation engine front-end that counts its invocations.
///
/// Clones share the same counter, so a resolver and a test can observe
/// the same number.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    invocations: Arc<AtomicU64>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of engine operations run through this aggregator.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    fn record(&self, operation: &'static str, started: Instant) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        counter!("explorer_aggregations_total", "operation" => operation).increment(1);
        debug!(
            operation,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "aggregation finished"
        );
    }

    pub fn restrict_time(&self, ds: &RawDataset, range: &DateRange) -> ExplorerResult<RawDataset> {
        let started = Instant::now();
        let out = restrict_time(ds, range.start, range.end);
        self.record("restrict_time", started);
        out
    }

    pub fn restrict_space(&self, ds: &RawDataset, bbox: &BoundingBox) -> ExplorerResult<RawDataset> {
        let started = Instant::now();
        let out = restrict_space(ds, bbox);
        self.record("restrict_space", started);
        out
    }

    pub fn reduce_time(&self, ds: &RawDataset, method: ReductionMethod) -> ExplorerResult<Layer> {
        let started = Instant::now();
        let out = reduce_time(ds, method);
        self.record("reduce_time", started);
        out
    }

    pub fn reduce_space(&self, ds: &RawDataset, method: ReductionMethod) -> ExplorerResult<Series> {
        let started = Instant::now();
        let out = reduce_space(ds, method);
        self.record("reduce_space", started);
        out
    }

    pub fn point_series(&self, ds: &RawDataset, lat: f64, lon: f64) -> ExplorerResult<Series> {
        let started = Instant::now();
        let out = point_series(ds, lat, lon);
        self.record("point_series", started);
        out
    }
}

/// Fail with `EmptyRange` if a restricted dataset has no time steps.
pub fn ensure_not_empty(ds: &RawDataset, range: &DateRange) -> ExplorerResult<()> {
    if ds.is_empty() {
        return Err(ExplorerError::EmptyRange {
            start: format_date(&range.start),
            end: format_date(&range.end),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDateTime};

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn dataset(n_times: usize, n_lat: usize, n_lon: usize, f: impl Fn(usize, usize, usize) -> f32) -> RawDataset {
        let t0: NaiveDateTime = day(2020, 1, 1).and_hms_opt(0, 0, 0).unwrap();
        let mut data = Vec::new();
        for t in 0..n_times {
            for i in 0..n_lat {
                for j in 0..n_lon {
                    data.push(f(t, i, j));
                }
            }
        }
        RawDataset {
            source_id: "ERA5".into(),
            variable_id: "t2m".into(),
            variable_key: "t2m".into(),
            units: "K".into(),
            long_name: "2 metre temperature".into(),
            times: (0..n_times).map(|t| t0 + Duration::days(t as i64)).collect(),
            latitudes: (0..n_lat).map(|i| 50.0 - i as f64).collect(),
            longitudes: (0..n_lon).map(|j| -5.0 + j as f64).collect(),
            data,
        }
    }

    #[test]
    fn test_reduce_time_constant_field() {
        let ds = dataset(10, 3, 4, |_, _, _| 2.5);

        let mean = reduce_time(&ds, ReductionMethod::Mean).unwrap();
        assert!(mean.values.iter().all(|&v| v == 2.5));
        assert_eq!(mean.shape(), (3, 4));
        assert_eq!(mean.start_date, day(2020, 1, 1));
        assert_eq!(mean.end_date, day(2020, 1, 10));

        let sum = reduce_time(&ds, ReductionMethod::Sum).unwrap();
        assert!(sum.values.iter().all(|&v| (v - 25.0).abs() < 1e-5));
    }

    #[test]
    fn test_reduce_time_skips_nan() {
        let ds = dataset(4, 1, 2, |t, _, j| {
            if j == 0 && t % 2 == 0 {
                f32::NAN
            } else if j == 1 {
                f32::NAN
            } else {
                t as f32
            }
        });

        let layer = reduce_time(&ds, ReductionMethod::Mean).unwrap();
        // column 0 has values at t=1 and t=3
        assert_eq!(layer.get(0, 0), Some(2.0));
        // column 1 is all missing
        assert!(layer.get(0, 1).unwrap().is_nan());

        let sum = reduce_time(&ds, ReductionMethod::Sum).unwrap();
        assert_eq!(sum.get(0, 0), Some(4.0));
        assert!(sum.get(0, 1).unwrap().is_nan());

        assert_eq!(layer.summary.count, 2);
        assert_eq!(layer.summary.min, 1.0);
        assert_eq!(layer.summary.max, 3.0);
    }

    #[test]
    fn test_reduce_time_empty_dataset() {
        let ds = dataset(0, 2, 2, |_, _, _| 0.0);
        assert!(matches!(
            reduce_time(&ds, ReductionMethod::Mean),
            Err(ExplorerError::EmptyRange { .. })
        ));
    }

    #[test]
    fn test_restrict_time_inclusive() {
        let ds = dataset(31, 2, 2, |t, _, _| t as f32);

        let one = restrict_time(&ds, day(2020, 1, 5), day(2020, 1, 5)).unwrap();
        assert_eq!(one.n_times(), 1);
        assert_eq!(one.time_slice(0), &[4.0, 4.0, 4.0, 4.0]);

        let week = restrict_time(&ds, day(2020, 1, 1), day(2020, 1, 7)).unwrap();
        assert_eq!(week.n_times(), 7);
        assert_eq!(week.data.len(), 7 * 4);

        let none = restrict_time(&ds, day(2021, 1, 1), day(2021, 1, 31)).unwrap();
        assert!(none.is_empty());

        assert!(matches!(
            restrict_time(&ds, day(2020, 1, 7), day(2020, 1, 1)),
            Err(ExplorerError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_restrict_space() {
        let ds = dataset(2, 5, 5, |_, i, j| (i * 10 + j) as f32);
        // latitudes 50..46, longitudes -5..-1
        let bbox = BoundingBox::new(-4.0, 47.0, -3.0, 48.0);
        let sub = restrict_space(&ds, &bbox).unwrap();
        assert_eq!(sub.latitudes, vec![48.0, 47.0]);
        assert_eq!(sub.longitudes, vec![-4.0, -3.0]);
        assert_eq!(sub.time_slice(0), &[21.0, 22.0, 31.0, 32.0]);
        assert_eq!(sub.n_times(), 2);

        let outside = BoundingBox::new(100.0, 0.0, 110.0, 10.0);
        assert!(matches!(
            restrict_space(&ds, &outside),
            Err(ExplorerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_reduce_space() {
        let ds = dataset(3, 2, 2, |t, i, j| if i == 0 && j == 0 { f32::NAN } else { t as f32 + 1.0 });
        let series = reduce_space(&ds, ReductionMethod::Mean).unwrap();
        assert_eq!(series.len(), 3);
        let values: Vec<f64> = series.values().collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);

        let sums: Vec<f64> = reduce_space(&ds, ReductionMethod::Sum).unwrap().values().collect();
        assert_eq!(sums, vec![3.0, 6.0, 9.0]);
    }

    #[test]
    fn test_point_series_nearest() {
        let ds = dataset(3, 5, 5, |t, i, j| (t * 100 + i * 10 + j) as f32);
        let series = point_series(&ds, 47.8, -3.9).unwrap();
        let values: Vec<f64> = series.values().collect();
        assert_eq!(values, vec![21.0, 121.0, 221.0]);

        // 355 degrees east is -5
        let wrapped = point_series(&ds, 50.0, 355.0).unwrap();
        assert_eq!(wrapped.points[0].value, 0.0);
    }

    #[test]
    fn test_aggregator_counts_invocations() {
        let ds = dataset(5, 2, 2, |_, _, _| 1.0);
        let agg = Aggregator::new();
        let shared = agg.clone();
        let range = DateRange::new(day(2020, 1, 1), day(2020, 1, 3)).unwrap();

        let sub = agg.restrict_time(&ds, &range).unwrap();
        agg.reduce_time(&sub, ReductionMethod::Mean).unwrap();
        agg.reduce_space(&sub, ReductionMethod::Mean).unwrap();

        assert_eq!(shared.invocations(), 3);
        assert!(ensure_not_empty(&sub, &range).is_ok());
    }

    #[test]
    fn test_reduce_values_all_nan() {
        let all_nan = vec![f64::NAN; 4];
        for method in [
            ReductionMethod::Mean,
            ReductionMethod::Sum,
            ReductionMethod::Max,
            ReductionMethod::Min,
        ] {
            assert!(reduce_values(all_nan.iter().copied(), method).is_nan());
        }
        assert_eq!(reduce_values([1.0, 5.0, f64::NAN], ReductionMethod::Max), 5.0);
        assert_eq!(reduce_values([1.0, 5.0, f64::NAN], ReductionMethod::Min), 1.0);
    }
}
