//! Raw source reading.
//!
//! A source is one Zarr V3 store, or a directory of stores whose names
//! sort in time order (`era5_t2m_202001.zarr`, `era5_t2m_202002.zarr`).
//! Each store holds the variable at `/<variable_key>` with the dimension
//! names in `_ARRAY_DIMENSIONS` and coordinate vectors in `coordinates`.
//! Stores are normalized to (time, latitude, longitude) and concatenated
//! along time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDateTime;
use climate_common::time::parse_timestamp;
use climate_common::{CfTimeUnits, ExplorerError, ExplorerResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zarrs::array::{Array, DataType};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

use crate::types::RawDataset;

/// Tolerance when comparing coordinate vectors of different stores.
const COORD_TOLERANCE: f64 = 1e-6;

/// Per-source names of the coordinate dimensions.
///
/// Unset entries fall back to the usual aliases (`valid_time`, `lat`,
/// `lon`, `pressure_level`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinateKeys {
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub latitude: Option<String>,
    #[serde(default)]
    pub longitude: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Time,
    Latitude,
    Longitude,
    Level,
}

impl Axis {
    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            Axis::Time => "time",
            Axis::Latitude => "latitude",
            Axis::Longitude => "longitude",
            Axis::Level => "level",
        }
    }
}

impl CoordinateKeys {
    fn axis_of(&self, dim: &str) -> Option<Axis> {
        let overrides = [
            (&self.time, Axis::Time),
            (&self.latitude, Axis::Latitude),
            (&self.longitude, Axis::Longitude),
            (&self.level, Axis::Level),
        ];
        for (key, axis) in overrides {
            if key.as_deref() == Some(dim) {
                return Some(axis);
            }
        }

        match dim.to_lowercase().as_str() {
            "time" | "valid_time" | "t" => Some(Axis::Time),
            "latitude" | "lat" | "y" => Some(Axis::Latitude),
            "longitude" | "lon" | "x" => Some(Axis::Longitude),
            "level" | "pressure_level" | "lev" | "plev" => Some(Axis::Level),
            _ => None,
        }
    }
}

/// Where and how to read one (source, variable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLayout {
    pub path: PathBuf,
    pub variable_key: String,
    #[serde(default)]
    pub coordinates: CoordinateKeys,
}

/// One store, already normalized to (time, latitude, longitude).
#[derive(Debug)]
struct SourceChunk {
    path: PathBuf,
    times: Vec<NaiveDateTime>,
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
    data: Vec<f32>,
    units: Option<String>,
    long_name: Option<String>,
}

fn is_store(path: &Path) -> bool {
    path.is_dir()
        && (path.extension().map_or(false, |ext| ext == "zarr") || path.join("zarr.json").is_file())
}

/// List the stores of a source in time order.
pub fn list_stores(path: &Path) -> ExplorerResult<Vec<PathBuf>> {
    if is_store(path) {
        return Ok(vec![path.to_path_buf()]);
    }

    if !path.is_dir() {
        return Err(ExplorerError::SourceNotFound(path.display().to_string()));
    }

    let mut stores = Vec::new();
    for entry in WalkDir::new(path)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| ExplorerError::storage(e.to_string()))?;
        if is_store(entry.path()) {
            stores.push(entry.into_path());
        }
    }

    if stores.is_empty() {
        return Err(ExplorerError::SourceNotFound(path.display().to_string()));
    }
    Ok(stores)
}

/// Read, normalize and concatenate every store of a source.
pub fn load_dataset(
    source_id: &str,
    variable_id: &str,
    layout: &SourceLayout,
) -> ExplorerResult<RawDataset> {
    let started = Instant::now();
    let stores = list_stores(&layout.path)?;
    info!(
        source = source_id,
        variable = variable_id,
        stores = stores.len(),
        path = %layout.path.display(),
        "Reading raw source stores"
    );

    let chunks = stores
        .iter()
        .map(|store| read_store(store, &layout.variable_key, &layout.coordinates))
        .collect::<ExplorerResult<Vec<_>>>()?;

    let dataset = concat(source_id, variable_id, &layout.variable_key, chunks)?;
    info!(
        source = source_id,
        variable = variable_id,
        time_steps = dataset.n_times(),
        lat = dataset.latitudes.len(),
        lon = dataset.longitudes.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Loaded raw dataset"
    );
    Ok(dataset)
}

fn read_store(path: &Path, variable_key: &str, keys: &CoordinateKeys) -> ExplorerResult<SourceChunk> {
    let invalid = |msg: String| ExplorerError::invalid_source(format!("{}: {}", path.display(), msg));

    let store = FilesystemStore::new(path).map_err(|e| invalid(e.to_string()))?;
    let array_path = format!("/{}", variable_key);
    let array = Array::open(Arc::new(store), &array_path)
        .map_err(|e| invalid(format!("cannot open variable '{}': {}", variable_key, e)))?;

    let shape = array.shape().to_vec();
    let attrs = array.attributes();

    let dims: Vec<String> = attrs
        .get("_ARRAY_DIMENSIONS")
        .and_then(Value::as_array)
        .map(|v| v.iter().filter_map(|d| d.as_str().map(String::from)).collect())
        .ok_or_else(|| invalid("missing _ARRAY_DIMENSIONS".to_string()))?;
    if dims.len() != shape.len() {
        return Err(invalid(format!(
            "{} dimension names for a {}-D array",
            dims.len(),
            shape.len()
        )));
    }

    let mut positions: [Option<usize>; 4] = [None; 4];
    for (d, name) in dims.iter().enumerate() {
        match keys.axis_of(name) {
            Some(axis) => {
                if positions[axis.index()].is_some() {
                    return Err(invalid(format!("duplicate {} dimension", axis.name())));
                }
                positions[axis.index()] = Some(d);
            }
            None if shape[d] == 1 => {}
            None => {
                return Err(invalid(format!(
                    "unexpected dimension '{}' of size {}",
                    name, shape[d]
                )))
            }
        }
    }

    if let Some(d) = positions[Axis::Level.index()] {
        if shape[d] > 1 {
            return Err(invalid(format!(
                "level dimension '{}' has {} values; select a single level",
                dims[d], shape[d]
            )));
        }
    }

    let axis = |a: Axis| positions[a.index()].ok_or_else(|| invalid(format!("missing {} dimension", a.name())));
    let (t_dim, lat_dim, lon_dim) = (axis(Axis::Time)?, axis(Axis::Latitude)?, axis(Axis::Longitude)?);

    let coords = attrs
        .get("coordinates")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("missing coordinates".to_string()))?;

    let times = time_coordinate(coords, &dims[t_dim], shape[t_dim]).map_err(|e| invalid(e.to_string()))?;
    let latitudes = numeric_coordinate(coords, &dims[lat_dim], shape[lat_dim]).map_err(|e| invalid(e.to_string()))?;
    let longitudes = numeric_coordinate(coords, &dims[lon_dim], shape[lon_dim]).map_err(|e| invalid(e.to_string()))?;

    let mut raw: Vec<f32> = if shape.iter().product::<u64>() == 0 {
        Vec::new()
    } else {
        let subset = ArraySubset::new_with_start_shape(vec![0; shape.len()], shape.clone())
            .map_err(|e| invalid(e.to_string()))?;
        match array.data_type() {
            DataType::Float32 => array
                .retrieve_array_subset_elements::<f32>(&subset)
                .map_err(|e| invalid(e.to_string()))?,
            DataType::Float64 => array
                .retrieve_array_subset_elements::<f64>(&subset)
                .map_err(|e| invalid(e.to_string()))?
                .into_iter()
                .map(|v| v as f32)
                .collect(),
            other => return Err(invalid(format!("unsupported data type {:?}", other))),
        }
    };

    if let Some(missing) = attrs.get("missing_value").and_then(Value::as_f64) {
        let missing = missing as f32;
        raw.iter_mut().filter(|v| **v == missing).for_each(|v| *v = f32::NAN);
    }

    // row-major strides of the stored layout
    let mut strides = vec![1usize; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1] as usize;
    }

    let (nt, nlat, nlon) = (times.len(), latitudes.len(), longitudes.len());
    let mut data = Vec::with_capacity(nt * nlat * nlon);
    for t in 0..nt {
        for i in 0..nlat {
            for j in 0..nlon {
                data.push(raw[t * strides[t_dim] + i * strides[lat_dim] + j * strides[lon_dim]]);
            }
        }
    }

    debug!(store = %path.display(), time_steps = nt, dims = ?dims, "Read source store");

    Ok(SourceChunk {
        path: path.to_path_buf(),
        times,
        latitudes,
        longitudes,
        data,
        units: attrs.get("units").and_then(Value::as_str).map(String::from),
        long_name: attrs.get("long_name").and_then(Value::as_str).map(String::from),
    })
}

/// Values and optional units of one coordinate.
fn coordinate_entry<'a>(
    coords: &'a Map<String, Value>,
    name: &str,
) -> ExplorerResult<(&'a Vec<Value>, Option<&'a str>)> {
    match coords.get(name) {
        Some(Value::Array(values)) => Ok((values, None)),
        Some(Value::Object(obj)) => {
            let values = obj
                .get("values")
                .and_then(Value::as_array)
                .ok_or_else(|| ExplorerError::invalid_source(format!("coordinate '{}' has no values", name)))?;
            Ok((values, obj.get("units").and_then(Value::as_str)))
        }
        _ => Err(ExplorerError::invalid_source(format!(
            "missing coordinate '{}'",
            name
        ))),
    }
}

fn check_len(name: &str, found: usize, expected: u64) -> ExplorerResult<()> {
    if found as u64 != expected {
        return Err(ExplorerError::invalid_source(format!(
            "coordinate '{}' has {} values but the dimension has {}",
            name, found, expected
        )));
    }
    Ok(())
}

fn numeric_coordinate(coords: &Map<String, Value>, name: &str, len: u64) -> ExplorerResult<Vec<f64>> {
    let (values, _) = coordinate_entry(coords, name)?;
    check_len(name, values.len(), len)?;
    values
        .iter()
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                ExplorerError::invalid_source(format!("non-numeric value in coordinate '{}'", name))
            })
        })
        .collect()
}

fn time_coordinate(coords: &Map<String, Value>, name: &str, len: u64) -> ExplorerResult<Vec<NaiveDateTime>> {
    let (values, units) = coordinate_entry(coords, name)?;
    check_len(name, values.len(), len)?;
    let cf = units.map(CfTimeUnits::parse).transpose()?;

    values
        .iter()
        .map(|v| match v {
            Value::String(s) => parse_timestamp(s)
                .map_err(|_| ExplorerError::invalid_source(format!("invalid time value '{}'", s))),
            Value::Number(n) => {
                let cf = cf.ok_or_else(|| {
                    ExplorerError::invalid_source(format!("numeric time coordinate '{}' without units", name))
                })?;
                cf.to_timestamp(n.as_f64().unwrap_or(f64::NAN))
            }
            other => Err(ExplorerError::invalid_source(format!(
                "unsupported time value {}",
                other
            ))),
        })
        .collect()
}

fn same_coordinates(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= COORD_TOLERANCE)
}

fn concat(
    source_id: &str,
    variable_id: &str,
    variable_key: &str,
    chunks: Vec<SourceChunk>,
) -> ExplorerResult<RawDataset> {
    let mut chunks = chunks.into_iter();
    let first = chunks
        .next()
        .ok_or_else(|| ExplorerError::SourceNotFound(format!("{}/{}", source_id, variable_id)))?;

    let mut times = first.times;
    let mut data = first.data;
    for chunk in chunks {
        if !same_coordinates(&first.latitudes, &chunk.latitudes)
            || !same_coordinates(&first.longitudes, &chunk.longitudes)
        {
            return Err(ExplorerError::invalid_source(format!(
                "grid of {} differs from {}",
                chunk.path.display(),
                first.path.display()
            )));
        }
        times.extend(chunk.times);
        data.extend(chunk.data);
    }

    let n = first.latitudes.len() * first.longitudes.len();
    if !times.windows(2).all(|w| w[0] < w[1]) {
        warn!(
            source = source_id,
            variable = variable_id,
            "Time axis is not strictly increasing, reordering and dropping duplicates"
        );
        let mut order: Vec<usize> = (0..times.len()).collect();
        order.sort_by_key(|&t| times[t]);
        order.dedup_by_key(|t| times[*t]);

        let mut sorted_data = Vec::with_capacity(order.len() * n);
        for &t in &order {
            sorted_data.extend_from_slice(&data[t * n..(t + 1) * n]);
        }
        times = order.iter().map(|&t| times[t]).collect();
        data = sorted_data;
    }

    let dataset = RawDataset {
        source_id: source_id.to_string(),
        variable_id: variable_id.to_string(),
        variable_key: variable_key.to_string(),
        units: first.units.unwrap_or_default(),
        long_name: first.long_name.unwrap_or_else(|| variable_key.to_string()),
        times,
        latitudes: first.latitudes,
        longitudes: first.longitudes,
        data,
    };
    dataset.validate_shape()?;
    Ok(dataset)
}
