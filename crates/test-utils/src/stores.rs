//! Writers for synthetic raw source stores.
//!
//! Stores follow the layout the explorer reads: a Zarr V3 group with the
//! variable array at `/<variable_key>`, dimension names in
//! `_ARRAY_DIMENSIONS` and coordinate vectors in `coordinates`.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde_json::{json, Map, Value};
use zarrs::array::{ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::GroupBuilder;
use zarrs_filesystem::FilesystemStore;

/// How the time coordinate is written.
#[derive(Debug, Clone)]
pub enum TimeEncoding {
    /// ISO 8601 strings.
    Iso,
    /// CF offsets, e.g. `hours since 1900-01-01 00:00:00`.
    CfHours { reference: NaiveDateTime },
}

/// Builder for one raw source store.
#[derive(Debug, Clone)]
pub struct SourceStoreBuilder {
    variable_key: String,
    time_name: String,
    lat_name: String,
    lon_name: String,
    times: Vec<NaiveDateTime>,
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
    levels: Option<(String, Vec<f64>)>,
    /// (time, lat, lon) order
    data: Vec<f32>,
    time_encoding: TimeEncoding,
    lon_before_lat: bool,
    units: Option<String>,
    long_name: Option<String>,
}

impl SourceStoreBuilder {
    pub fn new(variable_key: &str) -> Self {
        Self {
            variable_key: variable_key.to_string(),
            time_name: "time".to_string(),
            lat_name: "latitude".to_string(),
            lon_name: "longitude".to_string(),
            times: Vec::new(),
            latitudes: Vec::new(),
            longitudes: Vec::new(),
            levels: None,
            data: Vec::new(),
            time_encoding: TimeEncoding::Iso,
            lon_before_lat: false,
            units: None,
            long_name: None,
        }
    }

    /// Rename the dimensions (e.g. `valid_time`, `lat`, `lon`).
    pub fn dim_names(mut self, time: &str, lat: &str, lon: &str) -> Self {
        self.time_name = time.to_string();
        self.lat_name = lat.to_string();
        self.lon_name = lon.to_string();
        self
    }

    pub fn grid(mut self, latitudes: Vec<f64>, longitudes: Vec<f64>) -> Self {
        self.latitudes = latitudes;
        self.longitudes = longitudes;
        self
    }

    pub fn times(mut self, times: Vec<NaiveDateTime>) -> Self {
        self.times = times;
        self
    }

    pub fn time_encoding(mut self, encoding: TimeEncoding) -> Self {
        self.time_encoding = encoding;
        self
    }

    /// Add a level dimension between time and latitude.
    pub fn levels(mut self, name: &str, values: Vec<f64>) -> Self {
        self.levels = Some((name.to_string(), values));
        self
    }

    /// Store longitude before latitude.
    pub fn lon_before_lat(mut self) -> Self {
        self.lon_before_lat = true;
        self
    }

    /// Values in (time, latitude, longitude) order regardless of layout.
    pub fn data(mut self, data: Vec<f32>) -> Self {
        self.data = data;
        self
    }

    pub fn units(mut self, units: &str) -> Self {
        self.units = Some(units.to_string());
        self
    }

    pub fn long_name(mut self, long_name: &str) -> Self {
        self.long_name = Some(long_name.to_string());
        self
    }

    fn time_coordinate(&self) -> Value {
        match &self.time_encoding {
            TimeEncoding::Iso => json!(self
                .times
                .iter()
                .map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string())
                .collect::<Vec<_>>()),
            TimeEncoding::CfHours { reference } => json!({
                "values": self
                    .times
                    .iter()
                    .map(|t| (*t - *reference).num_seconds() as f64 / 3600.0)
                    .collect::<Vec<_>>(),
                "units": format!("hours since {}", reference.format("%Y-%m-%d %H:%M:%S")),
            }),
        }
    }

    /// Write the store at `path` and return it.
    pub fn write(&self, path: &Path) -> Result<PathBuf, Box<dyn Error>> {
        let (nt, nlat, nlon) = (self.times.len(), self.latitudes.len(), self.longitudes.len());
        if self.data.len() != nt * nlat * nlon {
            return Err(format!(
                "data has {} values for a {}x{}x{} grid",
                self.data.len(),
                nt,
                nlat,
                nlon
            )
            .into());
        }
        let nlev = self.levels.as_ref().map_or(1, |(_, v)| v.len());

        let mut dims = vec![self.time_name.clone()];
        let mut shape = vec![nt as u64];
        if let Some((name, values)) = &self.levels {
            dims.push(name.clone());
            shape.push(values.len() as u64);
        }
        if self.lon_before_lat {
            dims.extend([self.lon_name.clone(), self.lat_name.clone()]);
            shape.extend([nlon as u64, nlat as u64]);
        } else {
            dims.extend([self.lat_name.clone(), self.lon_name.clone()]);
            shape.extend([nlat as u64, nlon as u64]);
        }

        // reorder into the stored layout, repeating each step per level
        let mut stored = Vec::with_capacity(self.data.len() * nlev);
        for t in 0..nt {
            let slice = &self.data[t * nlat * nlon..(t + 1) * nlat * nlon];
            for _ in 0..nlev {
                if self.lon_before_lat {
                    for j in 0..nlon {
                        for i in 0..nlat {
                            stored.push(slice[i * nlon + j]);
                        }
                    }
                } else {
                    stored.extend_from_slice(slice);
                }
            }
        }

        let mut coordinates = Map::new();
        coordinates.insert(self.time_name.clone(), self.time_coordinate());
        coordinates.insert(self.lat_name.clone(), json!(self.latitudes));
        coordinates.insert(self.lon_name.clone(), json!(self.longitudes));
        if let Some((name, values)) = &self.levels {
            coordinates.insert(name.clone(), json!(values));
        }

        let mut attrs = Map::new();
        attrs.insert("_ARRAY_DIMENSIONS".to_string(), json!(dims));
        attrs.insert("coordinates".to_string(), Value::Object(coordinates));
        if let Some(units) = &self.units {
            attrs.insert("units".to_string(), json!(units));
        }
        if let Some(long_name) = &self.long_name {
            attrs.insert("long_name".to_string(), json!(long_name));
        }

        std::fs::create_dir_all(path)?;
        let store = Arc::new(FilesystemStore::new(path)?);
        GroupBuilder::new().build(store.clone(), "/")?.store_metadata()?;

        let chunk_shape: Vec<u64> = shape.iter().map(|&s| s.max(1)).collect();
        let array = ArrayBuilder::new(
            shape.clone(),
            DataType::Float32,
            chunk_shape.try_into()?,
            FillValue::from(f32::NAN),
        )
        .attributes(attrs)
        .build(store.clone(), &format!("/{}", self.variable_key))?;
        array.store_metadata()?;

        if !stored.is_empty() {
            let subset = ArraySubset::new_with_start_shape(vec![0; shape.len()], shape)?;
            array.store_array_subset_elements(&subset, &stored)?;
        }

        Ok(path.to_path_buf())
    }
}
