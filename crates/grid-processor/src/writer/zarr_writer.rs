//! Zarr V3 writer for cached dataset and layer artifacts.

use std::path::Path;
use std::sync::Arc;

use climate_common::time::{format_date, format_timestamp};
use climate_common::{ExplorerError, ExplorerResult};
use serde_json::{json, Map, Value};
use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::{ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

use crate::config::{CodecConfig, ZarrCompression};
use super::values_checksum;
use crate::types::{Layer, RawDataset, Summary};

/// Result of writing a Zarr array.
#[derive(Debug)]
pub struct ZarrWriteResult {
    pub shape: Vec<u64>,
    pub chunk_shape: Vec<u64>,
    /// Uncompressed payload size.
    pub bytes_written: u64,
}

/// Writer for dataset and layer artifacts.
#[derive(Debug, Clone, Default)]
pub struct ZarrWriter {
    config: CodecConfig,
}

/// JSON encoding of a float that keeps NaN as `null`.
fn float_or_null(v: f64) -> Value {
    if v.is_finite() {
        json!(v)
    } else {
        Value::Null
    }
}

fn summary_to_json(summary: &Summary) -> Value {
    json!({
        "mean": float_or_null(summary.mean),
        "min": float_or_null(summary.min),
        "max": float_or_null(summary.max),
        "count": summary.count,
    })
}

impl ZarrWriter {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    /// Write a dataset as a 3-D `[time, latitude, longitude]` array rooted at `dir`.
    pub fn write_dataset(&self, dir: &Path, ds: &RawDataset) -> ExplorerResult<ZarrWriteResult> {
        ds.validate_shape()?;

        let mut attrs = Map::new();
        attrs.insert("_ARRAY_DIMENSIONS".to_string(), json!(["time", "latitude", "longitude"]));
        attrs.insert("source".to_string(), json!(ds.source_id));
        attrs.insert("variable".to_string(), json!(ds.variable_id));
        attrs.insert("variable_key".to_string(), json!(ds.variable_key));
        attrs.insert("units".to_string(), json!(ds.units));
        attrs.insert("long_name".to_string(), json!(ds.long_name));
        attrs.insert(
            "time".to_string(),
            json!(ds.times.iter().map(format_timestamp).collect::<Vec<_>>()),
        );
        attrs.insert("latitude".to_string(), json!(ds.latitudes));
        attrs.insert("longitude".to_string(), json!(ds.longitudes));

        let shape = vec![
            ds.times.len() as u64,
            ds.latitudes.len() as u64,
            ds.longitudes.len() as u64,
        ];
        self.write_array(dir, shape, &ds.data, attrs)
    }

    /// Write a layer as a 2-D `[latitude, longitude]` array rooted at `dir`.
    pub fn write_layer(&self, dir: &Path, layer: &Layer) -> ExplorerResult<ZarrWriteResult> {
        let (n_lat, n_lon) = layer.shape();
        if layer.values.len() != n_lat * n_lon {
            return Err(ExplorerError::storage(format!(
                "layer has {} values for a {}x{} grid",
                layer.values.len(),
                n_lat,
                n_lon
            )));
        }

        let mut attrs = Map::new();
        attrs.insert("_ARRAY_DIMENSIONS".to_string(), json!(["latitude", "longitude"]));
        attrs.insert("latitude".to_string(), json!(layer.latitudes));
        attrs.insert("longitude".to_string(), json!(layer.longitudes));
        attrs.insert("aggregation".to_string(), json!(layer.aggregation.as_str()));
        attrs.insert("units".to_string(), json!(layer.units));
        attrs.insert("start_date".to_string(), json!(format_date(&layer.start_date)));
        attrs.insert("end_date".to_string(), json!(format_date(&layer.end_date)));
        attrs.insert("summary".to_string(), summary_to_json(&layer.summary));

        self.write_array(dir, vec![n_lat as u64, n_lon as u64], &layer.values, attrs)
    }

    fn write_array(
        &self,
        dir: &Path,
        shape: Vec<u64>,
        data: &[f32],
        mut attrs: Map<String, Value>,
    ) -> ExplorerResult<ZarrWriteResult> {
        attrs.insert("checksum".to_string(), json!(values_checksum(data)));

        std::fs::create_dir_all(dir)?;
        let store = Arc::new(
            FilesystemStore::new(dir).map_err(|e| ExplorerError::storage(e.to_string()))?,
        );

        let chunk_shape = self.config.chunk_shape(&shape);
        let chunk_grid: zarrs::array::ChunkGrid = chunk_shape
            .clone()
            .try_into()
            .map_err(|e| ExplorerError::Config(format!("{:?}", e)))?;

        let mut binding = ArrayBuilder::new(
            shape.clone(),
            DataType::Float32,
            chunk_grid,
            FillValue::from(f32::NAN),
        );
        let mut builder = binding.attributes(attrs);

        if self.config.compression != ZarrCompression::None {
            let codec = self.create_compression_codec()?;
            builder = builder.bytes_to_bytes_codecs(vec![codec]);
        }

        let array = builder
            .build(store, "/")
            .map_err(|e| ExplorerError::storage(e.to_string()))?;

        array
            .store_metadata()
            .map_err(|e| ExplorerError::storage(e.to_string()))?;

        if !data.is_empty() {
            let subset = ArraySubset::new_with_start_shape(vec![0; shape.len()], shape.clone())
                .map_err(|e| ExplorerError::storage(e.to_string()))?;
            array
                .store_array_subset_elements(&subset, data)
                .map_err(|e| ExplorerError::storage(e.to_string()))?;
        }

        Ok(ZarrWriteResult {
            shape,
            chunk_shape,
            bytes_written: std::mem::size_of_val(data) as u64,
        })
    }

    /// Create the compression codec based on configuration.
    fn create_compression_codec(
        &self,
    ) -> ExplorerResult<Arc<dyn zarrs::array::codec::BytesToBytesCodecTraits>> {
        let level = BloscCompressionLevel::try_from(self.config.compression_level)
            .map_err(|_| ExplorerError::Config("invalid compression level".to_string()))?;

        let shuffle = if self.config.shuffle {
            BloscShuffleMode::Shuffle
        } else {
            BloscShuffleMode::NoShuffle
        };

        // typesize is required when shuffle is enabled
        let typesize = self.config.shuffle.then_some(std::mem::size_of::<f32>());

        let compressor = match self.config.compression {
            ZarrCompression::None => {
                return Err(ExplorerError::Config("no compression configured".to_string()))
            }
            ZarrCompression::BloscLz4 => BloscCompressor::LZ4,
            ZarrCompression::BloscZstd => BloscCompressor::Zstd,
        };

        let codec = BloscCodec::new(compressor, level, None, shuffle, typesize)
            .map_err(|e| ExplorerError::Config(e.to_string()))?;

        Ok(Arc::new(codec))
    }
}
