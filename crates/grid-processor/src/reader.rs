//! Reader for cached dataset and layer artifacts.
//!
//! Any inconsistency between the stored array and its attributes is
//! reported as `CorruptArtifact` so callers can recompute.

use std::path::Path;
use std::sync::Arc;

use climate_common::time::{parse_date, parse_timestamp};
use climate_common::{ExplorerError, ExplorerResult, ReductionMethod};
use serde_json::{Map, Value};
use zarrs::array::{Array, DataType};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

use crate::types::{Layer, RawDataset, Summary};
use crate::writer::values_checksum;

struct Attrs<'a> {
    path: &'a Path,
    map: &'a Map<String, Value>,
}

impl<'a> Attrs<'a> {
    fn corrupt(&self, reason: impl Into<String>) -> ExplorerError {
        ExplorerError::corrupt(self.path.display(), reason)
    }

    fn get(&self, name: &str) -> ExplorerResult<&'a Value> {
        self.map
            .get(name)
            .ok_or_else(|| self.corrupt(format!("missing attribute '{}'", name)))
    }

    fn string(&self, name: &str) -> ExplorerResult<String> {
        self.get(name)?
            .as_str()
            .map(String::from)
            .ok_or_else(|| self.corrupt(format!("attribute '{}' is not a string", name)))
    }

    fn floats(&self, name: &str, expected: u64) -> ExplorerResult<Vec<f64>> {
        let values = self
            .get(name)?
            .as_array()
            .ok_or_else(|| self.corrupt(format!("attribute '{}' is not an array", name)))?;
        if values.len() as u64 != expected {
            return Err(self.corrupt(format!(
                "'{}' has {} values but the array dimension has {}",
                name,
                values.len(),
                expected
            )));
        }
        values
            .iter()
            .map(|v| {
                v.as_f64()
                    .ok_or_else(|| self.corrupt(format!("non-numeric value in '{}'", name)))
            })
            .collect()
    }

    /// Absent chunks read back as fill values, so only the stored digest
    /// tells a damaged array from a sparse one.
    fn verify_checksum(&self, values: &[f32]) -> ExplorerResult<()> {
        if self.string("checksum")? != values_checksum(values) {
            return Err(self.corrupt("data does not match its checksum (missing or damaged chunks)"));
        }
        Ok(())
    }
}

fn open(path: &Path) -> ExplorerResult<Array<FilesystemStore>> {
    let store = FilesystemStore::new(path).map_err(|e| ExplorerError::corrupt(path.display(), e.to_string()))?;
    Array::open(Arc::new(store), "/").map_err(|e| ExplorerError::corrupt(path.display(), e.to_string()))
}

fn read_values(path: &Path, array: &Array<FilesystemStore>, ndim: usize) -> ExplorerResult<Vec<f32>> {
    let shape = array.shape().to_vec();
    if shape.len() != ndim {
        return Err(ExplorerError::corrupt(
            path.display(),
            format!("expected {} dimensions, found {}", ndim, shape.len()),
        ));
    }
    if !matches!(array.data_type(), DataType::Float32) {
        return Err(ExplorerError::corrupt(path.display(), "expected float32 data"));
    }
    if shape.iter().product::<u64>() == 0 {
        return Ok(Vec::new());
    }

    let subset = ArraySubset::new_with_start_shape(vec![0; ndim], shape)
        .map_err(|e| ExplorerError::corrupt(path.display(), e.to_string()))?;
    array
        .retrieve_array_subset_elements::<f32>(&subset)
        .map_err(|e| ExplorerError::corrupt(path.display(), e.to_string()))
}

/// Read a dataset artifact written by [`crate::ZarrWriter::write_dataset`].
pub fn read_dataset(path: &Path) -> ExplorerResult<RawDataset> {
    let array = open(path)?;
    let data = read_values(path, &array, 3)?;
    let shape = array.shape();
    let attrs = Attrs {
        path,
        map: array.attributes(),
    };
    attrs.verify_checksum(&data)?;

    let times = attrs
        .get("time")?
        .as_array()
        .ok_or_else(|| attrs.corrupt("attribute 'time' is not an array"))?
        .iter()
        .map(|v| {
            v.as_str()
                .and_then(|s| parse_timestamp(s).ok())
                .ok_or_else(|| attrs.corrupt(format!("invalid time value {}", v)))
        })
        .collect::<ExplorerResult<Vec<_>>>()?;
    if times.len() as u64 != shape[0] {
        return Err(attrs.corrupt(format!(
            "'time' has {} values but the array has {} time steps",
            times.len(),
            shape[0]
        )));
    }

    Ok(RawDataset {
        source_id: attrs.string("source")?,
        variable_id: attrs.string("variable")?,
        variable_key: attrs.string("variable_key")?,
        units: attrs.string("units")?,
        long_name: attrs.string("long_name")?,
        times,
        latitudes: attrs.floats("latitude", shape[1])?,
        longitudes: attrs.floats("longitude", shape[2])?,
        data,
    })
}

fn summary_from_json(attrs: &Attrs<'_>) -> ExplorerResult<Summary> {
    let obj = attrs
        .get("summary")?
        .as_object()
        .ok_or_else(|| attrs.corrupt("attribute 'summary' is not an object"))?;

    let field = |name: &str| -> ExplorerResult<f64> {
        match obj.get(name) {
            Some(Value::Null) => Ok(f64::NAN),
            Some(v) => v
                .as_f64()
                .ok_or_else(|| attrs.corrupt(format!("summary '{}' is not a number", name))),
            None => Err(attrs.corrupt(format!("summary is missing '{}'", name))),
        }
    };

    Ok(Summary {
        mean: field("mean")?,
        min: field("min")?,
        max: field("max")?,
        count: obj
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| attrs.corrupt("summary is missing 'count'"))?,
    })
}

/// Read a layer artifact written by [`crate::ZarrWriter::write_layer`].
pub fn read_layer(path: &Path) -> ExplorerResult<Layer> {
    let array = open(path)?;
    let values = read_values(path, &array, 2)?;
    let shape = array.shape();
    let attrs = Attrs {
        path,
        map: array.attributes(),
    };
    attrs.verify_checksum(&values)?;

    let aggregation: ReductionMethod = attrs
        .string("aggregation")?
        .parse()
        .map_err(|_| attrs.corrupt("unknown aggregation"))?;
    let date = |name: &str| -> ExplorerResult<chrono::NaiveDate> {
        parse_date(&attrs.string(name)?).map_err(|_| attrs.corrupt(format!("invalid '{}'", name)))
    };

    Ok(Layer {
        latitudes: attrs.floats("latitude", shape[0])?,
        longitudes: attrs.floats("longitude", shape[1])?,
        values,
        aggregation,
        units: attrs.string("units")?,
        start_date: date("start_date")?,
        end_date: date("end_date")?,
        summary: summary_from_json(&attrs)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CodecConfig, ZarrCompression};
    use crate::writer::ZarrWriter;
    use chrono::{Duration, NaiveDate};

    fn sample_dataset() -> RawDataset {
        let t0 = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let n = 5 * 3 * 4;
        let mut data: Vec<f32> = (0..n).map(|v| v as f32 * 0.5).collect();
        data[7] = f32::NAN;
        RawDataset {
            source_id: "ERA5".into(),
            variable_id: "t2m".into(),
            variable_key: "t2m".into(),
            units: "K".into(),
            long_name: "2 metre temperature".into(),
            times: (0..5).map(|d| t0 + Duration::hours(6 * d)).collect(),
            latitudes: vec![40.0, 39.75, 39.5],
            longitudes: vec![-3.0, -2.75, -2.5, -2.25],
            data,
        }
    }

    #[test]
    fn test_dataset_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ds.zarr");
        let ds = sample_dataset();

        let config = CodecConfig {
            time_chunk: 2,
            spatial_chunk: 2,
            ..Default::default()
        };
        let result = ZarrWriter::new(config).write_dataset(&path, &ds).unwrap();
        assert_eq!(result.shape, vec![5, 3, 4]);
        assert_eq!(result.chunk_shape, vec![2, 2, 2]);

        let loaded = read_dataset(&path).unwrap();
        assert_eq!(loaded.times, ds.times);
        assert_eq!(loaded.latitudes, ds.latitudes);
        assert_eq!(loaded.longitudes, ds.longitudes);
        assert_eq!(loaded.units, "K");
        assert_eq!(loaded.long_name, ds.long_name);
        assert!(loaded.data[7].is_nan());
        for (i, (a, b)) in loaded.data.iter().zip(&ds.data).enumerate() {
            if i != 7 {
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn test_layer_store_then_load_uncompressed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layer.zarr");
        let ds = sample_dataset();
        let layer = crate::aggregate::reduce_time(&ds, ReductionMethod::Sum).unwrap();

        let config = CodecConfig {
            compression: ZarrCompression::None,
            ..Default::default()
        };
        ZarrWriter::new(config).write_layer(&path, &layer).unwrap();

        let loaded = read_layer(&path).unwrap();
        assert_eq!(loaded.aggregation, ReductionMethod::Sum);
        assert_eq!(loaded.start_date, layer.start_date);
        assert_eq!(loaded.end_date, layer.end_date);
        assert_eq!(loaded.summary, layer.summary);
        assert_eq!(loaded.values, layer.values);
    }

    #[test]
    fn test_missing_attribute_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layer.zarr");
        let layer = crate::aggregate::reduce_time(&sample_dataset(), ReductionMethod::Mean).unwrap();
        ZarrWriter::default().write_layer(&path, &layer).unwrap();

        // A dataset reader expects three dimensions
        assert!(matches!(
            read_dataset(&path),
            Err(ExplorerError::CorruptArtifact { .. })
        ));

        // Garbage metadata
        std::fs::write(path.join("zarr.json"), b"{ not json").unwrap();
        assert!(matches!(
            read_layer(&path),
            Err(ExplorerError::CorruptArtifact { .. })
        ));
    }

    #[test]
    fn test_missing_chunk_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ds.zarr");
        let config = CodecConfig {
            time_chunk: 2,
            spatial_chunk: 2,
            compression: ZarrCompression::None,
            ..Default::default()
        };
        ZarrWriter::new(config).write_dataset(&path, &sample_dataset()).unwrap();
        assert!(read_dataset(&path).is_ok());

        // Chunk (0, 0, 0) holds non-NaN values, so it is always on disk
        std::fs::remove_file(path.join("c").join("0").join("0").join("0")).unwrap();
        assert!(matches!(
            read_dataset(&path),
            Err(ExplorerError::CorruptArtifact { .. })
        ));
    }

    #[test]
    fn test_all_nan_layer_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layer.zarr");
        let mut ds = sample_dataset();
        ds.data.iter_mut().for_each(|v| *v = f32::NAN);
        let layer = crate::aggregate::reduce_time(&ds, ReductionMethod::Mean).unwrap();
        ZarrWriter::default().write_layer(&path, &layer).unwrap();

        let loaded = read_layer(&path).unwrap();
        assert!(loaded.values.iter().all(|v| v.is_nan()));
    }
}
