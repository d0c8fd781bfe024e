//! Tabular codec for series artifacts.
//!
//! One row per time step under a `time,value` header. Missing values
//! are written as `NaN`.

use std::path::Path;

use climate_common::time::{format_timestamp, parse_timestamp};
use climate_common::{ExplorerError, ExplorerResult};
use grid_processor::{Series, SeriesPoint};

const HEADER: [&str; 2] = ["time", "value"];

/// Write `series` to `path` and return the file size.
pub fn write_series(path: &Path, series: &Series) -> ExplorerResult<u64> {
    let storage_err = |e: csv::Error| ExplorerError::storage(format!("CSV write failed: {}", e));

    let mut writer = csv::Writer::from_path(path).map_err(storage_err)?;
    writer.write_record(HEADER).map_err(storage_err)?;
    for point in &series.points {
        writer
            .write_record([format_timestamp(&point.time), point.value.to_string()])
            .map_err(storage_err)?;
    }
    writer.flush()?;

    Ok(std::fs::metadata(path)?.len())
}

/// Read a series written by [`write_series`].
pub fn read_series(path: &Path) -> ExplorerResult<Series> {
    let corrupt = |reason: String| ExplorerError::corrupt(path.display(), reason);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| corrupt(e.to_string()))?;

    let headers = reader.headers().map_err(|e| corrupt(e.to_string()))?;
    if headers.iter().ne(HEADER) {
        return Err(corrupt(format!("unexpected header {:?}", headers)));
    }

    let mut points = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| corrupt(e.to_string()))?;
        if record.len() != 2 {
            return Err(corrupt(format!("row {} has {} fields", line + 1, record.len())));
        }
        let time = parse_timestamp(&record[0])
            .map_err(|_| corrupt(format!("row {}: bad time '{}'", line + 1, &record[0])))?;
        let value: f64 = record[1]
            .trim()
            .parse()
            .map_err(|_| corrupt(format!("row {}: bad value '{}'", line + 1, &record[1])))?;
        points.push(SeriesPoint { time, value });
    }

    Ok(Series::new(points))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn series() -> Series {
        let t0 = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        Series::new(vec![
            SeriesPoint { time: t0, value: 271.25 },
            SeriesPoint {
                time: t0 + chrono::Duration::days(1),
                value: f64::NAN,
            },
            SeriesPoint {
                time: t0 + chrono::Duration::days(2),
                value: 0.1 + 0.2,
            },
        ])
    }

    #[test]
    fn test_layout_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.csv");
        write_series(&path, &series()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "time,value");
        assert_eq!(lines[1], "2020-01-01T00:00:00,271.25");
        assert_eq!(lines[2], "2020-01-02T00:00:00,NaN");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_values_survive_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.csv");
        write_series(&path, &series()).unwrap();

        let back = read_series(&path).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back.points[0], series().points[0]);
        assert!(back.points[1].value.is_nan());
        assert_eq!(back.points[2].value, 0.1 + 0.2);
    }

    #[test]
    fn test_empty_series() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        write_series(&path, &Series::new(Vec::new())).unwrap();
        assert!(read_series(&path).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_header_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "date,mean\n2020-01-01,1.0\n").unwrap();
        assert!(matches!(
            read_series(&path),
            Err(ExplorerError::CorruptArtifact { .. })
        ));
    }

    #[test]
    fn test_bad_row_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "time,value\n2020-01-01T00:00:00,warm\n").unwrap();
        assert!(matches!(
            read_series(&path),
            Err(ExplorerError::CorruptArtifact { .. })
        ));
    }
}
