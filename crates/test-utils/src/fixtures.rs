//! Common test fixtures for climate explorer tests.
//!
//! The ERA5-like fixture is a small daily grid over the Iberian
//! peninsula, one store per month, written the way the reanalysis
//! downloads arrive (`valid_time`, CF hours since 1900).

use std::error::Error;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

use crate::generators::create_axis;
use crate::stores::{SourceStoreBuilder, TimeEncoding};

/// Common bounding box definitions for testing, as (min_lon, min_lat, max_lon, max_lat).
pub mod bbox {
    /// The fixture grid's north-west quarter.
    pub const NORTH_WEST: (f64, f64, f64, f64) = (-4.0, 41.0, -3.0, 42.0);

    /// Entirely outside the fixture grid.
    pub const ATLANTIC: (f64, f64, f64, f64) = (-40.0, 30.0, -30.0, 35.0);
}

/// ERA5-like fixture constants.
pub mod era5 {
    pub const SOURCE: &str = "ERA5";
    pub const VARIABLE: &str = "t2m";
    pub const VARIABLE_KEY: &str = "t2m";
    pub const UNITS: &str = "K";
    pub const LONG_NAME: &str = "2 metre temperature";
    pub const N_LAT: usize = 4;
    pub const N_LON: usize = 5;
}

/// Fixture latitudes (north to south, like ERA5).
pub fn era5_latitudes() -> Vec<f64> {
    create_axis(42.0, -1.0, era5::N_LAT)
}

/// Fixture longitudes.
pub fn era5_longitudes() -> Vec<f64> {
    create_axis(-4.0, 1.0, era5::N_LON)
}

/// Every day of a month at 00:00.
pub fn daily_times(year: i32, month: u32) -> Vec<NaiveDateTime> {
    let mut times = Vec::new();
    let mut day = NaiveDate::from_ymd_opt(year, month, 1).expect("valid fixture date");
    while day.month() == month {
        times.push(day.and_hms_opt(0, 0, 0).expect("valid fixture date"));
        day += Duration::days(1);
    }
    times
}

/// Deterministic 2 m temperature for the fixture.
///
/// Warms by 0.1 K per day since 2020-01-01, 2 K per latitude row and
/// 0.5 K per longitude column.
pub fn era5_t2m_value(time: NaiveDateTime, lat_idx: usize, lon_idx: usize) -> f32 {
    let origin = NaiveDate::from_ymd_opt(2020, 1, 1)
        .expect("valid fixture date")
        .and_hms_opt(0, 0, 0)
        .expect("valid fixture date");
    let days = (time - origin).num_days() as f32;
    270.0 + lat_idx as f32 * 2.0 + lon_idx as f32 * 0.5 + days * 0.1
}

/// Write one monthly store named `era5_<key>_<YYYYMM>.zarr` under `dir`.
pub fn write_era5_month(dir: &Path, year: i32, month: u32) -> Result<PathBuf, Box<dyn Error>> {
    let times = daily_times(year, month);
    let mut data = Vec::with_capacity(times.len() * era5::N_LAT * era5::N_LON);
    for t in &times {
        for i in 0..era5::N_LAT {
            for j in 0..era5::N_LON {
                data.push(era5_t2m_value(*t, i, j));
            }
        }
    }

    let reference = NaiveDate::from_ymd_opt(1900, 1, 1)
        .expect("valid fixture date")
        .and_hms_opt(0, 0, 0)
        .expect("valid fixture date");
    let path = dir.join(format!("era5_{}_{}{:02}.zarr", era5::VARIABLE_KEY, year, month));

    SourceStoreBuilder::new(era5::VARIABLE_KEY)
        .dim_names("valid_time", "latitude", "longitude")
        .grid(era5_latitudes(), era5_longitudes())
        .times(times)
        .time_encoding(TimeEncoding::CfHours { reference })
        .data(data)
        .units(era5::UNITS)
        .long_name(era5::LONG_NAME)
        .write(&path)
}

/// Write January and February 2020 into `dir` and return `dir`.
pub fn write_era5_source(dir: &Path) -> Result<PathBuf, Box<dyn Error>> {
    std::fs::create_dir_all(dir)?;
    // written out of order on purpose; readers sort by name
    write_era5_month(dir, 2020, 2)?;
    write_era5_month(dir, 2020, 1)?;
    Ok(dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daily_times() {
        assert_eq!(daily_times(2020, 1).len(), 31);
        assert_eq!(daily_times(2020, 2).len(), 29);
        assert_eq!(daily_times(2021, 2).len(), 28);
    }

    #[test]
    fn test_era5_value_progression() {
        let jan1 = daily_times(2020, 1)[0];
        let jan2 = daily_times(2020, 1)[1];
        assert_eq!(era5_t2m_value(jan1, 0, 0), 270.0);
        assert!((era5_t2m_value(jan2, 0, 0) - 270.1).abs() < 1e-4);
        assert_eq!(era5_t2m_value(jan1, 1, 2), 273.0);
    }

    #[test]
    fn test_write_era5_source() {
        let dir = tempfile::tempdir().unwrap();
        let root = write_era5_source(&dir.path().join("era5")).unwrap();
        assert!(root.join("era5_t2m_202001.zarr/t2m/zarr.json").is_file());
        assert!(root.join("era5_t2m_202002.zarr/zarr.json").is_file());
    }
}
