//! Configuration for the Zarr artifact codec.

use std::str::FromStr;

use climate_common::ExplorerError;
use serde::{Deserialize, Serialize};

/// Chunking and compression used when writing cached arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Chunk length along the time axis.
    pub time_chunk: usize,

    /// Chunk length along latitude and longitude.
    pub spatial_chunk: usize,

    /// Compression codec for Zarr arrays.
    pub compression: ZarrCompression,

    /// Compression level (1-9).
    pub compression_level: u8,

    /// Enable byte shuffle filter for better compression.
    pub shuffle: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            time_chunk: 24,
            spatial_chunk: 256,
            compression: ZarrCompression::BloscZstd,
            compression_level: 1,
            shuffle: true,
        }
    }
}

impl CodecConfig {
    /// Override defaults from environment variables.
    pub fn apply_env(mut self) -> Self {
        if let Ok(val) = std::env::var("ZARR_TIME_CHUNK") {
            if let Ok(size) = val.parse() {
                self.time_chunk = size;
            }
        }

        if let Ok(val) = std::env::var("ZARR_SPATIAL_CHUNK") {
            if let Ok(size) = val.parse() {
                self.spatial_chunk = size;
            }
        }

        if let Ok(val) = std::env::var("ZARR_COMPRESSION") {
            if let Ok(compression) = val.parse() {
                self.compression = compression;
            }
        }

        if let Ok(val) = std::env::var("ZARR_COMPRESSION_LEVEL") {
            if let Ok(level) = val.parse() {
                self.compression_level = level;
            }
        }

        if let Ok(val) = std::env::var("ZARR_SHUFFLE") {
            self.shuffle = val.to_lowercase() == "true" || val == "1";
        }

        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.time_chunk == 0 {
            return Err("time_chunk must be > 0".to_string());
        }

        if self.spatial_chunk == 0 {
            return Err("spatial_chunk must be > 0".to_string());
        }

        if self.compression != ZarrCompression::None
            && (self.compression_level == 0 || self.compression_level > 9)
        {
            return Err("compression_level must be 1-9".to_string());
        }

        Ok(())
    }

    /// Chunk shape for an array of the given shape.
    ///
    /// The first axis is treated as time when the array is 3-D.
    pub fn chunk_shape(&self, shape: &[u64]) -> Vec<u64> {
        let spatial_from = shape.len().saturating_sub(2);
        shape
            .iter()
            .enumerate()
            .map(|(axis, &len)| {
                let target = if axis < spatial_from {
                    self.time_chunk
                } else {
                    self.spatial_chunk
                } as u64;
                target.min(len).max(1)
            })
            .collect()
    }
}

/// Compression codec for Zarr arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZarrCompression {
    /// No compression.
    None,
    /// Blosc with LZ4.
    BloscLz4,
    /// Blosc with Zstd (recommended).
    #[default]
    BloscZstd,
}

impl ZarrCompression {
    /// Get the codec name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::BloscLz4 => "blosc_lz4",
            Self::BloscZstd => "blosc_zstd",
        }
    }
}

impl FromStr for ZarrCompression {
    type Err = ExplorerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "lz4" | "blosc_lz4" => Ok(Self::BloscLz4),
            "zstd" | "blosc_zstd" => Ok(Self::BloscZstd),
            other => Err(ExplorerError::Config(format!(
                "unknown compression '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ZarrCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
