//! Error types for the climate explorer.

use thiserror::Error;

/// Result type alias using ExplorerError.
pub type ExplorerResult<T> = Result<T, ExplorerError>;

/// Who an error is meant for once it leaves the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAudience {
    /// Shown to the person using the explorer ("no data for this selection").
    User,
    /// Needs an operator: catalog and filesystem disagree, disk trouble.
    Operator,
    /// Recovered inside the core and never surfaced.
    Internal,
}

/// Primary error type for request resolution.
#[derive(Debug, Error)]
pub enum ExplorerError {
    // === Request Errors ===
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown dataset: {source_id}/{variable_id}")]
    UnknownDataset {
        source_id: String,
        variable_id: String,
    },

    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidRange { start: String, end: String },

    #[error("No time steps between {start} and {end}")]
    EmptyRange { start: String, end: String },

    #[error("Unsupported aggregation method: {0}")]
    UnsupportedAggregation(String),

    // === Source Data Errors ===
    #[error("No raw source files found at {0}")]
    SourceNotFound(String),

    #[error("Invalid raw source data: {0}")]
    InvalidSource(String),

    // === Cache Errors ===
    #[error("Cache miss: {namespace}/{key}")]
    CacheMiss { namespace: String, key: String },

    #[error("Corrupt cached artifact at {path}: {reason}")]
    CorruptArtifact { path: String, reason: String },

    // === Infrastructure Errors ===
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ExplorerError {
    pub fn corrupt(path: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::CorruptArtifact {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_source(msg: impl Into<String>) -> Self {
        Self::InvalidSource(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Classify the error by who has to act on it.
    pub fn audience(&self) -> ErrorAudience {
        match self {
            ExplorerError::InvalidRequest(_)
            | ExplorerError::UnknownDataset { .. }
            | ExplorerError::InvalidRange { .. }
            | ExplorerError::EmptyRange { .. }
            | ExplorerError::UnsupportedAggregation(_) => ErrorAudience::User,

            ExplorerError::CacheMiss { .. } | ExplorerError::CorruptArtifact { .. } => {
                ErrorAudience::Internal
            }

            ExplorerError::SourceNotFound(_)
            | ExplorerError::InvalidSource(_)
            | ExplorerError::Storage(_)
            | ExplorerError::Database(_)
            | ExplorerError::Config(_) => ErrorAudience::Operator,
        }
    }

    /// Cache read failures are recovered by recomputing.
    pub fn is_recoverable_cache_error(&self) -> bool {
        matches!(
            self,
            ExplorerError::CacheMiss { .. } | ExplorerError::CorruptArtifact { .. }
        )
    }

    /// Human-readable text for the presentation layer.
    pub fn user_message(&self) -> String {
        match self {
            ExplorerError::UnknownDataset { .. } => {
                "The selected dataset is not available.".to_string()
            }
            ExplorerError::InvalidRange { .. } | ExplorerError::EmptyRange { .. } => {
                "No data for this selection.".to_string()
            }
            ExplorerError::InvalidRequest(msg) => format!("Invalid selection: {}", msg),
            ExplorerError::UnsupportedAggregation(method) => {
                format!("Aggregation '{}' is not supported.", method)
            }
            ExplorerError::SourceNotFound(_) | ExplorerError::InvalidSource(_) => {
                "The dataset files are unavailable. Please contact the operator.".to_string()
            }
            _ => "An internal error occurred while preparing the data.".to_string(),
        }
    }
}

impl From<std::io::Error> for ExplorerError {
    fn from(err: std::io::Error) -> Self {
        ExplorerError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ExplorerError {
    fn from(err: serde_json::Error) -> Self {
        ExplorerError::InvalidRequest(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audience_classification() {
        let empty = ExplorerError::EmptyRange {
            start: "2020-01-01".into(),
            end: "2020-01-31".into(),
        };
        assert_eq!(empty.audience(), ErrorAudience::User);
        assert_eq!(empty.user_message(), "No data for this selection.");

        let missing = ExplorerError::SourceNotFound("/data/era5".into());
        assert_eq!(missing.audience(), ErrorAudience::Operator);

        let corrupt = ExplorerError::corrupt("layers/x.zarr", "missing latitude");
        assert_eq!(corrupt.audience(), ErrorAudience::Internal);
        assert!(corrupt.is_recoverable_cache_error());
        assert!(!missing.is_recoverable_cache_error());
    }

    #[test]
    fn test_io_error_maps_to_storage() {
        let err: ExplorerError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, ExplorerError::Storage(_)));
    }
}
