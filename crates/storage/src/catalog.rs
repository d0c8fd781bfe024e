//! Dataset catalog using SQLite.
//!
//! The catalog maps (source, variable) to the location of the raw
//! stores. Resolvers only read from it; the administration operations
//! (`register_*`, `set_available`) are used by the CLI.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use tracing::{debug, info};

use climate_common::time::format_date;
use climate_common::{ExploreRequest, ExplorerError, ExplorerResult, RequestDescriptor};
use grid_processor::{CoordinateKeys, SourceLayout};

fn default_available() -> bool {
    true
}

/// A raw data source for one (source, variable).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub source_id: String,
    pub variable_id: String,
    /// Name of the variable inside the raw stores.
    pub variable_key: String,
    pub path: PathBuf,
    #[serde(default)]
    pub units: String,
    #[serde(default)]
    pub long_name: String,
    #[serde(default = "default_available")]
    pub available: bool,
    #[serde(default)]
    pub coordinates: CoordinateKeys,
}

impl DatasetDescriptor {
    pub fn layout(&self) -> SourceLayout {
        SourceLayout {
            path: self.path.clone(),
            variable_key: self.variable_key.clone(),
            coordinates: self.coordinates.clone(),
        }
    }

    fn matches(&self, source_id: &str, variable_id: &str) -> bool {
        self.source_id == source_id && self.variable_id == variable_id
    }
}

/// One entry of the request log, as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub source: String,
    pub variable: String,
    pub start_date: String,
    pub end_date: String,
    pub aggregation: String,
    pub region: String,
    pub valid: bool,
}

impl RequestRecord {
    /// A request that passed validation.
    pub fn accepted(desc: &RequestDescriptor) -> Self {
        Self {
            source: desc.source_id.clone(),
            variable: desc.variable_id.clone(),
            start_date: format_date(&desc.start_date),
            end_date: format_date(&desc.end_date),
            aggregation: desc.aggregation.as_str().to_string(),
            region: desc
                .region
                .as_ref()
                .map(|r| r.cache_key())
                .unwrap_or_default(),
            valid: true,
        }
    }

    /// A request rejected at the boundary, logged with its raw fields.
    pub fn rejected(req: &ExploreRequest) -> Self {
        Self {
            source: req.source_id.clone(),
            variable: req.variable_id.clone(),
            start_date: req.start_date.clone(),
            end_date: req.end_date.clone(),
            aggregation: req.aggregation.clone(),
            region: req.region.as_ref().map(|r| r.cache_key()).unwrap_or_default(),
            valid: false,
        }
    }
}

/// Aggregated view of the request log.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RequestHistoryEntry {
    pub id: i64,
    pub source: String,
    pub variable: String,
    pub start_date: String,
    pub end_date: String,
    pub aggregation: String,
    pub region: String,
    pub n_request: i64,
    pub valid_request: bool,
    pub last_executed_at: Option<String>,
}

/// Read access to the datasets the explorer can serve.
#[async_trait]
pub trait DatasetCatalog: Send + Sync {
    /// All datasets currently marked available.
    async fn get_available_datasets(&self) -> ExplorerResult<Vec<DatasetDescriptor>>;

    /// Find a dataset, available or not.
    ///
    /// `source_id` and `variable_id` match either the name or the numeric
    /// catalog id.
    async fn lookup(
        &self,
        source_id: &str,
        variable_id: &str,
    ) -> ExplorerResult<Option<DatasetDescriptor>>;

    /// Raw data location of an available dataset.
    async fn get_path(&self, source_id: &str, variable_id: &str) -> ExplorerResult<Option<PathBuf>> {
        Ok(self
            .lookup(source_id, variable_id)
            .await?
            .filter(|d| d.available)
            .map(|d| d.path))
    }

    /// Append to the request log. Catalogs without one ignore it.
    async fn record_request(&self, _record: &RequestRecord) -> ExplorerResult<()> {
        Ok(())
    }
}

/// Database connection pool and catalog operations.
pub struct Catalog {
    pool: SqlitePool,
}

fn db_err(context: &str) -> impl Fn(sqlx::Error) -> ExplorerError + '_ {
    move |e| ExplorerError::Database(format!("{}: {}", context, e))
}

impl Catalog {
    /// Open (or create) the catalog database at `path`.
    pub async fn connect(path: &Path) -> ExplorerResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_err("Connection failed"))?;

        info!(path = %path.display(), "Opened catalog database");
        Ok(Self { pool })
    }

    /// Open an in-memory database (for testing).
    pub async fn in_memory() -> ExplorerResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true)
            .foreign_keys(true);

        // every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(db_err("Connection failed"))?;

        Ok(Self { pool })
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> ExplorerResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(db_err("Migration failed"))?;
            }
        }
        Ok(())
    }

    /// Insert or update a source and its coordinate-name overrides.
    pub async fn register_source(&self, name: &str, coordinates: &CoordinateKeys) -> ExplorerResult<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO sources (name, time_key, lat_key, lon_key, lvl_key)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (name) DO UPDATE SET
                time_key = excluded.time_key,
                lat_key = excluded.lat_key,
                lon_key = excluded.lon_key,
                lvl_key = excluded.lvl_key
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(&coordinates.time)
        .bind(&coordinates.latitude)
        .bind(&coordinates.longitude)
        .bind(&coordinates.level)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("Insert failed"))
    }

    /// Insert or update a variable.
    pub async fn register_variable(&self, name: &str, long_name: &str, units: &str) -> ExplorerResult<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO variables (name, long_name, units)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (name) DO UPDATE SET
                long_name = excluded.long_name,
                units = excluded.units
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(long_name)
        .bind(units)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("Insert failed"))
    }

    /// Register a dataset together with its source and variable.
    pub async fn register_dataset(&self, desc: &DatasetDescriptor) -> ExplorerResult<i64> {
        let source_id = self.register_source(&desc.source_id, &desc.coordinates).await?;
        let variable_id = self
            .register_variable(&desc.variable_id, &desc.long_name, &desc.units)
            .await?;

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO datasets (source_id, variable_id, variable_key, path, available)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (source_id, variable_id, variable_key) DO UPDATE SET
                path = excluded.path,
                available = excluded.available
            RETURNING id
            "#,
        )
        .bind(source_id)
        .bind(variable_id)
        .bind(&desc.variable_key)
        .bind(desc.path.to_string_lossy().into_owned())
        .bind(desc.available)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("Insert failed"))?;

        debug!(
            source = %desc.source_id,
            variable = %desc.variable_id,
            path = %desc.path.display(),
            "Registered dataset"
        );
        Ok(id)
    }

    /// Mark every dataset of (source, variable) available or not.
    pub async fn set_available(
        &self,
        source_id: &str,
        variable_id: &str,
        available: bool,
    ) -> ExplorerResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE datasets SET available = ?3
            WHERE source_id IN (SELECT id FROM sources WHERE name = ?1)
              AND variable_id IN (SELECT id FROM variables WHERE name = ?2)
            "#,
        )
        .bind(source_id)
        .bind(variable_id)
        .bind(available)
        .execute(&self.pool)
        .await
        .map_err(db_err("Update failed"))?;

        Ok(result.rows_affected())
    }

    /// Log one request and its execution time.
    ///
    /// Identical requests share a row whose `n_request` counts them.
    pub async fn log_request(&self, record: &RequestRecord) -> ExplorerResult<i64> {
        let request_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO requests (source, variable, start_date, end_date, aggregation, region, valid_request)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (source, variable, start_date, end_date, aggregation, region) DO UPDATE SET
                n_request = n_request + 1,
                valid_request = excluded.valid_request
            RETURNING id
            "#,
        )
        .bind(&record.source)
        .bind(&record.variable)
        .bind(&record.start_date)
        .bind(&record.end_date)
        .bind(&record.aggregation)
        .bind(&record.region)
        .bind(record.valid)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("Insert failed"))?;

        sqlx::query("INSERT INTO request_executions (request_id, executed_at) VALUES (?1, ?2)")
            .bind(request_id)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(db_err("Insert failed"))?;

        Ok(request_id)
    }

    /// Most recently executed requests first.
    pub async fn request_history(&self, limit: u32) -> ExplorerResult<Vec<RequestHistoryEntry>> {
        sqlx::query_as::<_, RequestHistoryEntry>(
            r#"
            SELECT r.id, r.source, r.variable, r.start_date, r.end_date, r.aggregation, r.region,
                   r.n_request, r.valid_request, MAX(e.executed_at) AS last_executed_at
            FROM requests r
            LEFT JOIN request_executions e ON e.request_id = r.id
            GROUP BY r.id
            ORDER BY last_executed_at DESC, r.id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Query failed"))
    }
}

#[async_trait]
impl DatasetCatalog for Catalog {
    async fn get_available_datasets(&self) -> ExplorerResult<Vec<DatasetDescriptor>> {
        let rows = sqlx::query_as::<_, DatasetRow>(&format!(
            "{} WHERE d.available = 1 ORDER BY s.name, v.name",
            DATASET_SELECT
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Query failed"))?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn lookup(
        &self,
        source_id: &str,
        variable_id: &str,
    ) -> ExplorerResult<Option<DatasetDescriptor>> {
        let row = sqlx::query_as::<_, DatasetRow>(&format!(
            "{} WHERE (s.name = ?1 OR CAST(s.id AS TEXT) = ?1) \
             AND (v.name = ?2 OR CAST(v.id AS TEXT) = ?2) \
             ORDER BY (s.name = ?1) DESC, (v.name = ?2) DESC, d.available DESC, d.id LIMIT 1",
            DATASET_SELECT
        ))
        .bind(source_id)
        .bind(variable_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Query failed"))?;

        Ok(row.map(|r| r.into()))
    }

    async fn record_request(&self, record: &RequestRecord) -> ExplorerResult<()> {
        self.log_request(record).await.map(|_| ())
    }
}

/// Datasets read from a YAML file instead of the database.
///
/// ```yaml
/// datasets:
///   - source_id: ERA5
///     variable_id: t2m
///     variable_key: t2m
///     path: /data/era5/t2m
///     units: K
///     coordinates:
///       time: valid_time
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticCatalog {
    pub datasets: Vec<DatasetDescriptor>,
}

impl StaticCatalog {
    pub fn new(datasets: Vec<DatasetDescriptor>) -> Self {
        Self { datasets }
    }

    pub fn from_yaml(path: &Path) -> ExplorerResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExplorerError::Config(format!("Failed to read catalog {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ExplorerResult<Self> {
        let catalog: StaticCatalog = serde_yaml::from_str(content)
            .map_err(|e| ExplorerError::Config(format!("Invalid catalog file: {}", e)))?;

        for (i, a) in catalog.datasets.iter().enumerate() {
            if catalog.datasets[..i]
                .iter()
                .any(|b| b.matches(&a.source_id, &a.variable_id))
            {
                return Err(ExplorerError::Config(format!(
                    "Duplicate catalog entry for {}/{}",
                    a.source_id, a.variable_id
                )));
            }
        }
        Ok(catalog)
    }
}

#[async_trait]
impl DatasetCatalog for StaticCatalog {
    async fn get_available_datasets(&self) -> ExplorerResult<Vec<DatasetDescriptor>> {
        Ok(self.datasets.iter().filter(|d| d.available).cloned().collect())
    }

    async fn lookup(
        &self,
        source_id: &str,
        variable_id: &str,
    ) -> ExplorerResult<Option<DatasetDescriptor>> {
        Ok(self
            .datasets
            .iter()
            .find(|d| d.matches(source_id, variable_id))
            .cloned())
    }
}

const DATASET_SELECT: &str = "SELECT s.name AS source_name, v.name AS variable_name, \
     d.variable_key, d.path, v.units, v.long_name, d.available, \
     s.time_key, s.lat_key, s.lon_key, s.lvl_key \
     FROM datasets d \
     JOIN sources s ON s.id = d.source_id \
     JOIN variables v ON v.id = d.variable_id";

/// Internal row type for dataset queries.
#[derive(FromRow)]
struct DatasetRow {
    source_name: String,
    variable_name: String,
    variable_key: String,
    path: String,
    units: String,
    long_name: String,
    available: bool,
    time_key: Option<String>,
    lat_key: Option<String>,
    lon_key: Option<String>,
    lvl_key: Option<String>,
}

impl From<DatasetRow> for DatasetDescriptor {
    fn from(row: DatasetRow) -> Self {
        DatasetDescriptor {
            source_id: row.source_name,
            variable_id: row.variable_name,
            variable_key: row.variable_key,
            path: PathBuf::from(row.path),
            units: row.units,
            long_name: row.long_name,
            available: row.available,
            coordinates: CoordinateKeys {
                time: row.time_key,
                latitude: row.lat_key,
                longitude: row.lon_key,
                level: row.lvl_key,
            },
        }
    }
}

/// Database schema SQL.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    time_key TEXT,
    lat_key TEXT,
    lon_key TEXT,
    lvl_key TEXT
);

CREATE TABLE IF NOT EXISTS variables (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    long_name TEXT NOT NULL DEFAULT '',
    units TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS datasets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES sources(id),
    variable_id INTEGER NOT NULL REFERENCES variables(id),
    variable_key TEXT NOT NULL,
    path TEXT NOT NULL,
    available BOOLEAN NOT NULL DEFAULT 1,

    UNIQUE(source_id, variable_id, variable_key)
);

CREATE INDEX IF NOT EXISTS idx_datasets_available ON datasets(available);

CREATE TABLE IF NOT EXISTS requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    variable TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    aggregation TEXT NOT NULL,
    region TEXT NOT NULL DEFAULT '',
    n_request INTEGER NOT NULL DEFAULT 1,
    valid_request BOOLEAN NOT NULL DEFAULT 1,

    UNIQUE(source, variable, start_date, end_date, aggregation, region)
);

CREATE TABLE IF NOT EXISTS request_executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id INTEGER NOT NULL REFERENCES requests(id),
    executed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_request_executions_request ON request_executions(request_id)
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use climate_common::{Aggregation, DateRange, RequestKind};

    fn era5_t2m() -> DatasetDescriptor {
        DatasetDescriptor {
            source_id: "ERA5".to_string(),
            variable_id: "t2m".to_string(),
            variable_key: "t2m".to_string(),
            path: PathBuf::from("/data/era5/t2m"),
            units: "K".to_string(),
            long_name: "2 metre temperature".to_string(),
            available: true,
            coordinates: CoordinateKeys {
                time: Some("valid_time".to_string()),
                ..Default::default()
            },
        }
    }

    async fn catalog() -> Catalog {
        let catalog = Catalog::in_memory().await.unwrap();
        catalog.migrate().await.unwrap();
        catalog
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let catalog = catalog().await;
        catalog.register_dataset(&era5_t2m()).await.unwrap();

        let found = catalog.lookup("ERA5", "t2m").await.unwrap().unwrap();
        assert_eq!(found, era5_t2m());
        assert_eq!(found.layout().coordinates.time.as_deref(), Some("valid_time"));

        assert!(catalog.lookup("ERA5", "tp").await.unwrap().is_none());
        assert_eq!(
            catalog.get_path("ERA5", "t2m").await.unwrap(),
            Some(PathBuf::from("/data/era5/t2m"))
        );
    }

    #[tokio::test]
    async fn test_lookup_by_numeric_id() {
        let catalog = catalog().await;
        catalog.register_dataset(&era5_t2m()).await.unwrap();

        let found = catalog.lookup("1", "1").await.unwrap().unwrap();
        assert_eq!(found.source_id, "ERA5");
        assert_eq!(found.variable_id, "t2m");
    }

    #[tokio::test]
    async fn test_lookup_prefers_name_over_numeric_id() {
        let catalog = catalog().await;
        let with_source = |name: &str| DatasetDescriptor {
            source_id: name.to_string(),
            path: PathBuf::from(format!("/data/{}/t2m", name)),
            ..era5_t2m()
        };
        catalog.register_dataset(&with_source("ERA5")).await.unwrap();
        catalog.register_dataset(&with_source("CERRA")).await.unwrap();
        catalog.register_dataset(&with_source("2")).await.unwrap();
        assert_eq!(catalog.register_source("CERRA", &CoordinateKeys::default()).await.unwrap(), 2);

        let found = catalog.lookup("2", "t2m").await.unwrap().unwrap();
        assert_eq!(found.source_id, "2");
        assert_eq!(found.path, PathBuf::from("/data/2/t2m"));

        // ids still resolve when no name matches
        let found = catalog.lookup("1", "t2m").await.unwrap().unwrap();
        assert_eq!(found.source_id, "ERA5");
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent_and_register_upserts() {
        let catalog = catalog().await;
        catalog.migrate().await.unwrap();

        let first = catalog.register_dataset(&era5_t2m()).await.unwrap();
        let mut moved = era5_t2m();
        moved.path = PathBuf::from("/mnt/era5");
        let second = catalog.register_dataset(&moved).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(catalog.get_available_datasets().await.unwrap(), vec![moved]);
    }

    #[tokio::test]
    async fn test_unavailable_datasets_are_hidden() {
        let catalog = catalog().await;
        catalog.register_dataset(&era5_t2m()).await.unwrap();

        assert_eq!(catalog.set_available("ERA5", "t2m", false).await.unwrap(), 1);
        assert!(catalog.get_available_datasets().await.unwrap().is_empty());
        assert!(catalog.get_path("ERA5", "t2m").await.unwrap().is_none());

        // still resolvable by lookup, flagged unavailable
        let found = catalog.lookup("ERA5", "t2m").await.unwrap().unwrap();
        assert!(!found.available);
    }

    #[tokio::test]
    async fn test_request_log_counts_repeats() {
        let catalog = catalog().await;
        let range = DateRange::new(
            chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2020, 1, 31).unwrap(),
        )
        .unwrap();
        let desc = RequestDescriptor::new("ERA5", "t2m", range, Aggregation::Mean, RequestKind::Layer);
        let record = RequestRecord::accepted(&desc);

        let a = catalog.log_request(&record).await.unwrap();
        let b = catalog.log_request(&record).await.unwrap();
        assert_eq!(a, b);

        let rejected = RequestRecord::rejected(&ExploreRequest {
            source_id: "ERA5".to_string(),
            variable_id: "t2m".to_string(),
            start_date: "2020-02-30".to_string(),
            end_date: "2020-03-01".to_string(),
            aggregation: "mean".to_string(),
            region: None,
        });
        catalog.log_request(&rejected).await.unwrap();

        let history = catalog.request_history(10).await.unwrap();
        assert_eq!(history.len(), 2);
        let accepted = history.iter().find(|h| h.id == a).unwrap();
        assert_eq!(accepted.n_request, 2);
        assert!(accepted.valid_request);
        assert_eq!(accepted.start_date, "2020-01-01");
        assert!(accepted.last_executed_at.is_some());
        assert!(history.iter().any(|h| !h.valid_request && h.start_date == "2020-02-30"));
    }

    #[tokio::test]
    async fn test_static_catalog() {
        let yaml = r#"
datasets:
  - source_id: ERA5
    variable_id: t2m
    variable_key: t2m
    path: /data/era5/t2m
    units: K
  - source_id: ERA5
    variable_id: tp
    variable_key: tp
    path: /data/era5/tp
    available: false
"#;
        let catalog = StaticCatalog::from_yaml_str(yaml).unwrap();
        let available = catalog.get_available_datasets().await.unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].units, "K");
        assert!(catalog.get_path("ERA5", "tp").await.unwrap().is_none());
        assert!(catalog.lookup("ERA5", "tp").await.unwrap().is_some());
        // the default no-op log
        catalog
            .record_request(&RequestRecord::accepted(&RequestDescriptor::new(
                "ERA5",
                "t2m",
                DateRange::single(chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()),
                Aggregation::Sum,
                RequestKind::Layer,
            )))
            .await
            .unwrap();
    }

    #[test]
    fn test_static_catalog_rejects_duplicates() {
        let yaml = r#"
datasets:
  - { source_id: A, variable_id: v, variable_key: v, path: /a }
  - { source_id: A, variable_id: v, variable_key: w, path: /b }
"#;
        assert!(matches!(
            StaticCatalog::from_yaml_str(yaml),
            Err(ExplorerError::Config(_))
        ));
    }
}
