//! On-disk artifact cache.
//!
//! Three namespaces live under the cache root, one entry per cache key:
//!
//! ```text
//! <root>/datasets/<key>.zarr
//! <root>/layers/<key>.zarr
//! <root>/series/<key>.csv
//! ```
//!
//! Entries are written under `<namespace>/.tmp-<uuid>` and renamed into
//! place, so readers never see a partial artifact. A concurrent writer
//! for the same key just replaces the entry (last writer wins).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use climate_common::{CacheKey, ExplorerError, ExplorerResult};
use grid_processor::{reader, CodecConfig, Layer, RawDataset, Series, ZarrWriter};

use crate::series_csv;

const TMP_PREFIX: &str = ".tmp-";
const TRASH_PREFIX: &str = ".trash-";

/// Leftover temporaries younger than this may belong to a live write.
const ORPHAN_GRACE_MINUTES: i64 = 60;

/// Size-based pruning stops at this fraction of `max_bytes`.
const PRUNE_LOW_WATER: f64 = 0.9;

const MAX_AGE_HOURS_CAP: u64 = 1_000_000;

/// Artifact namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Datasets,
    Layers,
    Series,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Namespace::Datasets, Namespace::Layers, Namespace::Series];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Namespace::Datasets => "datasets",
            Namespace::Layers => "layers",
            Namespace::Series => "series",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Namespace::Datasets | Namespace::Layers => "zarr",
            Namespace::Series => "csv",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Namespace {
    type Err = ExplorerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Namespace::ALL
            .into_iter()
            .find(|ns| ns.dir_name() == s)
            .ok_or_else(|| ExplorerError::InvalidRequest(format!("unknown cache namespace '{}'", s)))
    }
}

/// A value that can be stored in the artifact cache.
pub trait Artifact: Sized {
    const NAMESPACE: Namespace;

    /// Serialize to `path` (a directory for Zarr artifacts, a file otherwise).
    fn write_to(&self, path: &Path, writer: &ZarrWriter) -> ExplorerResult<()>;

    /// Deserialize from `path`, failing with `CorruptArtifact` on any mismatch.
    fn read_from(path: &Path) -> ExplorerResult<Self>;
}

impl Artifact for RawDataset {
    const NAMESPACE: Namespace = Namespace::Datasets;

    fn write_to(&self, path: &Path, writer: &ZarrWriter) -> ExplorerResult<()> {
        writer.write_dataset(path, self).map(|_| ())
    }

    fn read_from(path: &Path) -> ExplorerResult<Self> {
        reader::read_dataset(path)
    }
}

impl Artifact for Layer {
    const NAMESPACE: Namespace = Namespace::Layers;

    fn write_to(&self, path: &Path, writer: &ZarrWriter) -> ExplorerResult<()> {
        writer.write_layer(path, self).map(|_| ())
    }

    fn read_from(path: &Path) -> ExplorerResult<Self> {
        reader::read_layer(path)
    }
}

impl Artifact for Series {
    const NAMESPACE: Namespace = Namespace::Series;

    fn write_to(&self, path: &Path, _writer: &ZarrWriter) -> ExplorerResult<()> {
        series_csv::write_series(path, self).map(|_| ())
    }

    fn read_from(path: &Path) -> ExplorerResult<Self> {
        series_csv::read_series(path)
    }
}

/// One cached artifact.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub namespace: Namespace,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Entry count and size of one namespace.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NamespaceStats {
    pub entries: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub datasets: NamespaceStats,
    pub layers: NamespaceStats,
    pub series: NamespaceStats,
}

impl CacheStats {
    pub fn total_entries(&self) -> usize {
        self.datasets.entries + self.layers.entries + self.series.entries
    }

    pub fn total_bytes(&self) -> u64 {
        self.datasets.bytes + self.layers.bytes + self.series.bytes
    }

    fn namespace_mut(&mut self, ns: Namespace) -> &mut NamespaceStats {
        match ns {
            Namespace::Datasets => &mut self.datasets,
            Namespace::Layers => &mut self.layers,
            Namespace::Series => &mut self.series,
        }
    }
}

/// Limits enforced by [`ArtifactCache::prune`]. Unset limits are not enforced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionPolicy {
    #[serde(default)]
    pub max_bytes: Option<u64>,
    #[serde(default)]
    pub max_age_hours: Option<u64>,
}

impl EvictionPolicy {
    pub fn is_unbounded(&self) -> bool {
        self.max_bytes.is_none() && self.max_age_hours.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub removed: usize,
    pub freed_bytes: u64,
    pub remaining_entries: usize,
    pub remaining_bytes: u64,
}

/// Filesystem-backed artifact cache.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
    writer: ZarrWriter,
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

fn disk_usage(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

fn modified_at(path: &Path) -> ExplorerResult<DateTime<Utc>> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_codec(root, CodecConfig::default())
    }

    pub fn with_codec(root: impl Into<PathBuf>, codec: CodecConfig) -> Self {
        Self {
            root: root.into(),
            writer: ZarrWriter::new(codec),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, ns: Namespace) -> PathBuf {
        self.root.join(ns.dir_name())
    }

    /// Canonical location of an entry.
    pub fn path_for(&self, ns: Namespace, key: &CacheKey) -> PathBuf {
        self.namespace_dir(ns)
            .join(format!("{}.{}", key.as_str(), ns.extension()))
    }

    /// Whether a readable artifact is present for `key`.
    pub fn exists(&self, ns: Namespace, key: &CacheKey) -> bool {
        let path = self.path_for(ns, key);
        match ns.extension() {
            "zarr" => path.join("zarr.json").is_file(),
            _ => path.is_file(),
        }
    }

    /// Load an artifact.
    ///
    /// Fails with `CacheMiss` if nothing is stored under `key` and with
    /// `CorruptArtifact` if the entry cannot be decoded.
    pub fn load<A: Artifact>(&self, key: &CacheKey) -> ExplorerResult<A> {
        let ns = A::NAMESPACE;
        if !self.exists(ns, key) {
            return Err(ExplorerError::CacheMiss {
                namespace: ns.to_string(),
                key: key.to_string(),
            });
        }
        let artifact = A::read_from(&self.path_for(ns, key))?;
        debug!(namespace = %ns, key = %key, "Loaded cached artifact");
        Ok(artifact)
    }

    /// Store an artifact under `key`, replacing any previous entry.
    pub fn store<A: Artifact>(&self, key: &CacheKey, artifact: &A) -> ExplorerResult<CacheEntry> {
        let ns = A::NAMESPACE;
        let dir = self.namespace_dir(ns);
        std::fs::create_dir_all(&dir)
            .map_err(|e| ExplorerError::storage(format!("{}: {}", dir.display(), e)))?;

        let tmp = dir.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));
        if let Err(e) = artifact.write_to(&tmp, &self.writer) {
            let _ = remove_path(&tmp);
            return Err(ExplorerError::storage(format!(
                "writing {}/{} failed: {}",
                ns, key, e
            )));
        }

        let target = self.path_for(ns, key);
        self.swap_into_place(&tmp, &target)?;

        let entry = CacheEntry {
            key: key.clone(),
            namespace: ns,
            created_at: modified_at(&target)?,
            size_bytes: disk_usage(&target),
            path: target,
        };
        info!(
            namespace = %ns,
            key = %key,
            bytes = entry.size_bytes,
            "Stored artifact"
        );
        Ok(entry)
    }

    /// Rename `tmp` onto `target`.
    ///
    /// Directories cannot be renamed over a non-empty directory, so an
    /// existing entry is first moved aside and removed afterwards.
    fn swap_into_place(&self, tmp: &Path, target: &Path) -> ExplorerResult<()> {
        let storage_err =
            |e: std::io::Error| ExplorerError::storage(format!("{}: {}", target.display(), e));

        if target.exists() {
            let trash = target.with_file_name(format!("{}{}", TRASH_PREFIX, Uuid::new_v4()));
            if let Err(e) = std::fs::rename(target, &trash) {
                // another writer may have moved it first
                if target.exists() {
                    let _ = remove_path(tmp);
                    return Err(storage_err(e));
                }
            } else {
                debug!(path = %target.display(), "Replacing existing artifact");
            }

            let renamed = std::fs::rename(tmp, target);
            let _ = remove_path(&trash);
            return match renamed {
                Ok(()) => Ok(()),
                Err(_) if target.exists() => {
                    // a concurrent writer landed first
                    let _ = remove_path(tmp);
                    Ok(())
                }
                Err(e) => Err(storage_err(e)),
            };
        }

        match std::fs::rename(tmp, target) {
            Ok(()) => Ok(()),
            Err(_) if target.exists() => {
                let _ = remove_path(tmp);
                Ok(())
            }
            Err(e) => {
                let _ = remove_path(tmp);
                Err(storage_err(e))
            }
        }
    }

    /// Delete one entry. Returns whether anything was removed.
    pub fn remove(&self, ns: Namespace, key: &CacheKey) -> ExplorerResult<bool> {
        let path = self.path_for(ns, key);
        if !path.exists() {
            return Ok(false);
        }
        remove_path(&path)?;
        Ok(true)
    }

    /// List the entries of a namespace, oldest first.
    pub fn entries(&self, ns: Namespace) -> ExplorerResult<Vec<CacheEntry>> {
        let dir = self.namespace_dir(ns);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let suffix = format!(".{}", ns.extension());
        let mut entries = Vec::new();
        for item in std::fs::read_dir(&dir)? {
            let item = item?;
            let name = item.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let Some(key) = name.strip_suffix(&suffix) else {
                continue;
            };
            let path = item.path();
            entries.push(CacheEntry {
                key: CacheKey::from_raw(key),
                namespace: ns,
                created_at: modified_at(&path)?,
                size_bytes: disk_usage(&path),
                path,
            });
        }

        entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.key.as_str().cmp(b.key.as_str()))
        });
        Ok(entries)
    }

    pub fn stats(&self) -> ExplorerResult<CacheStats> {
        let mut stats = CacheStats::default();
        for ns in Namespace::ALL {
            let entries = self.entries(ns)?;
            let ns_stats = stats.namespace_mut(ns);
            ns_stats.entries = entries.len();
            ns_stats.bytes = entries.iter().map(|e| e.size_bytes).sum();
        }
        Ok(stats)
    }

    /// Apply an eviction policy.
    ///
    /// Entries older than `max_age_hours` go first; then, if the cache is
    /// still above `max_bytes`, the oldest entries are removed until it
    /// is at 90% of the limit. Orphaned temporaries from interrupted
    /// writes are cleaned up as well.
    pub fn prune(&self, policy: &EvictionPolicy) -> ExplorerResult<PruneReport> {
        let now = Utc::now();
        self.remove_orphans(now);

        let mut entries = Vec::new();
        for ns in Namespace::ALL {
            entries.extend(self.entries(ns)?);
        }
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let mut report = PruneReport::default();
        let mut total: u64 = entries.iter().map(|e| e.size_bytes).sum();
        let mut kept = Vec::with_capacity(entries.len());

        let max_age = policy
            .max_age_hours
            .map(|h| Duration::hours(h.min(MAX_AGE_HOURS_CAP) as i64));
        for entry in entries {
            let expired = max_age.map_or(false, |age| now - entry.created_at >= age);
            if expired {
                self.evict(&entry, &mut report, &mut total);
            } else {
                kept.push(entry);
            }
        }

        if let Some(max_bytes) = policy.max_bytes {
            if total > max_bytes {
                let low_water = (max_bytes as f64 * PRUNE_LOW_WATER) as u64;
                let mut survivors = Vec::new();
                for entry in kept {
                    if total > low_water {
                        self.evict(&entry, &mut report, &mut total);
                    } else {
                        survivors.push(entry);
                    }
                }
                kept = survivors;
            }
        }

        report.remaining_entries = kept.len();
        report.remaining_bytes = total;
        info!(
            removed = report.removed,
            freed_bytes = report.freed_bytes,
            remaining_bytes = report.remaining_bytes,
            "Pruned artifact cache"
        );
        Ok(report)
    }

    fn evict(&self, entry: &CacheEntry, report: &mut PruneReport, total: &mut u64) {
        match remove_path(&entry.path) {
            Ok(()) => {
                debug!(namespace = %entry.namespace, key = %entry.key, "Evicted artifact");
                report.removed += 1;
                report.freed_bytes += entry.size_bytes;
                *total = total.saturating_sub(entry.size_bytes);
            }
            Err(e) => warn!(
                path = %entry.path.display(),
                error = %e,
                "Failed to evict artifact"
            ),
        }
    }

    fn remove_orphans(&self, now: DateTime<Utc>) {
        for ns in Namespace::ALL {
            let Ok(items) = std::fs::read_dir(self.namespace_dir(ns)) else {
                continue;
            };
            for item in items.filter_map(|i| i.ok()) {
                let name = item.file_name().to_string_lossy().into_owned();
                if !(name.starts_with(TMP_PREFIX) || name.starts_with(TRASH_PREFIX)) {
                    continue;
                }
                let path = item.path();
                let stale = modified_at(&path)
                    .map(|t| now - t >= Duration::minutes(ORPHAN_GRACE_MINUTES))
                    .unwrap_or(false);
                if stale {
                    if let Err(e) = remove_path(&path) {
                        warn!(path = %path.display(), error = %e, "Failed to remove orphan");
                    }
                }
            }
        }
    }
}
