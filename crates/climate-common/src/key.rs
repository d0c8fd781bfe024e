//! Cache key derivation.
//!
//! A key is the descriptor's fields rendered as `name-value` pairs in
//! sorted name order and joined by `_`. Values are percent-escaped down
//! to `[A-Za-z0-9.+-]`, so `_` only ever appears as a separator and the
//! key is always a valid path component.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::request::{RequestDescriptor, RequestKind};
use crate::time::format_date;

/// Keys longer than this are shortened with a digest.
pub const MAX_KEY_LEN: usize = 160;

/// Length of the readable prefix kept on shortened keys.
const HASHED_PREFIX_LEN: usize = 95;

/// A stable identifier for a cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a request.
    pub fn encode(desc: &RequestDescriptor) -> Self {
        Self::from_fields(&canonical_fields(desc))
    }

    /// Key of the raw dataset for (source, variable).
    ///
    /// Equal to `encode` of any dataset-kind descriptor with these ids.
    pub fn dataset(source_id: &str, variable_id: &str) -> Self {
        Self::from_fields(&dataset_fields(source_id, variable_id))
    }

    /// Build a key from arbitrary fields. Order of insertion is irrelevant.
    pub fn from_fields(fields: &BTreeMap<&str, String>) -> Self {
        let canonical = fields
            .iter()
            .map(|(name, value)| format!("{}-{}", escape(name), escape(value)))
            .collect::<Vec<_>>()
            .join("_");

        if canonical.len() <= MAX_KEY_LEN {
            return Self(canonical);
        }

        let hex = format!("{:x}", Sha256::digest(canonical.as_bytes()));
        // canonical is pure ASCII after escaping
        Self(format!("{}-{}", &canonical[..HASHED_PREFIX_LEN], hex))
    }

    /// Wrap an existing key, e.g. a file stem read back from disk.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Fields that identify a request of the given kind.
///
/// Datasets depend only on source and variable. Region is included only
/// when one is set.
pub fn canonical_fields(desc: &RequestDescriptor) -> BTreeMap<&'static str, String> {
    let mut fields = dataset_fields(&desc.source_id, &desc.variable_id);
    fields.insert("kind", desc.kind.as_str().to_string());

    if desc.kind.is_derived() {
        fields.insert("start", format_date(&desc.start_date));
        fields.insert("end", format_date(&desc.end_date));
        fields.insert("aggregation", desc.aggregation.as_str().to_string());

        if let Some(region) = &desc.region {
            fields.insert("region", region.cache_key());
        }
    }

    fields
}

fn dataset_fields(source_id: &str, variable_id: &str) -> BTreeMap<&'static str, String> {
    let mut fields = BTreeMap::new();
    fields.insert("source", source_id.to_string());
    fields.insert("variable", variable_id.to_string());
    fields.insert("kind", RequestKind::Dataset.as_str().to_string());
    fields
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'+' | b'-' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BoundingBox;
    use crate::request::{Aggregation, ExploreRequest};
    use crate::time::DateRange;
    use chrono::NaiveDate;
    use std::collections::HashSet;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn layer() -> RequestDescriptor {
        RequestDescriptor::new(
            "ERA5",
            "t2m",
            DateRange::new(day(2020, 1, 1), day(2020, 1, 31)).unwrap(),
            Aggregation::Mean,
            RequestKind::Layer,
        )
    }

    #[test]
    fn test_key_layout() {
        let key = CacheKey::encode(&layer());
        assert_eq!(
            key.as_str(),
            "aggregation-mean_end-2020-01-31_kind-layer_source-ERA5_start-2020-01-01_variable-t2m"
        );

        let dataset = CacheKey::encode(&layer().with_kind(RequestKind::Dataset));
        assert_eq!(dataset.as_str(), "kind-dataset_source-ERA5_variable-t2m");
        assert_eq!(dataset, CacheKey::dataset("ERA5", "t2m"));
    }

    #[test]
    fn test_key_independent_of_field_order_and_date_format() {
        let a: ExploreRequest = serde_json::from_str(
            r#"{"source_id":"ERA5","variable_id":"t2m","start_date":"2020-01-01",
                "end_date":"2020-01-31","aggregation":"mean"}"#,
        )
        .unwrap();
        let b: ExploreRequest = serde_json::from_str(
            r#"{"aggregation":"mean","end_date":"2020-01-31T00:00:00Z",
                "start_date":"2020-01-01T12:00:00","variable_id":"t2m","source_id":"ERA5"}"#,
        )
        .unwrap();

        let ka = CacheKey::encode(&a.validate().unwrap());
        let kb = CacheKey::encode(&b.validate().unwrap());
        assert_eq!(ka, kb);
        assert_eq!(ka, CacheKey::encode(&layer()));
    }

    #[test]
    fn test_single_field_changes_give_distinct_keys() {
        let base = layer();
        let mut variants = vec![base.clone()];

        let mut v = base.clone();
        v.source_id = "MERRA2".into();
        variants.push(v);

        let mut v = base.clone();
        v.variable_id = "tp".into();
        variants.push(v);

        let mut v = base.clone();
        v.start_date = day(2020, 1, 2);
        variants.push(v);

        let mut v = base.clone();
        v.end_date = day(2020, 1, 30);
        variants.push(v);

        let mut v = base.clone();
        v.aggregation = Aggregation::Sum;
        variants.push(v);

        variants.push(base.with_kind(RequestKind::Series));
        variants.push(base.with_kind(RequestKind::Dataset));
        variants.push(
            base.clone()
                .with_region(Some(BoundingBox::new(-10.0, 35.0, 5.0, 44.0))),
        );

        // values that would collide without escaping
        let mut v = base.clone();
        v.source_id = "ERA5_variable-t2m".into();
        variants.push(v);

        let keys: HashSet<CacheKey> = variants.iter().map(CacheKey::encode).collect();
        assert_eq!(keys.len(), variants.len());
    }

    #[test]
    fn test_keys_are_path_safe() {
        let mut desc = layer();
        desc.source_id = "../etc/passwd".into();
        desc.variable_id = "2m temperature/K".into();
        let key = CacheKey::encode(&desc);
        assert!(key
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._+-%".contains(c)));
        assert!(!key.as_str().contains('/'));
        assert!(!key.as_str().starts_with('.'));
    }

    #[test]
    fn test_long_keys_are_hashed() {
        let mut a = layer();
        a.variable_id = "x".repeat(300);
        let mut b = a.clone();
        b.variable_id.push('y');

        let ka = CacheKey::encode(&a);
        let kb = CacheKey::encode(&b);
        assert!(ka.as_str().len() <= MAX_KEY_LEN);
        assert_eq!(ka.as_str().len(), HASHED_PREFIX_LEN + 1 + 64);
        let digest = &ka.as_str()[HASHED_PREFIX_LEN + 1..];
        assert!(digest.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
        assert_ne!(ka, kb);
        assert_eq!(ka, CacheKey::encode(&a));
    }
}
