//! Request value objects: what the UI asks for and its normalized form.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use crate::bbox::BoundingBox;
use crate::error::{ExplorerError, ExplorerResult};
use crate::time::{deserialize_date, parse_date, DateRange};

/// Aggregation methods a user may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Mean,
    Sum,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Mean => "mean",
            Aggregation::Sum => "sum",
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = ExplorerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mean" => Ok(Aggregation::Mean),
            "sum" => Ok(Aggregation::Sum),
            _ => Err(ExplorerError::UnsupportedAggregation(s.to_string())),
        }
    }
}

/// Reductions understood by the aggregation engine.
///
/// A superset of [`Aggregation`]: `max`/`min` are used internally for
/// summaries but are not accepted from the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReductionMethod {
    Mean,
    Sum,
    Max,
    Min,
}

impl ReductionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReductionMethod::Mean => "mean",
            ReductionMethod::Sum => "sum",
            ReductionMethod::Max => "max",
            ReductionMethod::Min => "min",
        }
    }
}

impl fmt::Display for ReductionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReductionMethod {
    type Err = ExplorerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mean" => Ok(ReductionMethod::Mean),
            "sum" => Ok(ReductionMethod::Sum),
            "max" => Ok(ReductionMethod::Max),
            "min" => Ok(ReductionMethod::Min),
            _ => Err(ExplorerError::UnsupportedAggregation(s.to_string())),
        }
    }
}

impl From<Aggregation> for ReductionMethod {
    fn from(agg: Aggregation) -> Self {
        match agg {
            Aggregation::Mean => ReductionMethod::Mean,
            Aggregation::Sum => ReductionMethod::Sum,
        }
    }
}

/// The artifact a request resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Dataset,
    Layer,
    Series,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Dataset => "dataset",
            RequestKind::Layer => "layer",
            RequestKind::Series => "series",
        }
    }

    /// Whether date range and aggregation take part in identity.
    pub fn is_derived(&self) -> bool {
        !matches!(self, RequestKind::Dataset)
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized, hashable request.
///
/// Dates are calendar dates, so any textual representation of the same
/// day yields an equal descriptor. Regions compare by their quantized
/// form, which is also what ends up in the cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub source_id: String,
    pub variable_id: String,
    #[serde(deserialize_with = "deserialize_date")]
    pub start_date: NaiveDate,
    #[serde(deserialize_with = "deserialize_date")]
    pub end_date: NaiveDate,
    pub aggregation: Aggregation,
    pub kind: RequestKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<BoundingBox>,
}

impl RequestDescriptor {
    pub fn new(
        source_id: impl Into<String>,
        variable_id: impl Into<String>,
        range: DateRange,
        aggregation: Aggregation,
        kind: RequestKind,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            variable_id: variable_id.into(),
            start_date: range.start,
            end_date: range.end,
            aggregation,
            kind,
            region: None,
        }
    }

    pub fn with_region(mut self, region: Option<BoundingBox>) -> Self {
        self.region = region;
        self
    }

    /// The same request addressed to a different artifact kind.
    pub fn with_kind(&self, kind: RequestKind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }

    pub fn date_range(&self) -> ExplorerResult<DateRange> {
        DateRange::new(self.start_date, self.end_date)
    }

    fn region_key(&self) -> Option<String> {
        self.region.as_ref().map(BoundingBox::cache_key)
    }
}

impl PartialEq for RequestDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.source_id == other.source_id
            && self.variable_id == other.variable_id
            && self.start_date == other.start_date
            && self.end_date == other.end_date
            && self.aggregation == other.aggregation
            && self.kind == other.kind
            && self.region_key() == other.region_key()
    }
}

impl Eq for RequestDescriptor {}

impl Hash for RequestDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source_id.hash(state);
        self.variable_id.hash(state);
        self.start_date.hash(state);
        self.end_date.hash(state);
        self.aggregation.hash(state);
        self.kind.hash(state);
        self.region_key().hash(state);
    }
}

/// Accept catalog identifiers given either as numbers or as strings.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or integer identifier, got {}",
            other
        ))),
    }
}

/// Raw request as received from the UI, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExploreRequest {
    #[serde(alias = "source", deserialize_with = "deserialize_id")]
    pub source_id: String,
    #[serde(alias = "var_id", alias = "variable", deserialize_with = "deserialize_id")]
    pub variable_id: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(default = "default_aggregation")]
    pub aggregation: String,
    #[serde(default)]
    pub region: Option<BoundingBox>,
}

fn default_aggregation() -> String {
    Aggregation::Mean.as_str().to_string()
}

impl ExploreRequest {
    /// Validate the input and produce the layer descriptor.
    ///
    /// Nothing reaches a resolver unless this succeeds.
    pub fn validate(&self) -> ExplorerResult<RequestDescriptor> {
        if self.source_id.trim().is_empty() || self.variable_id.trim().is_empty() {
            return Err(ExplorerError::InvalidRequest(
                "source and variable must be set".to_string(),
            ));
        }

        let start = parse_date(&self.start_date)?;
        let end = parse_date(&self.end_date)?;
        let range = DateRange::new(start, end)?;
        let aggregation: Aggregation = self.aggregation.parse()?;

        if let Some(region) = &self.region {
            region.validate()?;
        }

        Ok(RequestDescriptor::new(
            self.source_id.trim(),
            self.variable_id.trim(),
            range,
            aggregation,
            RequestKind::Layer,
        )
        .with_region(self.region))
    }
}

/// Explicit request diffing in place of hidden "last selection" state.
#[derive(Debug, Default, Clone)]
pub struct Selection {
    current: Option<RequestDescriptor>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `current` differs from `previous` (a first request always counts).
    pub fn has_changed(previous: Option<&RequestDescriptor>, current: &RequestDescriptor) -> bool {
        previous != Some(current)
    }

    /// Record `next` and report whether it differs from what was held.
    pub fn update(&mut self, next: RequestDescriptor) -> bool {
        let changed = Self::has_changed(self.current.as_ref(), &next);
        if changed {
            self.current = Some(next);
        }
        changed
    }

    pub fn current(&self) -> Option<&RequestDescriptor> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(start: &str, end: &str, agg: &str) -> ExploreRequest {
        ExploreRequest {
            source_id: "ERA5".to_string(),
            variable_id: "t2m".to_string(),
            start_date: start.to_string(),
            end_date: end.to_string(),
            aggregation: agg.to_string(),
            region: None,
        }
    }

    #[test]
    fn test_validate_builds_layer_descriptor() {
        let desc = request("2020-01-01", "2020-01-31", "mean").validate().unwrap();
        assert_eq!(desc.kind, RequestKind::Layer);
        assert_eq!(desc.aggregation, Aggregation::Mean);
        assert_eq!(desc.date_range().unwrap().num_days(), 31);
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        assert!(matches!(
            request("2020-02-30", "2020-03-01", "mean").validate(),
            Err(ExplorerError::InvalidRequest(_))
        ));
        assert!(matches!(
            request("2020-02-01", "2020-01-01", "mean").validate(),
            Err(ExplorerError::InvalidRange { .. })
        ));
        assert!(matches!(
            request("2020-01-01", "2020-01-02", "median").validate(),
            Err(ExplorerError::UnsupportedAggregation(_))
        ));
    }

    #[test]
    fn test_ui_payload_with_integer_ids() {
        let json = r#"{"source_id": 1, "var_id": 3, "start_date": "2020-01-01",
                       "end_date": "2020-01-31T00:00:00", "aggregation": "sum"}"#;
        let req: ExploreRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.source_id, "1");
        assert_eq!(req.variable_id, "3");
        let desc = req.validate().unwrap();
        assert_eq!(desc.aggregation, Aggregation::Sum);
        assert_eq!(desc.end_date, NaiveDate::from_ymd_opt(2020, 1, 31).unwrap());
    }

    #[test]
    fn test_reduction_method_parse() {
        assert_eq!("MAX".parse::<ReductionMethod>().unwrap(), ReductionMethod::Max);
        assert!(matches!(
            "mode".parse::<ReductionMethod>(),
            Err(ExplorerError::UnsupportedAggregation(_))
        ));
        assert_eq!(ReductionMethod::from(Aggregation::Sum), ReductionMethod::Sum);
    }

    #[test]
    fn test_selection_diffing() {
        let a = request("2020-01-01", "2020-01-31", "mean").validate().unwrap();
        let b = request("2020-01-01T00:00:00", "2020-01-31", "mean").validate().unwrap();
        let c = request("2020-01-01", "2020-01-30", "mean").validate().unwrap();

        assert!(Selection::has_changed(None, &a));
        assert!(!Selection::has_changed(Some(&a), &b));
        assert!(Selection::has_changed(Some(&a), &c));

        let mut selection = Selection::new();
        assert!(selection.update(a));
        assert!(!selection.update(b));
        assert!(selection.update(c.clone()));
        assert_eq!(selection.current(), Some(&c));
    }
}
