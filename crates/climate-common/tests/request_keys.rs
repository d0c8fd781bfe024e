//! Request validation and key derivation as seen from outside the crate.

use climate_common::{CacheKey, ExploreRequest, ExplorerError, RequestKind};

fn explore(json: &str) -> Result<climate_common::RequestDescriptor, ExplorerError> {
    let req: ExploreRequest = serde_json::from_str(json)?;
    req.validate()
}

#[test]
fn invalid_calendar_date_is_rejected_before_resolution() {
    let err = explore(
        r#"{"source":"ERA5","variable":"t2m","start_date":"2020-02-30",
            "end_date":"2020-03-15","aggregation":"mean"}"#,
    )
    .unwrap_err();
    assert!(matches!(err, ExplorerError::InvalidRequest(_)));
}

#[test]
fn layer_and_series_keys_differ_only_by_kind() {
    let layer = explore(
        r#"{"source":"ERA5","variable":"t2m","start_date":"2020-01-01",
            "end_date":"2020-01-31","aggregation":"sum"}"#,
    )
    .unwrap();
    let series = layer.with_kind(RequestKind::Series);

    let lk = CacheKey::encode(&layer);
    let sk = CacheKey::encode(&series);
    assert_ne!(lk, sk);
    assert_eq!(
        lk.as_str().replace("kind-layer", "kind-series"),
        sk.as_str()
    );
}

#[test]
fn region_participates_in_key_only_when_set() {
    let plain = explore(
        r#"{"source":"ERA5","variable":"t2m","start_date":"2020-01-01",
            "end_date":"2020-01-31"}"#,
    )
    .unwrap();
    let regional = explore(
        r#"{"source":"ERA5","variable":"t2m","start_date":"2020-01-01",
            "end_date":"2020-01-31",
            "region":{"min_lon":-10.0,"min_lat":35.0,"max_lon":5.0,"max_lat":44.0}}"#,
    )
    .unwrap();

    assert!(!CacheKey::encode(&plain).as_str().contains("region"));
    assert!(CacheKey::encode(&regional).as_str().contains("region-"));
    assert_ne!(plain, regional);
}
