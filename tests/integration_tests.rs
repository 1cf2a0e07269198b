// Integration tests for the comparables pipeline

use comps_engine::core::{ComparablesEngine, EngineConfig, EngineError};
use comps_engine::models::{Attribute, ComparablesOptions, Property, QualityClass, Strategy};
use comps_engine::services::{MemoryStore, ResultCache};
use std::sync::Arc;

const SUBJECT: &str = "1000";

fn create_test_property(account: &str, neighborhood: &str, coords: Option<(f64, f64)>, living_area: f64, value: f64) -> Property {
    Property {
        account: account.to_string(),
        land_use: Some("A1".to_string()),
        neighborhood_code: Some(neighborhood.to_string()),
        site_address: Some(format!("{} ELM ST", account)),
        city: Some("HOUSTON".to_string()),
        zip_code: Some("77002".to_string()),
        latitude: coords.map(|c| c.0),
        longitude: coords.map(|c| c.1),
        living_area: Some(living_area),
        lot_area: Some(6500.0),
        year_built: Some(2001),
        stories: Some(2.0),
        quality: Some(QualityClass::Good),
        condition: None,
        bedrooms: Some(4),
        bathrooms: Some(2.5),
        garage_spaces: Some(2),
        has_pool: Some(false),
        market_value: Some(value),
        sale_price: None,
    }
}

/// Subject in N100 plus a small neighborhood of candidates:
/// two neighborhood matches, one at ~1 mile, one larger house at ~4 miles,
/// one without coordinates in the same ZIP, one non-residential parcel and
/// one in Dallas.
fn create_test_pool() -> Vec<Property> {
    let mut commercial = create_test_property("1005", "N100", Some((29.7610, -95.3700)), 2000.0, 500000.0);
    commercial.land_use = Some("F1".to_string());

    let mut dallas = create_test_property("1007", "N500", Some((32.7767, -96.7970)), 2000.0, 300000.0);
    dallas.zip_code = Some("75201".to_string());
    dallas.city = Some("DALLAS".to_string());

    vec![
        create_test_property(SUBJECT, "N100", Some((29.7604, -95.3698)), 2000.0, 300000.0),
        create_test_property("1001", "N100", Some((29.7620, -95.3698)), 2050.0, 300000.0),
        create_test_property("1002", "N100", Some((29.7590, -95.3710)), 1950.0, 290000.0),
        create_test_property("1003", "N200", Some((29.7749, -95.3698)), 2000.0, 310000.0),
        create_test_property("1004", "N300", Some((29.8184, -95.3698)), 2600.0, 400000.0),
        commercial,
        create_test_property("1006", "N900", None, 2000.0, 280000.0),
        dallas,
    ]
}

fn create_engine() -> (Arc<MemoryStore>, ComparablesEngine<MemoryStore>) {
    let store = Arc::new(MemoryStore::from_properties(create_test_pool()));
    let engine = ComparablesEngine::new(store.clone(), EngineConfig::default());
    (store, engine)
}

fn create_cached_engine() -> (Arc<MemoryStore>, ComparablesEngine<MemoryStore>) {
    let (store, engine) = create_engine();
    (store, engine.with_cache(Arc::new(ResultCache::in_memory(50, 3600))))
}

#[tokio::test]
async fn test_integration_end_to_end() {
    let (_, engine) = create_engine();

    let result = engine.get_comparables(SUBJECT, &ComparablesOptions::default()).await.unwrap();

    // Neighborhood yields two, the 1.5 mile ring adds the third
    assert_eq!(result.accounts(), vec!["1001", "1002", "1003"]);
    assert!(result.search.floor_met);
    assert!(!result.insufficient());
    assert_eq!(result.search.steps_evaluated, 2);
    assert_eq!(result.search.terminal_geography.as_deref(), Some("radius 1.5mi"));
    assert_eq!(result.search.terminal_physical_tier, Some(0));
    assert_eq!(result.subject.account, SUBJECT);

    let ranks: Vec<usize> = result.comparables.iter().map(|c| c.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3]);
    for pair in result.comparables.windows(2) {
        assert!(pair[0].score.composite <= pair[1].score.composite);
    }

    assert_eq!(result.pricing.count, 3);
    assert_eq!(result.pricing.median, Some(300000.0));
    assert_eq!(result.pricing.subject_deviation_pct, Some(0.0));
}

#[tokio::test]
async fn test_subject_never_returned() {
    let (_, engine) = create_engine();
    let options = ComparablesOptions::default().with_min_comps(50).with_max_comps(50);

    let result = engine.get_comparables(SUBJECT, &options).await.unwrap();
    assert!(!result.accounts().contains(&SUBJECT));
    assert!(!result.accounts().contains(&"1005"));
}

#[tokio::test]
async fn test_tier_exhaustion_returns_everything_found() {
    let (_, engine) = create_engine();
    let options = ComparablesOptions::default().with_min_comps(20);

    let result = engine.get_comparables(SUBJECT, &options).await.unwrap();

    assert!(result.insufficient());
    assert_eq!(result.search.steps_evaluated, result.search.steps_available);
    assert_eq!(result.search.admitted, 5);

    let mut accounts = result.accounts();
    accounts.sort();
    assert_eq!(accounts, vec!["1001", "1002", "1003", "1004", "1006"]);

    // The 30% larger house needs the 35% living-area band
    let larger = result.comparables.iter().find(|c| c.record.account() == "1004").unwrap();
    assert_eq!(larger.record.tier.physical_tier, 5);
    assert!(result.search.relaxed[&Attribute::LivingArea]);

    // No coordinates: only reachable through the ZIP fallback
    let no_coords = result.comparables.iter().find(|c| c.record.account() == "1006").unwrap();
    assert_eq!(no_coords.record.tier.geography_label, "zip");
    assert!(no_coords.record.distance_miles.is_none());
    assert!(!no_coords.score.deviations.contains_key(&Attribute::Geography));
}

#[tokio::test]
async fn test_max_comps_truncates_after_ranking() {
    let (_, engine) = create_engine();

    // min_comps stays at the default 3, above the requested max
    let options = ComparablesOptions::default().with_max_comps(2);
    let result = engine.get_comparables(SUBJECT, &options).await.unwrap();

    assert_eq!(result.search.parameters.min_comps, 3);
    assert_eq!(result.search.admitted, 3);
    assert!(result.search.admitted > result.len());
    assert_eq!(result.len(), 2);
    assert_eq!(result.pricing.count, 2);

    let full = engine.get_comparables(SUBJECT, &ComparablesOptions::default()).await.unwrap();
    assert_eq!(full.len(), 3);
    assert_eq!(result.accounts(), full.accounts()[..2].to_vec());
    assert_eq!(result.comparables, full.comparables[..2].to_vec());
}

#[tokio::test]
async fn test_max_radius_caps_geography() {
    let (_, engine) = create_engine();
    let options = ComparablesOptions::default().with_min_comps(20).with_max_radius(3.0);

    let result = engine.get_comparables(SUBJECT, &options).await.unwrap();
    let mut accounts = result.accounts();
    accounts.sort();
    assert_eq!(accounts, vec!["1001", "1002", "1003", "1006"]);
}

#[tokio::test]
async fn test_determinism() {
    let (_, engine) = create_engine();
    let options = ComparablesOptions::default().with_min_comps(20);

    let first = engine.get_comparables(SUBJECT, &options).await.unwrap();
    let second = engine.get_comparables(SUBJECT, &options).await.unwrap();

    assert_eq!(first.comparables, second.comparables);
    assert_eq!(first.pricing, second.pricing);
    assert_eq!(first.search.steps_evaluated, second.search.steps_evaluated);
}

#[tokio::test]
async fn test_subject_not_found() {
    let (_, engine) = create_engine();
    let result = engine.get_comparables("9999", &ComparablesOptions::default()).await;
    assert!(matches!(result, Err(EngineError::SubjectNotFound(id)) if id == "9999"));
}

#[tokio::test]
async fn test_data_source_unavailable() {
    let (store, engine) = create_engine();
    store.set_offline(true);

    let result = engine.get_comparables(SUBJECT, &ComparablesOptions::default()).await;
    assert!(matches!(result, Err(EngineError::DataSourceUnavailable(_))));
}

#[tokio::test]
async fn test_zero_results_is_not_an_error() {
    let mut commercial = create_test_property("2001", "N100", Some((29.7604, -95.3698)), 2000.0, 300000.0);
    commercial.land_use = Some("F1".to_string());
    let store = Arc::new(MemoryStore::from_properties(vec![
        create_test_property(SUBJECT, "N100", Some((29.7604, -95.3698)), 2000.0, 300000.0),
        commercial,
    ]));
    let engine = ComparablesEngine::new(store, EngineConfig::default());

    let result = engine.get_comparables(SUBJECT, &ComparablesOptions::default()).await.unwrap();
    assert!(result.is_empty());
    assert!(result.insufficient());
    assert_eq!(result.pricing.count, 0);
    assert!(result.pricing.median.is_none());
    assert!(result.pricing.subject_deviation_pct.is_none());
}

#[tokio::test]
async fn test_sales_strategy_uses_sale_prices() {
    let mut pool = create_test_pool();
    for property in pool.iter_mut() {
        match property.account.as_str() {
            SUBJECT => property.sale_price = Some(330000.0),
            "1001" => property.sale_price = Some(320000.0),
            "1003" => property.sale_price = Some(340000.0),
            _ => {}
        }
    }
    let engine = ComparablesEngine::new(Arc::new(MemoryStore::from_properties(pool)), EngineConfig::default());
    let options = ComparablesOptions::default().with_strategy(Strategy::Sales);

    let result = engine.get_comparables(SUBJECT, &options).await.unwrap();
    assert_eq!(result.len(), 3);
    assert_eq!(result.pricing.strategy, Strategy::Sales);
    assert_eq!(result.pricing.count, 2);
    assert_eq!(result.pricing.median, Some(330000.0));
    assert_eq!(result.pricing.subject_deviation_pct, Some(0.0));
}

#[tokio::test]
async fn test_cache_hit_then_stale_after_write() {
    let (store, engine) = create_cached_engine();
    let options = ComparablesOptions::default();

    let first = engine.get_comparables(SUBJECT, &options).await.unwrap();
    let second = engine.get_comparables(SUBJECT, &options).await.unwrap();

    // Served from cache: same generation timestamp
    assert_eq!(first.search.generated_at, second.search.generated_at);
    let stats = engine.cache().unwrap().stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);

    store
        .upsert(create_test_property("1008", "N100", Some((29.7600, -95.3690)), 2000.0, 305000.0))
        .await;

    let third = engine.get_comparables(SUBJECT, &options).await.unwrap();
    assert_eq!(engine.cache().unwrap().stats().stale, 1);
    assert!(third.accounts().contains(&"1008"));
    assert!(third.search.data_version > first.search.data_version);
}

#[tokio::test]
async fn test_cache_key_includes_options() {
    let (_, engine) = create_cached_engine();

    engine.get_comparables(SUBJECT, &ComparablesOptions::default()).await.unwrap();
    engine
        .get_comparables(SUBJECT, &ComparablesOptions::default().with_strategy(Strategy::Sales))
        .await
        .unwrap();

    let stats = engine.cache().unwrap().stats();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hits, 0);
}

#[tokio::test]
async fn test_cache_invalidate_subject() {
    let (_, engine) = create_cached_engine();
    let options = ComparablesOptions::default();

    engine.get_comparables(SUBJECT, &options).await.unwrap();
    engine.cache().unwrap().invalidate_subject(SUBJECT).await.unwrap();
    engine.get_comparables(SUBJECT, &options).await.unwrap();

    let stats = engine.cache().unwrap().stats();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hits, 0);
}

#[tokio::test]
async fn test_concurrent_requests_agree() {
    let (_, engine) = create_cached_engine();
    let options = ComparablesOptions::default().with_min_comps(20);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            let options = options.clone();
            tokio::spawn(async move { engine.get_comparables(SUBJECT, &options).await })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    for result in &results[1..] {
        assert_eq!(result.comparables, results[0].comparables);
    }
}

#[tokio::test]
async fn test_export_rows() {
    let (_, engine) = create_engine();
    let result = engine.get_comparables(SUBJECT, &ComparablesOptions::default()).await.unwrap();

    let rows = result.export_rows();
    assert_eq!(rows.len(), result.len());
    assert_eq!(rows[0].rank, 1);
    assert_eq!(rows[0].account, result.comparables[0].record.account());

    let no_coords = ComparablesOptions::default().with_min_comps(20);
    let wide = engine.get_comparables(SUBJECT, &no_coords).await.unwrap();
    let rows = wide.export_rows();
    let larger = rows.iter().find(|r| r.account == "1004").unwrap();
    assert_eq!(larger.value_per_sqft, Some(153.85));
    assert_eq!(larger.geography_tier, "radius 5mi");
    let zip_only = rows.iter().find(|r| r.account == "1006").unwrap();
    assert!(zip_only.distance_miles.is_none());
    assert_eq!(zip_only.geography_tier, "zip");

    let json = serde_json::to_value(&rows).unwrap();
    assert!(json[0].get("valuePerSqft").is_some());
}
