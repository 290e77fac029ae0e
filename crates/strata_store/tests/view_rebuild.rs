use std::path::Path;

use chrono::NaiveDate;
use strata_store::{
    DatasetFamily, EntityKey, FieldValue, NoopJobControl, ObservationRecord, ShardCatalogApi,
    ShardWriteApi, StrataConfig, StrataError, StrataResult, StrataStore, UnifiedViewApi,
    ViewQuery,
};
use tempfile::tempdir;

fn key(raw: &str) -> EntityKey {
    EntityKey::parse(raw).expect("key")
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 2).expect("date")
}

async fn open(base: &Path, failpoints: &[&str]) -> StrataResult<StrataStore> {
    let mut config = StrataConfig::default_sqlite(base.join("store.sqlite").to_string_lossy());
    if !failpoints.is_empty() {
        config.failpoints = Some(failpoints.iter().map(|fp| fp.to_string()).collect());
    }
    StrataStore::connect(&config, base).await
}

#[tokio::test]
async fn rebuild_without_shards_leaves_no_view() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), &[]).await?;

    assert!(!store.rebuild_view(DatasetFamily::DailyBars).await);
    let stats = store.view_stats(DatasetFamily::DailyBars);
    assert_eq!(stats.skipped_empty, 1);
    assert_eq!(stats.failures, 0);

    let err = store
        .view_columns(DatasetFamily::DailyBars)
        .await
        .expect_err("no view yet");
    assert!(matches!(err, StrataError::NotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn daily_view_excludes_the_more_specific_indicator_shards() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), &[]).await?;
    let entity = key("000001.SZ");

    store
        .upsert_batch(
            DatasetFamily::DailyBars,
            vec![ObservationRecord::new(entity.clone(), day()).with_field("close", 10.5)],
            true,
            &NoopJobControl,
        )
        .await?;
    store
        .upsert_batch(
            DatasetFamily::DailyIndicators,
            vec![ObservationRecord::new(entity.clone(), day()).with_field("ma5", 10.1)],
            true,
            &NoopJobControl,
        )
        .await?;

    assert_eq!(
        store
            .list_family_shards(DatasetFamily::DailyBars)
            .await?
            .iter()
            .map(|shard| shard.as_str())
            .collect::<Vec<_>>(),
        vec!["ts_daily_000001"]
    );
    assert!(store.rebuild_view(DatasetFamily::DailyBars).await);
    assert!(store.rebuild_view(DatasetFamily::DailyIndicators).await);

    let daily = store.view_columns(DatasetFamily::DailyBars).await?;
    assert!(daily.iter().any(|column| column == "close"));
    assert!(!daily.iter().any(|column| column == "ma5"));
    let rows = store
        .read_view(DatasetFamily::DailyBars, ViewQuery::default())
        .await?;
    assert_eq!(rows.len(), 1);

    let indicators = store
        .read_view(DatasetFamily::DailyIndicators, ViewQuery::default())
        .await?;
    assert_eq!(indicators.len(), 1);
    assert_eq!(indicators[0].field("ma5"), Some(&FieldValue::Float(10.1)));
    Ok(())
}

#[tokio::test]
async fn failed_rebuild_keeps_the_previous_view() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let healthy = open(dir.path(), &[]).await?;
    healthy
        .upsert_batch(
            DatasetFamily::DailyBars,
            vec![ObservationRecord::new(key("000001.SZ"), day()).with_field("close", 10.5)],
            false,
            &NoopJobControl,
        )
        .await?;

    let broken = open(dir.path(), &["view_client", "view_routine"]).await?;
    broken
        .upsert_batch(
            DatasetFamily::DailyBars,
            vec![ObservationRecord::new(key("000002.SZ"), day()).with_field("close", 20.1)],
            true,
            &NoopJobControl,
        )
        .await?;
    assert!(!broken.rebuild_view(DatasetFamily::DailyBars).await);
    let stats = broken.view_stats(DatasetFamily::DailyBars);
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.client_builds, 0);

    let rows = broken
        .read_view(DatasetFamily::DailyBars, ViewQuery::default())
        .await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].entity_key, "000001.SZ");

    assert!(healthy.rebuild_view(DatasetFamily::DailyBars).await);
    let rows = healthy
        .read_view(DatasetFamily::DailyBars, ViewQuery::default())
        .await?;
    assert_eq!(rows.len(), 2);
    Ok(())
}

#[tokio::test]
async fn concurrent_requests_coalesce() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), &[]).await?;
    let definition = store
        .registry()
        .get_or_create_shard_definition(DatasetFamily::DailyBars, &key("000001.SZ"))?;
    assert!(store.ensure_shard_exists(&definition).await);

    let (a, b, c) = tokio::join!(
        store.rebuild_view(DatasetFamily::DailyBars),
        store.rebuild_view(DatasetFamily::DailyBars),
        store.rebuild_view(DatasetFamily::DailyBars),
    );
    assert!(a && b && c);

    let stats = store.view_stats(DatasetFamily::DailyBars);
    assert_eq!(stats.requests, 3);
    assert!(stats.rebuilds >= 1 && stats.rebuilds <= 2, "{stats:?}");
    assert_eq!(stats.client_builds, stats.rebuilds);
    assert_eq!(stats.server_builds, 0);
    Ok(())
}

#[tokio::test]
async fn clones_share_rebuild_state() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), &[]).await?;
    let clone = store.clone();
    let definition = store
        .registry()
        .get_or_create_shard_definition(DatasetFamily::CustomFactors, &key("000001.SZ"))?;
    assert!(store.ensure_shard_exists(&definition).await);

    assert!(clone.rebuild_view(DatasetFamily::CustomFactors).await);
    assert_eq!(store.view_stats(DatasetFamily::CustomFactors).rebuilds, 1);
    assert_eq!(
        store.view_columns(DatasetFamily::CustomFactors).await?,
        vec!["entity_key", "observation_date", "updated_at", "updated_by"]
    );
    Ok(())
}
