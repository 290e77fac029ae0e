use chrono::NaiveDate;
use strata_store::{
    DatasetFamily, EntityKey, FieldValue, NoopJobControl, ObservationRecord, ShardCatalogApi,
    ShardWriteApi, StrataConfig, StrataError, StrataResult, StrataStore, UnifiedViewApi,
    ViewQuery, ViewRebuildStatus,
};
use tempfile::tempdir;

fn key(raw: &str) -> EntityKey {
    EntityKey::parse(raw).expect("key")
}

fn day(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("date")
}

fn bar(entity: &str, date: &str, close: f64) -> ObservationRecord {
    ObservationRecord::new(key(entity), day(date)).with_field("close", close)
}

#[tokio::test]
async fn concrete_daily_bars_scenario() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = StrataConfig::default_sqlite(base.join("store.sqlite").to_string_lossy());
    let store = StrataStore::connect(&config, base).await?;

    let result = store
        .upsert_batch(
            DatasetFamily::DailyBars,
            vec![
                bar("000001.SZ", "2025-01-02", 10.5),
                bar("000002.SZ", "2025-01-02", 20.1),
            ],
            true,
            &NoopJobControl,
        )
        .await?;
    assert_eq!(result.attempted, 2);
    assert_eq!(result.succeeded, 2);
    assert_eq!(result.rows_written, 2);
    assert!(result.failed.is_empty());
    assert_eq!(result.view_rebuild, ViewRebuildStatus::Deferred);

    assert!(store.rebuild_view(DatasetFamily::DailyBars).await);
    let rows = store
        .read_view(DatasetFamily::DailyBars, ViewQuery::on_date(day("2025-01-02")))
        .await?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].entity_key, "000001.SZ");
    assert_eq!(rows[0].field("close"), Some(&FieldValue::Float(10.5)));
    assert_eq!(rows[1].entity_key, "000002.SZ");
    assert_eq!(rows[1].field("close"), Some(&FieldValue::Float(20.1)));
    assert_eq!(rows[1].field("open"), Some(&FieldValue::Null));
    Ok(())
}

#[tokio::test]
async fn upsert_roundtrips_through_the_view_and_normalizes_non_finite() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = StrataConfig::default_sqlite(base.join("store.sqlite").to_string_lossy());
    let store = StrataStore::connect(&config, base).await?;
    let entity = key("600000.SH");

    let outcome = store
        .upsert(
            DatasetFamily::TechnicalFactors,
            &entity,
            vec![
                ObservationRecord::new(entity.clone(), day("2025-01-03"))
                    .with_field("pe", 6.25)
                    .with_field("turnover_rate", f64::NAN)
                    .with_field("total_mv", f64::INFINITY),
                ObservationRecord::new(entity.clone(), day("2025-01-02")).with_field("pe", 6.0),
            ],
        )
        .await;
    assert!(outcome.succeeded(), "{:?}", outcome.error);
    assert_eq!(outcome.count, 2);

    assert!(store.rebuild_view(DatasetFamily::TechnicalFactors).await);
    let rows = store
        .read_view(DatasetFamily::TechnicalFactors, ViewQuery::for_entity(entity.clone()))
        .await?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].observation_date, day("2025-01-02"));
    assert_eq!(rows[1].field("pe"), Some(&FieldValue::Float(6.25)));
    assert_eq!(rows[1].field("turnover_rate"), Some(&FieldValue::Null));
    assert_eq!(rows[1].field("total_mv"), Some(&FieldValue::Null));
    assert_eq!(
        rows[1].field("updated_by"),
        Some(&FieldValue::Text("strata".to_string()))
    );
    Ok(())
}

#[tokio::test]
async fn applying_the_same_batch_twice_is_idempotent() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = StrataConfig::default_sqlite(base.join("store.sqlite").to_string_lossy());
    let store = StrataStore::connect(&config, base).await?;
    let batch = vec![
        bar("000001.SZ", "2025-01-02", 10.5),
        bar("000001.SZ", "2025-01-03", 10.7),
        bar("000002.SZ", "2025-01-02", 20.1),
    ];

    let first = store
        .upsert_batch(DatasetFamily::DailyBars, batch.clone(), false, &NoopJobControl)
        .await?;
    assert_eq!(first.view_rebuild, ViewRebuildStatus::Rebuilt);
    let before = store
        .read_view(DatasetFamily::DailyBars, ViewQuery::default())
        .await?;

    let second = store
        .upsert_batch(DatasetFamily::DailyBars, batch, false, &NoopJobControl)
        .await?;
    assert_eq!(second.rows_written, first.rows_written);
    assert_ne!(second.run_id, first.run_id);
    let after = store
        .read_view(DatasetFamily::DailyBars, ViewQuery::default())
        .await?;

    assert_eq!(before.len(), 3);
    assert_eq!(after.len(), before.len());
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.entity_key, new.entity_key);
        assert_eq!(old.observation_date, new.observation_date);
        let strip = |row: &strata_store::ViewRow| {
            let mut fields = row.fields.clone();
            fields.remove("updated_at");
            fields
        };
        assert_eq!(strip(old), strip(new));
    }
    Ok(())
}

#[tokio::test]
async fn duplicate_rows_in_a_batch_keep_the_last_write() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = StrataConfig::default_sqlite(base.join("store.sqlite").to_string_lossy());
    let store = StrataStore::connect(&config, base).await?;

    let result = store
        .upsert_batch(
            DatasetFamily::DailyBars,
            vec![
                bar("000001.SZ", "2025-01-02", 1.0),
                bar("000001.SZ", "2025-01-02", 2.0),
                bar("000001.SZ", "2025-01-02", 3.0),
            ],
            false,
            &NoopJobControl,
        )
        .await?;
    assert_eq!(result.rows_written, 1);
    let rows = store
        .read_view(DatasetFamily::DailyBars, ViewQuery::default())
        .await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].field("close"), Some(&FieldValue::Float(3.0)));
    Ok(())
}

#[tokio::test]
async fn fixed_families_ignore_unknown_fields() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = StrataConfig::default_sqlite(base.join("store.sqlite").to_string_lossy());
    let store = StrataStore::connect(&config, base).await?;

    let result = store
        .upsert_batch(
            DatasetFamily::DailyBars,
            vec![bar("000001.SZ", "2025-01-02", 10.5).with_field("mystery", 1.0)],
            false,
            &NoopJobControl,
        )
        .await?;
    assert_eq!(result.succeeded, 1);
    let columns = store.view_columns(DatasetFamily::DailyBars).await?;
    assert!(columns.iter().any(|column| column == "close"));
    assert!(!columns.iter().any(|column| column == "mystery"));
    Ok(())
}

#[tokio::test]
async fn invalid_shard_name_rejects_the_whole_batch_before_ddl() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = StrataConfig::default_sqlite(base.join("store.sqlite").to_string_lossy());
    let store = StrataStore::connect(&config, base).await?;

    let err = store
        .upsert_batch(
            DatasetFamily::DailyBars,
            vec![
                bar("000001.SZ", "2025-01-02", 10.5),
                bar("VIEW", "2025-01-02", 1.0),
            ],
            false,
            &NoopJobControl,
        )
        .await
        .expect_err("reserved suffix");
    assert!(matches!(err, StrataError::InvalidIdentifier { .. }));
    assert!(
        store
            .list_family_shards(DatasetFamily::DailyBars)
            .await?
            .is_empty()
    );
    Ok(())
}

#[tokio::test]
async fn ensure_shard_exists_is_idempotent() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = StrataConfig::default_sqlite(base.join("store.sqlite").to_string_lossy());
    let store = StrataStore::connect(&config, base).await?;
    let definition = store
        .registry()
        .get_or_create_shard_definition(DatasetFamily::ProFactors, &key("000001.SZ"))?;

    assert!(store.ensure_shard_exists(&definition).await);
    assert!(store.ensure_shard_exists(&definition).await);
    let shards = store.list_family_shards(DatasetFamily::ProFactors).await?;
    assert_eq!(
        shards.iter().map(|shard| shard.as_str()).collect::<Vec<_>>(),
        vec!["ts_factors_pro_000001"]
    );
    assert!(store.list_family_shards(DatasetFamily::TechnicalFactors).await?.is_empty());

    assert!(store.rebuild_view(DatasetFamily::ProFactors).await);
    let columns = store.view_columns(DatasetFamily::ProFactors).await?;
    assert_eq!(columns.len(), definition.columns.len());
    assert_eq!(columns[0], "entity_key");
    Ok(())
}
