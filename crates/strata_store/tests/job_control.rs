use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use strata_store::{
    DatasetFamily, EntityKey, JobControl, JobSignal, LifecyclePhase, ObservationRecord,
    PartitionLifecycleApi, ShardCatalogApi, ShardWriteApi, StrataConfig, StrataError,
    StrataResult, StrataStore, UnifiedViewApi, ViewQuery, WriterConfig,
};
use tempfile::tempdir;

/// Lets `allowed` checks through, then terminates; records every progress report.
#[derive(Default)]
struct ScriptedJob {
    allowed: usize,
    checks: AtomicUsize,
    reports: Mutex<Vec<(usize, usize)>>,
}

impl ScriptedJob {
    fn terminating_after(allowed: usize) -> Self {
        Self {
            allowed,
            ..Self::default()
        }
    }

    fn reports(&self) -> Vec<(usize, usize)> {
        self.reports.lock().expect("lock").clone()
    }
}

#[async_trait]
impl JobControl for ScriptedJob {
    async fn check_cancelled_or_paused(&self) -> StrataResult<()> {
        let seen = self.checks.fetch_add(1, Ordering::SeqCst);
        if seen >= self.allowed {
            Err(StrataError::terminated("scripted stop"))
        } else {
            Ok(())
        }
    }

    fn report_progress(&self, processed: usize, total: usize, _: &str, _: &str) {
        self.reports.lock().expect("lock").push((processed, total));
    }
}

fn bars(entities: &[&str]) -> Vec<ObservationRecord> {
    let date = NaiveDate::from_ymd_opt(2025, 1, 2).expect("date");
    entities
        .iter()
        .map(|raw| {
            ObservationRecord::new(EntityKey::parse(raw).expect("key"), date)
                .with_field("close", 1.0)
        })
        .collect()
}

fn chatty_config(base: &std::path::Path) -> StrataConfig {
    let mut config = StrataConfig::default_sqlite(base.join("store.sqlite").to_string_lossy());
    config.writer = Some(WriterConfig {
        progress_every: Some(1),
        ..WriterConfig::with_defaults()
    });
    config
}

#[tokio::test]
async fn termination_keeps_committed_groups() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = StrataStore::connect(&chatty_config(dir.path()), dir.path()).await?;
    let job = ScriptedJob::terminating_after(2);

    let err = store
        .upsert_batch(
            DatasetFamily::DailyBars,
            bars(&["000001.SZ", "000002.SZ", "000003.SZ", "000004.SZ"]),
            false,
            &job,
        )
        .await
        .expect_err("terminated");
    assert!(matches!(err, StrataError::BatchTerminated { .. }));

    let shards = store.list_family_shards(DatasetFamily::DailyBars).await?;
    assert_eq!(
        shards.iter().map(|shard| shard.as_str()).collect::<Vec<_>>(),
        vec!["ts_daily_000001", "ts_daily_000002"]
    );
    assert_eq!(store.view_stats(DatasetFamily::DailyBars).requests, 0);

    assert!(store.rebuild_view(DatasetFamily::DailyBars).await);
    let rows = store
        .read_view(DatasetFamily::DailyBars, ViewQuery::default())
        .await?;
    assert_eq!(rows.len(), 2);
    Ok(())
}

#[tokio::test]
async fn progress_is_reported_per_entity() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = StrataStore::connect(&chatty_config(dir.path()), dir.path()).await?;
    let job = ScriptedJob::terminating_after(usize::MAX);

    let result = store
        .upsert_batch(
            DatasetFamily::DailyBars,
            bars(&["000001.SZ", "000002.SZ", "000003.SZ"]),
            true,
            &job,
        )
        .await?;
    assert_eq!(result.succeeded, 3);
    assert_eq!(job.reports(), vec![(1, 3), (2, 3), (3, 3)]);
    assert_eq!(job.checks.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn terminated_signal_stops_provisioning_and_resets_phase() -> StrataResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = StrataStore::connect(&chatty_config(dir.path()), dir.path()).await?;
    let signal = JobSignal::new();
    signal.terminate();

    let err = store
        .provision_entities(vec![EntityKey::parse("000001.SZ").expect("key")], &signal)
        .await
        .expect_err("terminated");
    assert!(matches!(err, StrataError::BatchTerminated { .. }));
    assert_eq!(store.lifecycle_phase(), LifecyclePhase::Idle);
    assert!(
        store
            .list_family_shards(DatasetFamily::DailyBars)
            .await?
            .is_empty()
    );
    Ok(())
}
