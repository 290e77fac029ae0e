//! Shard DML. Every row write goes through [`StrataStore::write_group`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sea_orm::TransactionTrait;
use sea_orm::sea_query::{Alias, OnConflict, Query, SimpleExpr, Value as SeaValue};
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};

use crate::StrataStore;
use crate::sql::{self, TableFilter};
use strata_core::{
    BatchResult, ColumnKind, ColumnSpec, DATE_COLUMN, DatasetFamily, ENTITY_KEY_COLUMN,
    EntityKey, FieldValue, GENERIC_COLUMN_COMMENT, JobControl, ObservationRecord,
    ProgressThrottle, ShardCatalogApi, ShardDefinition, ShardWriteApi, StrataError,
    StrataResult, UPDATED_AT_COLUMN, UPDATED_BY_COLUMN, UnifiedViewApi, UpsertOutcome,
    ViewRebuildStatus, validate_column_name,
};

/// Stay below the smallest bind-parameter ceiling across supported engines.
const MAX_BIND_PARAMS: usize = 30_000;

/// One entity's rows, deduplicated and ordered by date.
#[derive(Debug)]
pub(crate) struct EntityGroup {
    pub entity_key: EntityKey,
    pub rows: Vec<ObservationRecord>,
}

/// Group by entity in first-seen order, keep the last record per (entity, date), and
/// sort each group by date ascending.
pub(crate) fn group_records(records: Vec<ObservationRecord>) -> Vec<EntityGroup> {
    let mut order: Vec<EntityKey> = Vec::new();
    let mut grouped: HashMap<EntityKey, BTreeMap<NaiveDate, ObservationRecord>> = HashMap::new();
    for record in records {
        let rows = grouped.entry(record.entity_key.clone()).or_insert_with(|| {
            order.push(record.entity_key.clone());
            BTreeMap::new()
        });
        rows.insert(record.observation_date, record);
    }
    order
        .into_iter()
        .map(|entity_key| {
            let rows = grouped
                .remove(&entity_key)
                .map(|rows| rows.into_values().collect())
                .unwrap_or_default();
            EntityGroup { entity_key, rows }
        })
        .collect()
}

/// Convert a producer value into a bind value typed for the target column.
pub(crate) fn bind_value(kind: ColumnKind, value: Option<&FieldValue>) -> SeaValue {
    let value = value.cloned().map(FieldValue::normalized);
    match kind {
        ColumnKind::Double => SeaValue::Double(value.and_then(|value| match value {
            FieldValue::Text(text) => text.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            FieldValue::Bool(flag) => Some(if flag { 1.0 } else { 0.0 }),
            other => other.as_f64(),
        })),
        ColumnKind::BigInt => SeaValue::BigInt(value.and_then(|value| match value {
            FieldValue::Int(number) => Some(number),
            FieldValue::Float(number) if number.fract() == 0.0 => Some(number as i64),
            FieldValue::Bool(flag) => Some(i64::from(flag)),
            FieldValue::Text(text) => text.trim().parse::<i64>().ok(),
            _ => None,
        })),
        ColumnKind::Boolean => SeaValue::Bool(value.and_then(|value| match value {
            FieldValue::Bool(flag) => Some(flag),
            FieldValue::Int(number) => Some(number != 0),
            _ => None,
        })),
        ColumnKind::Text | ColumnKind::Key | ColumnKind::Audit => {
            SeaValue::String(value.and_then(|value| match value {
                FieldValue::Null => None,
                FieldValue::Text(text) => Some(Box::new(text)),
                FieldValue::Int(number) => Some(Box::new(number.to_string())),
                FieldValue::Float(number) => Some(Box::new(number.to_string())),
                FieldValue::Bool(flag) => Some(Box::new(flag.to_string())),
            }))
        }
        ColumnKind::Date | ColumnKind::Timestamp => SeaValue::String(None),
    }
}

/// Rows per INSERT so that rows × columns stays under the bind-parameter ceiling.
pub(crate) fn rows_per_statement(configured: usize, column_count: usize) -> usize {
    let by_params = MAX_BIND_PARAMS / column_count.max(1);
    configured.min(by_params).max(1)
}

impl StrataStore {
    /// Write one entity group into its shard: DDL, then one transaction of chunked
    /// multi-row upserts. Failures come back inside the outcome.
    pub(crate) async fn write_group(
        &self,
        definition: Arc<ShardDefinition>,
        rows: Vec<ObservationRecord>,
    ) -> UpsertOutcome {
        let entity_key = definition.entity_key.clone();
        match self.try_write_group(&definition, rows).await {
            Ok(count) => UpsertOutcome {
                entity_key,
                count,
                error: None,
            },
            Err(err) => {
                log::warn!("upsert into {} failed: {err}", definition.table_name);
                UpsertOutcome {
                    entity_key,
                    count: 0,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    async fn try_write_group(
        &self,
        definition: &ShardDefinition,
        rows: Vec<ObservationRecord>,
    ) -> StrataResult<usize> {
        let table = definition.table_name.as_str();
        if rows.is_empty() {
            return Ok(0);
        }
        self.create_shard(definition).await?;
        let columns = self.resolve_write_columns(definition, &rows).await?;
        self.maybe_failpoint(&format!("upsert:{table}"))?;

        let updated_at = Utc::now().naive_utc();
        let updated_by = self.writer.updated_by.clone();
        let mut insert_columns: Vec<Alias> = vec![
            Alias::new(ENTITY_KEY_COLUMN),
            Alias::new(DATE_COLUMN),
        ];
        insert_columns.extend(columns.iter().map(|column| Alias::new(column.name.as_str())));
        insert_columns.push(Alias::new(UPDATED_AT_COLUMN));
        insert_columns.push(Alias::new(UPDATED_BY_COLUMN));
        let update_columns: Vec<Alias> = insert_columns[2..].to_vec();
        let chunk_size = rows_per_statement(self.writer.max_rows_per_statement, insert_columns.len());

        let txn = self.conn.begin().await?;
        for chunk in rows.chunks(chunk_size) {
            let mut insert = Query::insert();
            insert
                .into_table(Alias::new(table))
                .columns(insert_columns.clone());
            for row in chunk {
                let mut values: Vec<SimpleExpr> = Vec::with_capacity(insert_columns.len());
                values.push(SeaValue::from(row.entity_key.as_str()).into());
                values.push(SeaValue::from(row.observation_date).into());
                for column in &columns {
                    values.push(bind_value(column.kind, row.field(&column.name)).into());
                }
                values.push(SeaValue::from(updated_at).into());
                values.push(SeaValue::from(updated_by.as_str()).into());
                insert
                    .values(values)
                    .map_err(|err| StrataError::shard_upsert(table, err.to_string()))?;
            }
            insert.on_conflict(
                OnConflict::columns([Alias::new(ENTITY_KEY_COLUMN), Alias::new(DATE_COLUMN)])
                    .update_columns(update_columns.clone())
                    .to_owned(),
            );
            sql::exec(&txn, &insert)
                .await
                .map_err(|err| StrataError::shard_upsert(table, err.to_string()))?;
        }
        txn.commit()
            .await
            .map_err(|err| StrataError::shard_upsert(table, err.to_string()))?;
        log::debug!("upserted {} rows into {table}", rows.len());
        Ok(rows.len())
    }

    /// Value columns this write touches. Fixed families always rewrite their whole
    /// canonical set; the open family writes the fields present, adding columns first.
    async fn resolve_write_columns(
        &self,
        definition: &ShardDefinition,
        rows: &[ObservationRecord],
    ) -> StrataResult<Vec<ColumnSpec>> {
        let table = &definition.table_name;
        if !definition.family.is_open() {
            let ignored: BTreeSet<&str> = rows
                .iter()
                .flat_map(|row| row.fields.keys())
                .map(String::as_str)
                .filter(|name| !definition.value_columns().any(|column| column.name == *name))
                .collect();
            if !ignored.is_empty() {
                log::debug!("{table}: ignoring fields outside the family schema: {ignored:?}");
            }
            return Ok(definition.value_columns().cloned().collect());
        }

        let existing: HashMap<String, ColumnKind> =
            sql::describe_columns(&self.conn, TableFilter::Exact(table.as_str()))
                .await?
                .into_iter()
                .map(|column| {
                    let kind =
                        ColumnKind::from_sql_type(&column.sql_type).unwrap_or(ColumnKind::Double);
                    (column.name, kind)
                })
                .collect();
        let mut wanted: BTreeMap<&str, Option<ColumnKind>> = BTreeMap::new();
        for row in rows {
            for (name, value) in &row.fields {
                let slot = wanted.entry(name.as_str()).or_insert(None);
                if value.is_null() {
                    continue;
                }
                let kind = value.inferred_kind();
                *slot = match *slot {
                    None => Some(kind),
                    Some(current) if current != kind && current.is_numeric() && kind.is_numeric() => {
                        Some(ColumnKind::Double)
                    }
                    keep => keep,
                };
            }
        }

        let mut columns = Vec::with_capacity(wanted.len());
        for (name, inferred) in wanted {
            let inferred = inferred.unwrap_or(ColumnKind::Double);
            let kind = match existing.get(name) {
                Some(kind) => *kind,
                None => {
                    let spec = ColumnSpec::new(
                        name,
                        inferred,
                        Some(GENERIC_COLUMN_COMMENT.to_string()),
                    );
                    if !self.ensure_column_exists(table, &spec).await {
                        return Err(StrataError::shard_ddl(
                            table.as_str(),
                            format!("could not add column {name}"),
                        ));
                    }
                    inferred
                }
            };
            columns.push(ColumnSpec::new(name, kind, None));
        }
        Ok(columns)
    }

    /// Reject the whole batch before any DDL when a key or open-family field name cannot
    /// become an identifier.
    fn prepare_groups(
        &self,
        family: DatasetFamily,
        groups: &[EntityGroup],
    ) -> StrataResult<Vec<Arc<ShardDefinition>>> {
        let mut definitions = Vec::with_capacity(groups.len());
        for group in groups {
            definitions.push(
                self.registry
                    .get_or_create_shard_definition(family, &group.entity_key)?,
            );
            if family.is_open() {
                for name in group.rows.iter().flat_map(|row| row.fields.keys()) {
                    validate_column_name(name)?;
                }
            }
        }
        Ok(definitions)
    }
}

#[async_trait]
impl ShardWriteApi for StrataStore {
    async fn upsert(
        &self,
        family: DatasetFamily,
        entity: &EntityKey,
        rows: Vec<ObservationRecord>,
    ) -> UpsertOutcome {
        let failed = |message: String| UpsertOutcome {
            entity_key: entity.clone(),
            count: 0,
            error: Some(message),
        };
        if let Some(stray) = rows.iter().find(|row| &row.entity_key != entity) {
            return failed(format!(
                "row for {} passed to upsert of {entity}",
                stray.entity_key
            ));
        }
        let groups = group_records(rows);
        let definitions = match self.prepare_groups(family, &groups) {
            Ok(definitions) => definitions,
            Err(err) => return failed(err.to_string()),
        };
        match (groups.into_iter().next(), definitions.into_iter().next()) {
            (Some(group), Some(definition)) => self.write_group(definition, group.rows).await,
            _ => UpsertOutcome {
                entity_key: entity.clone(),
                count: 0,
                error: None,
            },
        }
    }

    async fn upsert_batch(
        &self,
        family: DatasetFamily,
        records: Vec<ObservationRecord>,
        defer_view_rebuild: bool,
        job: &dyn JobControl,
    ) -> StrataResult<BatchResult> {
        let groups = group_records(records);
        let definitions = self.prepare_groups(family, &groups)?;
        let total = groups.len();
        let mut result = BatchResult::new(family, total, defer_view_rebuild);
        if total == 0 {
            return Ok(result);
        }
        log::info!(
            "upsert batch {} for {family}: {total} entities, {} workers",
            result.run_id,
            self.writer.workers
        );

        let throttle = ProgressThrottle::new(
            job,
            self.writer.progress_every,
            Duration::from_millis(self.writer.progress_interval_ms),
        );
        let permits = Arc::new(Semaphore::new(self.writer.workers));
        let mut workers: JoinSet<UpsertOutcome> = JoinSet::new();
        let mut processed = 0usize;
        let mut terminated = None;
        let mut in_flight: HashMap<Id, EntityKey> = HashMap::new();

        for (group, definition) in groups.into_iter().zip(definitions) {
            if let Err(err) = throttle.checkpoint().await {
                terminated = Some(err);
                break;
            }
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|err| StrataError::storage(format!("upsert pool closed: {err}")))?;
            let entity_key = definition.entity_key.clone();
            let store = self.clone();
            let handle = workers.spawn(async move {
                let outcome = store.write_group(definition, group.rows).await;
                drop(permit);
                outcome
            });
            in_flight.insert(handle.id(), entity_key);
            while let Some(joined) = workers.try_join_next_with_id() {
                processed += 1;
                let outcome = settle(joined, &mut in_flight)?;
                throttle.report(processed, total, outcome.entity_key.as_str(), "upsert");
                result.record(outcome, self.writer.max_failure_details);
            }
        }
        while let Some(joined) = workers.join_next_with_id().await {
            processed += 1;
            let outcome = settle(joined, &mut in_flight)?;
            throttle.report(processed, total, outcome.entity_key.as_str(), "upsert");
            result.record(outcome, self.writer.max_failure_details);
        }

        if let Some(err) = terminated {
            log::warn!(
                "upsert batch {} terminated after {} of {total} entities ({} committed)",
                result.run_id,
                processed,
                result.succeeded
            );
            return Err(err);
        }

        if !defer_view_rebuild {
            result.view_rebuild = if result.succeeded == 0 {
                ViewRebuildStatus::NotNeeded
            } else if self.rebuild_view(family).await {
                ViewRebuildStatus::Rebuilt
            } else {
                ViewRebuildStatus::Stale
            };
        }
        if result.is_hard_failure() {
            log::error!(
                "upsert batch {} for {family}: all {total} entities failed",
                result.run_id
            );
        } else {
            log::info!(
                "upsert batch {} for {family}: {} succeeded, {} failed, {} rows",
                result.run_id,
                result.succeeded,
                result.failed_count(),
                result.rows_written
            );
        }
        Ok(result)
    }
}

/// Match a finished worker back to its entity. A panicked or cancelled worker becomes that
/// entity's failure; the rest of the batch carries on.
fn settle(
    joined: Result<(Id, UpsertOutcome), JoinError>,
    in_flight: &mut HashMap<Id, EntityKey>,
) -> StrataResult<UpsertOutcome> {
    let (id, failure) = match joined {
        Ok((id, outcome)) => {
            in_flight.remove(&id);
            return Ok(outcome);
        }
        Err(err) => (err.id(), err),
    };
    let entity_key = in_flight
        .remove(&id)
        .ok_or_else(|| StrataError::storage(format!("upsert worker {id} has no entity")))?;
    Ok(failed_worker(entity_key, &failure))
}

fn failed_worker(entity_key: EntityKey, err: &JoinError) -> UpsertOutcome {
    let message = if err.is_panic() {
        format!("upsert worker panicked: {err}")
    } else {
        format!("upsert worker cancelled: {err}")
    };
    log::warn!("{entity_key}: {message}");
    UpsertOutcome {
        entity_key,
        count: 0,
        error: Some(message),
    }
}
