//! Unified view materialization. The family view is the only object this module
//! creates or replaces.
//!
//! A rebuild tries each [`ViewBuildStrategy`] in order: the in-engine routine first
//! where one is installed, then the client-side builder. Rebuilds of one family are
//! serialized and coalesced, so a request arriving while another rebuild is running is
//! satisfied by the next rebuild that starts after it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use sea_orm::sea_query::{Alias, Expr, Order, Query, Value as SeaValue};
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, QueryResult, Statement,
    TransactionTrait,
};
use tokio::sync::Mutex;

use crate::StrataStore;
use crate::db::VIEW_ROUTINE_NAME;
use crate::sql::{self, CatalogColumn, TableFilter};
use strata_core::{
    ColumnKind, DATE_COLUMN, DatasetFamily, ENTITY_KEY_COLUMN, FieldValue, StrataError,
    StrataResult, TablePrefix, UnifiedViewApi, ViewQuery, ViewRow,
};

/// What one family view rebuild needs to know, independent of strategy.
#[derive(Clone, Debug)]
pub struct ViewTarget {
    pub family: DatasetFamily,
    pub table_prefix: TablePrefix,
    pub view_name: String,
    /// `<prefix>_<token>_`; every member shard starts with it.
    pub shard_prefix: String,
    /// Prefixes of more specific families that also start with `shard_prefix`.
    pub excluded_prefixes: Vec<String>,
}

impl ViewTarget {
    pub fn new(table_prefix: &TablePrefix, family: DatasetFamily) -> Self {
        let prefix = table_prefix.as_str();
        Self {
            family,
            table_prefix: table_prefix.clone(),
            view_name: family.view_name(prefix),
            shard_prefix: family.shard_prefix(prefix),
            excluded_prefixes: family.more_specific_prefixes(prefix),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewBuildOutcome {
    Built { shards: usize },
    /// No shard exists; the existing view was left alone.
    Empty,
    /// The strategy cannot run on this backend.
    Unsupported,
    Failed(String),
}

#[async_trait]
pub trait ViewBuildStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn build(&self, conn: &DatabaseConnection, target: &ViewTarget) -> ViewBuildOutcome;
}

/// Calls the stored routine installed by migration. MySQL only.
#[derive(Debug, Default)]
pub struct ServerRoutineStrategy {
    forced_failure: bool,
}

impl ServerRoutineStrategy {
    /// `forced_failure` backs the `view_routine` failpoint.
    pub fn new(forced_failure: bool) -> Self {
        Self { forced_failure }
    }

    async fn call(&self, conn: &DatabaseConnection, target: &ViewTarget) -> StrataResult<i64> {
        let excludes = serde_json::to_string(&target.excluded_prefixes)
            .map_err(|err| StrataError::storage(err.to_string()))?;
        // Session variables are per connection, so CALL and SELECT share one.
        let txn = conn.begin().await?;
        txn.execute(Statement::from_sql_and_values(
            DatabaseBackend::MySql,
            format!("CALL `{VIEW_ROUTINE_NAME}`(?, ?, ?)"),
            [
                SeaValue::from(target.shard_prefix.as_str()),
                SeaValue::from(excludes),
                SeaValue::from(target.view_name.as_str()),
            ],
        ))
        .await?;
        let row = txn
            .query_one(Statement::from_string(
                DatabaseBackend::MySql,
                "SELECT CAST(@strata_shard_count AS SIGNED) AS shard_count",
            ))
            .await?;
        txn.commit().await?;
        let count = match row {
            Some(row) => row.try_get::<Option<i64>>("", "shard_count")?.unwrap_or(0),
            None => 0,
        };
        Ok(count)
    }
}

#[async_trait]
impl ViewBuildStrategy for ServerRoutineStrategy {
    fn name(&self) -> &'static str {
        "server-routine"
    }

    async fn build(&self, conn: &DatabaseConnection, target: &ViewTarget) -> ViewBuildOutcome {
        if conn.get_database_backend() != DatabaseBackend::MySql {
            return ViewBuildOutcome::Unsupported;
        }
        if self.forced_failure {
            return ViewBuildOutcome::Failed("failpoint view_routine".to_string());
        }
        match self.call(conn, target).await {
            Ok(0) => ViewBuildOutcome::Empty,
            Ok(count) => ViewBuildOutcome::Built {
                shards: usize::try_from(count).unwrap_or_default(),
            },
            Err(err) => ViewBuildOutcome::Failed(err.to_string()),
        }
    }
}

/// Enumerates shards through catalog metadata and issues the view DDL from the process.
#[derive(Debug, Default)]
pub struct ClientUnionStrategy {
    forced_failure: bool,
}

impl ClientUnionStrategy {
    /// `forced_failure` backs the `view_client` failpoint.
    pub fn new(forced_failure: bool) -> Self {
        Self { forced_failure }
    }
}

#[async_trait]
impl ViewBuildStrategy for ClientUnionStrategy {
    fn name(&self) -> &'static str {
        "client-union"
    }

    async fn build(&self, conn: &DatabaseConnection, target: &ViewTarget) -> ViewBuildOutcome {
        let plan = match plan_union(conn, target).await {
            Ok(Some(_)) if self.forced_failure => {
                return ViewBuildOutcome::Failed("failpoint view_client".to_string());
            }
            Ok(Some(plan)) => plan,
            Ok(None) => return ViewBuildOutcome::Empty,
            Err(err) => return ViewBuildOutcome::Failed(err.to_string()),
        };
        let backend = conn.get_database_backend();
        let body = union_sql(backend, &plan);
        match replace_view(conn, &target.view_name, &body).await {
            Ok(()) => ViewBuildOutcome::Built {
                shards: plan.tables.len(),
            },
            Err(err) => ViewBuildOutcome::Failed(err.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct UnionColumn {
    pub name: String,
    /// Declared type from the first shard carrying the column.
    pub sql_type: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct UnionPlan {
    pub tables: Vec<String>,
    pub columns: Vec<UnionColumn>,
    pub present: HashMap<String, Vec<String>>,
}

/// Column union ordered by the smallest ordinal position any shard gives a column,
/// then by name; tables ordered by name.
pub(crate) fn order_union(tables: Vec<String>, described: &[CatalogColumn]) -> UnionPlan {
    let mut first_seen: BTreeMap<&str, (i64, &str)> = BTreeMap::new();
    let mut present: HashMap<String, Vec<String>> = HashMap::new();
    for column in described {
        if !tables.iter().any(|table| *table == column.table) {
            continue;
        }
        first_seen
            .entry(column.name.as_str())
            .and_modify(|slot| {
                if column.ordinal < slot.0 {
                    slot.0 = column.ordinal;
                }
            })
            .or_insert((column.ordinal, column.sql_type.as_str()));
        present
            .entry(column.table.clone())
            .or_default()
            .push(column.name.clone());
    }
    let mut columns: Vec<(i64, UnionColumn)> = first_seen
        .into_iter()
        .map(|(name, (ordinal, sql_type))| {
            (
                ordinal,
                UnionColumn {
                    name: name.to_string(),
                    sql_type: sql_type.to_string(),
                },
            )
        })
        .collect();
    columns.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.name.cmp(&b.1.name)));
    let mut tables = tables;
    tables.sort();
    UnionPlan {
        tables,
        columns: columns.into_iter().map(|(_, column)| column).collect(),
        present,
    }
}

async fn plan_union(
    conn: &DatabaseConnection,
    target: &ViewTarget,
) -> StrataResult<Option<UnionPlan>> {
    let prefix = target.table_prefix.as_str();
    let tables: Vec<String> = sql::list_tables(conn, TableFilter::Prefix(&target.shard_prefix))
        .await?
        .into_iter()
        .filter(|name| target.family.owns_table(prefix, name))
        .collect();
    if tables.is_empty() {
        return Ok(None);
    }
    let described = sql::describe_columns(conn, TableFilter::Prefix(&target.shard_prefix)).await?;
    Ok(Some(order_union(tables, &described)))
}

/// `SELECT` per shard with explicit columns, `NULL` where a shard lacks one.
pub(crate) fn union_sql(backend: DatabaseBackend, plan: &UnionPlan) -> String {
    let empty = Vec::new();
    plan.tables
        .iter()
        .map(|table| {
            let present = plan.present.get(table).unwrap_or(&empty);
            let projection = plan
                .columns
                .iter()
                .map(|column| {
                    let quoted = sql::quote_ident(backend, &column.name);
                    if present.contains(&column.name) {
                        quoted
                    } else if backend == DatabaseBackend::Postgres && !column.sql_type.is_empty() {
                        format!("CAST(NULL AS {}) AS {quoted}", column.sql_type)
                    } else {
                        format!("NULL AS {quoted}")
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("SELECT {projection} FROM {}", sql::quote_ident(backend, table))
        })
        .collect::<Vec<_>>()
        .join(" UNION ALL ")
}

/// Swap the view definition. Where the engine has no CREATE OR REPLACE VIEW for a
/// changed column list, drop and create inside one transaction.
async fn replace_view(conn: &DatabaseConnection, view: &str, body: &str) -> StrataResult<()> {
    let backend = conn.get_database_backend();
    let quoted = sql::quote_ident(backend, view);
    match backend {
        DatabaseBackend::MySql => {
            conn.execute_unprepared(&format!("CREATE OR REPLACE VIEW {quoted} AS {body}"))
                .await?;
        }
        _ => {
            let txn = conn.begin().await?;
            txn.execute_unprepared(&format!("DROP VIEW IF EXISTS {quoted}"))
                .await?;
            txn.execute_unprepared(&format!("CREATE VIEW {quoted} AS {body}"))
                .await?;
            txn.commit().await?;
        }
    }
    Ok(())
}

/// Rebuild counters for one family.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ViewStats {
    /// `rebuild_view` calls, coalesced or not.
    pub requests: u64,
    /// Rebuilds that actually ran the strategy chain.
    pub rebuilds: u64,
    pub server_builds: u64,
    pub client_builds: u64,
    pub skipped_empty: u64,
    pub failures: u64,
}

#[derive(Default)]
struct StatCounters {
    requests: AtomicU64,
    rebuilds: AtomicU64,
    server_builds: AtomicU64,
    client_builds: AtomicU64,
    skipped_empty: AtomicU64,
    failures: AtomicU64,
}

impl StatCounters {
    fn snapshot(&self) -> ViewStats {
        ViewStats {
            requests: self.requests.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            server_builds: self.server_builds.load(Ordering::Relaxed),
            client_builds: self.client_builds.load(Ordering::Relaxed),
            skipped_empty: self.skipped_empty.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

struct RebuildState {
    /// Highest request ticket a finished rebuild is known to cover.
    covered: u64,
    last_result: bool,
}

struct FamilySlot {
    tickets: AtomicU64,
    state: Mutex<RebuildState>,
    stats: StatCounters,
}

impl FamilySlot {
    fn new() -> Self {
        Self {
            tickets: AtomicU64::new(0),
            state: Mutex::new(RebuildState {
                covered: 0,
                last_result: false,
            }),
            stats: StatCounters::default(),
        }
    }
}

pub struct ViewMaterializer {
    conn: DatabaseConnection,
    prefix: TablePrefix,
    strategies: Vec<Arc<dyn ViewBuildStrategy>>,
    slots: HashMap<DatasetFamily, FamilySlot>,
}

impl ViewMaterializer {
    pub fn new(
        conn: DatabaseConnection,
        prefix: TablePrefix,
        strategies: Vec<Arc<dyn ViewBuildStrategy>>,
    ) -> Self {
        let slots = DatasetFamily::ALL
            .into_iter()
            .map(|family| (family, FamilySlot::new()))
            .collect();
        Self {
            conn,
            prefix,
            strategies,
            slots,
        }
    }

    pub fn stats(&self, family: DatasetFamily) -> ViewStats {
        self.slots
            .get(&family)
            .map(|slot| slot.stats.snapshot())
            .unwrap_or_default()
    }

    pub async fn rebuild(&self, family: DatasetFamily) -> bool {
        let Some(slot) = self.slots.get(&family) else {
            return false;
        };
        slot.stats.requests.fetch_add(1, Ordering::Relaxed);
        let ticket = slot.tickets.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = slot.state.lock().await;
        if state.covered >= ticket {
            log::debug!("{family} view rebuild coalesced into a newer rebuild");
            return state.last_result;
        }
        // Every ticket issued so far is covered, since this rebuild starts after all of them.
        let covers = slot.tickets.load(Ordering::SeqCst);
        slot.stats.rebuilds.fetch_add(1, Ordering::Relaxed);
        let result = self.run_strategies(family, &slot.stats).await;
        state.covered = covers;
        state.last_result = result;
        result
    }

    async fn run_strategies(&self, family: DatasetFamily, stats: &StatCounters) -> bool {
        let target = ViewTarget::new(&self.prefix, family);
        for strategy in &self.strategies {
            match strategy.build(&self.conn, &target).await {
                ViewBuildOutcome::Built { shards } => {
                    let counter = if strategy.name() == "server-routine" {
                        &stats.server_builds
                    } else {
                        &stats.client_builds
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                    log::info!(
                        "rebuilt {} over {shards} shards via {}",
                        target.view_name,
                        strategy.name()
                    );
                    return true;
                }
                ViewBuildOutcome::Empty => {
                    stats.skipped_empty.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "no shards for {family}; leaving {} untouched",
                        target.view_name
                    );
                    return false;
                }
                ViewBuildOutcome::Unsupported => {
                    log::debug!("{} unsupported on this backend", strategy.name());
                }
                ViewBuildOutcome::Failed(message) => {
                    log::warn!(
                        "{} failed to rebuild {}: {message}",
                        strategy.name(),
                        target.view_name
                    );
                }
            }
        }
        stats.failures.fetch_add(1, Ordering::Relaxed);
        log::error!(
            "{}",
            StrataError::view_rebuild(&target.view_name, "all strategies failed; stale view kept")
        );
        false
    }
}

/// Decode one view cell guided by the declared column type, falling back through the
/// plain scalar types when the declaration is missing.
fn decode_cell(row: &QueryResult, column: &CatalogColumn) -> FieldValue {
    let name = column.name.as_str();
    let by_kind = match ColumnKind::from_sql_type(&column.sql_type) {
        Some(ColumnKind::Double) => row.try_get::<Option<f64>>("", name).ok().map(FieldValue::from),
        Some(ColumnKind::BigInt) => row
            .try_get::<Option<i64>>("", name)
            .ok()
            .map(|value| value.map(FieldValue::Int).unwrap_or(FieldValue::Null)),
        Some(ColumnKind::Boolean) => row
            .try_get::<Option<bool>>("", name)
            .ok()
            .map(|value| value.map(FieldValue::Bool).unwrap_or(FieldValue::Null)),
        Some(ColumnKind::Timestamp) => row
            .try_get::<Option<chrono::NaiveDateTime>>("", name)
            .ok()
            .map(|value| {
                value
                    .map(|stamp| FieldValue::Text(stamp.to_string()))
                    .unwrap_or(FieldValue::Null)
            }),
        Some(ColumnKind::Text | ColumnKind::Key | ColumnKind::Audit) => row
            .try_get::<Option<String>>("", name)
            .ok()
            .map(|value| value.map(FieldValue::Text).unwrap_or(FieldValue::Null)),
        _ => None,
    };
    if let Some(value) = by_kind {
        return value;
    }
    if let Ok(value) = row.try_get::<Option<f64>>("", name) {
        return FieldValue::from(value);
    }
    if let Ok(value) = row.try_get::<Option<i64>>("", name) {
        return value.map(FieldValue::Int).unwrap_or(FieldValue::Null);
    }
    if let Ok(value) = row.try_get::<Option<String>>("", name) {
        return value.map(FieldValue::Text).unwrap_or(FieldValue::Null);
    }
    FieldValue::Null
}

fn decode_date(row: &QueryResult) -> StrataResult<chrono::NaiveDate> {
    if let Ok(date) = row.try_get::<chrono::NaiveDate>("", DATE_COLUMN) {
        return Ok(date);
    }
    let raw: String = row.try_get("", DATE_COLUMN)?;
    chrono::NaiveDate::parse_from_str(raw.get(..10).unwrap_or(&raw), "%Y-%m-%d")
        .map_err(|err| StrataError::storage(format!("bad {DATE_COLUMN} {raw:?}: {err}")))
}

impl StrataStore {
    async fn view_catalog(&self, family: DatasetFamily) -> StrataResult<Vec<CatalogColumn>> {
        let view = self.registry.namer().view_name(family);
        let columns = sql::describe_columns(&self.conn, TableFilter::Exact(&view)).await?;
        if columns.is_empty() {
            return Err(StrataError::not_found(format!("view {view}")));
        }
        Ok(columns)
    }
}

#[async_trait]
impl UnifiedViewApi for StrataStore {
    async fn rebuild_view(&self, family: DatasetFamily) -> bool {
        self.views.rebuild(family).await
    }

    async fn view_columns(&self, family: DatasetFamily) -> StrataResult<Vec<String>> {
        Ok(self
            .view_catalog(family)
            .await?
            .into_iter()
            .map(|column| column.name)
            .collect())
    }

    async fn read_view(
        &self,
        family: DatasetFamily,
        query: ViewQuery,
    ) -> StrataResult<Vec<ViewRow>> {
        let columns = self.view_catalog(family).await?;
        let view = self.registry.namer().view_name(family);
        let mut select = Query::select();
        select
            .from(Alias::new(view.as_str()))
            .columns(columns.iter().map(|column| Alias::new(column.name.as_str())))
            .order_by(Alias::new(ENTITY_KEY_COLUMN), Order::Asc)
            .order_by(Alias::new(DATE_COLUMN), Order::Asc);
        if let Some(entity) = &query.entity_key {
            select.and_where(Expr::col(Alias::new(ENTITY_KEY_COLUMN)).eq(entity.as_str()));
        }
        if let Some(from) = query.from_date {
            select.and_where(Expr::col(Alias::new(DATE_COLUMN)).gte(from));
        }
        if let Some(to) = query.to_date {
            select.and_where(Expr::col(Alias::new(DATE_COLUMN)).lte(to));
        }
        if let Some(limit) = query.limit {
            select.limit(limit);
        }
        let rows = sql::query_all(&self.conn, &select).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let entity_key: String = row.try_get("", ENTITY_KEY_COLUMN)?;
            let observation_date = decode_date(&row)?;
            let fields = columns
                .iter()
                .filter(|column| column.name != ENTITY_KEY_COLUMN && column.name != DATE_COLUMN)
                .map(|column| (column.name.clone(), decode_cell(&row, column)))
                .collect();
            out.push(ViewRow {
                entity_key,
                observation_date,
                fields,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::DatabaseBackend;

    use super::{ViewTarget, order_union, union_sql};
    use crate::sql::CatalogColumn;
    use strata_core::{DatasetFamily, TablePrefix};

    fn column(table: &str, name: &str, ordinal: i64) -> CatalogColumn {
        CatalogColumn {
            table: table.to_string(),
            name: name.to_string(),
            sql_type: "double precision".to_string(),
            comment: None,
            ordinal,
        }
    }

    #[test]
    fn target_excludes_more_specific_families() {
        let prefix = TablePrefix::parse("ts").expect("prefix");
        let target = ViewTarget::new(&prefix, DatasetFamily::DailyBars);
        assert_eq!(target.view_name, "ts_daily_view");
        assert_eq!(target.shard_prefix, "ts_daily_");
        assert_eq!(target.excluded_prefixes, vec!["ts_daily_indicators_"]);
    }

    #[test]
    fn union_pads_missing_columns_in_stable_order() {
        let described = vec![
            column("ts_factors_custom_b", "entity_key", 1),
            column("ts_factors_custom_b", "beta", 2),
            column("ts_factors_custom_a", "entity_key", 1),
            column("ts_factors_custom_a", "alpha", 2),
            column("ts_factors_custom_a", "gamma", 3),
        ];
        let plan = order_union(
            vec!["ts_factors_custom_b".into(), "ts_factors_custom_a".into()],
            &described,
        );
        let names: Vec<&str> = plan.columns.iter().map(|column| column.name.as_str()).collect();
        assert_eq!(names, vec!["entity_key", "alpha", "beta", "gamma"]);
        assert_eq!(plan.tables, vec!["ts_factors_custom_a", "ts_factors_custom_b"]);

        let sql = union_sql(DatabaseBackend::Sqlite, &plan);
        assert_eq!(
            sql,
            "SELECT \"entity_key\", \"alpha\", NULL AS \"beta\", \"gamma\" FROM \"ts_factors_custom_a\" \
             UNION ALL SELECT \"entity_key\", NULL AS \"alpha\", \"beta\", NULL AS \"gamma\" FROM \"ts_factors_custom_b\""
        );
    }

    #[test]
    fn postgres_padding_is_typed() {
        let described = vec![
            column("ts_daily_a", "close", 1),
            column("ts_daily_b", "open", 1),
        ];
        let plan = order_union(vec!["ts_daily_a".into(), "ts_daily_b".into()], &described);
        let sql = union_sql(DatabaseBackend::Postgres, &plan);
        assert!(sql.contains("CAST(NULL AS double precision) AS \"open\""), "{sql}");
    }

    #[test]
    fn columns_of_unlisted_tables_are_ignored() {
        let described = vec![
            column("ts_daily_a", "close", 3),
            column("ts_daily_view", "stale", 1),
        ];
        let plan = order_union(vec!["ts_daily_a".into()], &described);
        assert_eq!(plan.columns.len(), 1);
        assert_eq!(plan.columns[0].name, "close");
    }
}
