use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    BatchResult, ColumnSpec, ColumnSyncReport, DatasetFamily, EntityKey, JobControl,
    LifecyclePhase, ObservationRecord, ProvisionResult, ShardDefinition, StrataResult, TableName,
    UpsertOutcome, ViewRow,
};

/// DDL over shard tables. Failures are logged and reported as `false`.
#[async_trait]
pub trait ShardCatalogApi {
    async fn ensure_shard_exists(&self, definition: &ShardDefinition) -> bool;

    async fn ensure_column_exists(&self, table: &TableName, column: &ColumnSpec) -> bool;

    async fn list_family_shards(&self, family: DatasetFamily) -> StrataResult<Vec<TableName>>;
}

#[async_trait]
pub trait ShardWriteApi {
    async fn upsert(
        &self,
        family: DatasetFamily,
        entity: &EntityKey,
        rows: Vec<ObservationRecord>,
    ) -> UpsertOutcome;

    async fn upsert_batch(
        &self,
        family: DatasetFamily,
        records: Vec<ObservationRecord>,
        defer_view_rebuild: bool,
        job: &dyn JobControl,
    ) -> StrataResult<BatchResult>;
}

#[async_trait]
pub trait UnifiedViewApi {
    async fn rebuild_view(&self, family: DatasetFamily) -> bool;

    async fn view_columns(&self, family: DatasetFamily) -> StrataResult<Vec<String>>;

    async fn read_view(&self, family: DatasetFamily, query: ViewQuery)
    -> StrataResult<Vec<ViewRow>>;
}

#[async_trait]
pub trait ColumnSyncApi {
    async fn sync_columns(&self, family: DatasetFamily) -> StrataResult<ColumnSyncReport>;
}

#[async_trait]
pub trait PartitionLifecycleApi {
    async fn detect_new_entities(&self) -> StrataResult<Vec<EntityKey>>;

    async fn provision_entities(
        &self,
        entities: Vec<EntityKey>,
        job: &dyn JobControl,
    ) -> StrataResult<ProvisionResult>;

    fn lifecycle_phase(&self) -> LifecyclePhase;
}

/// Canonical registry of known entities that provisioning diffs against.
#[async_trait]
pub trait EntityRegistryApi {
    async fn register_entities(&self, entries: Vec<EntityRegistration>) -> StrataResult<usize>;

    async fn deactivate_entity(&self, entity: &EntityKey) -> StrataResult<bool>;

    async fn list_active_entities(&self) -> StrataResult<Vec<EntityKey>>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRegistration {
    pub entity_key: EntityKey,
    pub display_name: Option<String>,
    pub listed_on: Option<NaiveDate>,
}

impl EntityRegistration {
    pub fn new(entity_key: EntityKey) -> Self {
        Self {
            entity_key,
            display_name: None,
            listed_on: None,
        }
    }
}

/// Filter for reading a family's unified view.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewQuery {
    pub entity_key: Option<EntityKey>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub limit: Option<u64>,
}

impl ViewQuery {
    pub fn on_date(date: NaiveDate) -> Self {
        Self {
            from_date: Some(date),
            to_date: Some(date),
            ..Self::default()
        }
    }

    pub fn for_entity(entity: EntityKey) -> Self {
        Self {
            entity_key: Some(entity),
            ..Self::default()
        }
    }
}
