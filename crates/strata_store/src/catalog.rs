//! Shard DDL. This is the only module that creates or alters shard tables.

use async_trait::async_trait;
use sea_orm::sea_query::{Alias, ColumnDef, Index, Table};
use sea_orm::{ConnectionTrait, DatabaseBackend};

use crate::StrataStore;
use crate::sql::{self, TableFilter};
use strata_core::{
    ColumnKind, ColumnSpec, DatasetFamily, ShardCatalogApi, ShardDefinition, StrataError,
    StrataResult, TableName,
};

const KEY_COLUMN_LEN: u32 = 20;
const AUDIT_COLUMN_LEN: u32 = 64;

pub(crate) fn column_def(backend: DatabaseBackend, spec: &ColumnSpec) -> ColumnDef {
    let mut def = ColumnDef::new(Alias::new(spec.name.as_str()));
    match spec.kind {
        ColumnKind::Key => def.string_len(KEY_COLUMN_LEN),
        ColumnKind::Date => def.date(),
        ColumnKind::Double => def.double(),
        ColumnKind::BigInt => def.big_integer(),
        ColumnKind::Text => def.text(),
        ColumnKind::Boolean => def.boolean(),
        ColumnKind::Timestamp => def.date_time(),
        ColumnKind::Audit => def.string_len(AUDIT_COLUMN_LEN),
    };
    if spec.is_key() {
        def.not_null();
    } else {
        def.null();
    }
    if backend == DatabaseBackend::MySql
        && let Some(comment) = &spec.comment
    {
        def.comment(comment.as_str());
    }
    def
}

impl StrataStore {
    pub(crate) async fn create_shard(&self, definition: &ShardDefinition) -> StrataResult<()> {
        let table = definition.table_name.as_str();
        self.maybe_failpoint(&format!("ensure_shard:{table}"))?;
        if sql::table_exists(&self.conn, table).await? {
            return Ok(());
        }

        let mut create = Table::create();
        create.table(Alias::new(table)).if_not_exists();
        for column in definition.columns.iter() {
            create.col(&mut column_def(self.backend, column));
        }
        let mut primary = Index::create();
        primary.name(format!("pk_{table}"));
        for column in definition.primary_key() {
            primary.col(Alias::new(column));
        }
        create.primary_key(&mut primary);
        // MySQL has no CREATE INDEX IF NOT EXISTS; declare secondary indexes inline there.
        if self.backend == DatabaseBackend::MySql {
            for index in &definition.indexes {
                let mut inline = Index::create();
                inline.name(index.name.as_str());
                for column in &index.columns {
                    inline.col(Alias::new(column.as_str()));
                }
                create.index(&mut inline);
            }
        }
        self.tolerate_existing(table, sql::exec_schema(&self.conn, &create).await)?;

        if self.backend != DatabaseBackend::MySql {
            for index in &definition.indexes {
                let mut stmt = Index::create();
                stmt.if_not_exists()
                    .name(index.name.as_str())
                    .table(Alias::new(table));
                for column in &index.columns {
                    stmt.col(Alias::new(column.as_str()));
                }
                if index.unique {
                    stmt.unique();
                }
                self.tolerate_existing(table, sql::exec_schema(&self.conn, &stmt).await)?;
            }
        }
        log::info!(
            "created shard {table} ({} columns) for {}",
            definition.columns.len(),
            definition.entity_key
        );
        Ok(())
    }

    pub(crate) async fn add_column(&self, table: &TableName, column: &ColumnSpec) -> StrataResult<bool> {
        let existing = sql::describe_columns(&self.conn, TableFilter::Exact(table.as_str())).await?;
        if existing.is_empty() {
            return Err(StrataError::not_found(format!("shard {table}")));
        }
        if existing.iter().any(|found| found.name == column.name) {
            return Ok(false);
        }
        let mut alter = Table::alter();
        alter
            .table(Alias::new(table.as_str()))
            .add_column(&mut column_def(self.backend, column));
        self.tolerate_existing(table.as_str(), sql::exec_schema(&self.conn, &alter).await)?;
        log::info!("added column {} ({:?}) to {table}", column.name, column.kind);
        Ok(true)
    }

    /// Shards of `family`, sorted by name, never including the family view or shards of
    /// a more specific family sharing the prefix.
    pub(crate) async fn family_shards<C: ConnectionTrait>(
        &self,
        conn: &C,
        family: DatasetFamily,
    ) -> StrataResult<Vec<TableName>> {
        let prefix = self.registry.prefix().as_str();
        let tables = sql::list_tables(conn, TableFilter::Prefix(&family.shard_prefix(prefix))).await?;
        Ok(tables
            .into_iter()
            .filter(|name| family.owns_table(prefix, name))
            .map(TableName::from_catalog)
            .collect())
    }

    fn tolerate_existing(&self, table: &str, result: StrataResult<()>) -> StrataResult<()> {
        match result {
            Err(err) if sql::is_already_exists(&err.to_string()) => {
                log::debug!("{table}: concurrent ddl already applied ({err})");
                Ok(())
            }
            Err(err) => Err(StrataError::shard_ddl(table, err.to_string())),
            Ok(()) => Ok(()),
        }
    }
}

#[async_trait]
impl ShardCatalogApi for StrataStore {
    async fn ensure_shard_exists(&self, definition: &ShardDefinition) -> bool {
        match self.create_shard(definition).await {
            Ok(()) => true,
            Err(err) => {
                log::warn!("ensure shard {} failed: {err}", definition.table_name);
                false
            }
        }
    }

    async fn ensure_column_exists(&self, table: &TableName, column: &ColumnSpec) -> bool {
        if let Err(err) = strata_core::validate_column_name(&column.name) {
            log::warn!("refusing column on {table}: {err}");
            return false;
        }
        match self.add_column(table, column).await {
            Ok(_) => true,
            Err(err) => {
                log::warn!("ensure column {}.{} failed: {err}", table, column.name);
                false
            }
        }
    }

    async fn list_family_shards(&self, family: DatasetFamily) -> StrataResult<Vec<TableName>> {
        self.family_shards(&self.conn, family).await
    }
}
