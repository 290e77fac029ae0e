use async_trait::async_trait;
use chrono::Utc;
use sea_orm::TransactionTrait;
use sea_orm::sea_query::{Expr, OnConflict, Order, Query};

use crate::StrataStore;
use crate::db::StrataEntityRegistry;
use crate::sql::{self, col_name};
use strata_core::{EntityKey, EntityRegistration, EntityRegistryApi, StrataError, StrataResult};

#[async_trait]
impl EntityRegistryApi for StrataStore {
    /// Insert or refresh entries; re-registering a deactivated entity reactivates it.
    async fn register_entities(&self, entries: Vec<EntityRegistration>) -> StrataResult<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let now = Utc::now().naive_utc();
        let txn = self.conn.begin().await?;
        for entry in &entries {
            let mut insert = Query::insert();
            insert
                .into_table(StrataEntityRegistry::Table)
                .columns([
                    StrataEntityRegistry::EntityKey,
                    StrataEntityRegistry::DisplayName,
                    StrataEntityRegistry::ListedOn,
                    StrataEntityRegistry::IsActive,
                    StrataEntityRegistry::RegisteredAt,
                    StrataEntityRegistry::UpdatedAt,
                ])
                .values([
                    entry.entity_key.as_str().into(),
                    entry.display_name.clone().into(),
                    entry.listed_on.into(),
                    true.into(),
                    now.into(),
                    now.into(),
                ])
                .map_err(|err| StrataError::storage(err.to_string()))?
                .on_conflict(
                    OnConflict::column(StrataEntityRegistry::EntityKey)
                        .update_columns([
                            StrataEntityRegistry::DisplayName,
                            StrataEntityRegistry::ListedOn,
                            StrataEntityRegistry::IsActive,
                            StrataEntityRegistry::UpdatedAt,
                        ])
                        .to_owned(),
                );
            sql::exec(&txn, &insert).await?;
        }
        txn.commit().await?;
        log::debug!("registered {} entities", entries.len());
        Ok(entries.len())
    }

    async fn deactivate_entity(&self, entity: &EntityKey) -> StrataResult<bool> {
        let update = Query::update()
            .table(StrataEntityRegistry::Table)
            .values([
                (StrataEntityRegistry::IsActive, false.into()),
                (StrataEntityRegistry::UpdatedAt, Utc::now().naive_utc().into()),
            ])
            .and_where(Expr::col(StrataEntityRegistry::EntityKey).eq(entity.as_str()))
            .and_where(Expr::col(StrataEntityRegistry::IsActive).eq(true))
            .to_owned();
        Ok(sql::exec(&self.conn, &update).await? > 0)
    }

    async fn list_active_entities(&self) -> StrataResult<Vec<EntityKey>> {
        let select = Query::select()
            .from(StrataEntityRegistry::Table)
            .column(StrataEntityRegistry::EntityKey)
            .and_where(Expr::col(StrataEntityRegistry::IsActive).eq(true))
            .order_by(StrataEntityRegistry::EntityKey, Order::Asc)
            .to_owned();
        let rows = sql::query_all(&self.conn, &select).await?;
        let column = col_name(StrataEntityRegistry::EntityKey);
        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.try_get("", &column)?;
            match EntityKey::parse(&raw) {
                Ok(key) => entities.push(key),
                Err(err) => log::warn!("skipping registry entry {raw:?}: {err}"),
            }
        }
        Ok(entities)
    }
}
