use sea_orm_migration::prelude::*;

use crate::db::StrataEntityRegistry;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(StrataEntityRegistry::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StrataEntityRegistry::EntityKey)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(ColumnDef::new(StrataEntityRegistry::DisplayName).string_len(128))
                    .col(ColumnDef::new(StrataEntityRegistry::ListedOn).date())
                    .col(
                        ColumnDef::new(StrataEntityRegistry::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(StrataEntityRegistry::RegisteredAt)
                            .date_time()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StrataEntityRegistry::UpdatedAt)
                            .date_time()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_strata_entity_registry")
                            .col(StrataEntityRegistry::EntityKey),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_strata_entity_registry_active")
                    .table(StrataEntityRegistry::Table)
                    .col(StrataEntityRegistry::IsActive)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(StrataEntityRegistry::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;
        Ok(())
    }
}
