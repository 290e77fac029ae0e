use sea_orm::DeriveIden;

/// Canonical entity registry that partition provisioning diffs against.
#[derive(DeriveIden, Clone, Copy)]
pub enum StrataEntityRegistry {
    Table,
    EntityKey,
    DisplayName,
    ListedOn,
    IsActive,
    RegisteredAt,
    UpdatedAt,
}

/// Stored routine installed on MySQL that rebuilds a family view in-engine.
pub const VIEW_ROUTINE_NAME: &str = "strata_rebuild_union_view";
