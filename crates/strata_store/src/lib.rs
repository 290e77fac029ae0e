mod catalog;
mod columns;
pub mod config;
pub mod datastore;
mod db;
mod lifecycle;
pub mod migration;
mod registry;
mod sql;
pub mod store;
mod upsert;
pub mod view;

pub mod api {
    pub use strata_core::api::*;
}

pub mod schema {
    pub use strata_core::schema::*;
}

pub use config::{
    DatabaseConfig, NamingConfig, PoolConfig, StrataConfig, ViewConfig, WriterConfig,
};
pub use datastore::{default_sqlite_path, load_or_init_config, open_and_provision, open_store};
pub use store::StrataStore;
pub use strata_core::*;
pub use view::{
    ClientUnionStrategy, ServerRoutineStrategy, ViewBuildOutcome, ViewBuildStrategy,
    ViewMaterializer, ViewStats, ViewTarget,
};
