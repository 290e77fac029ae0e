use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection};
use sea_orm_migration::MigratorTrait;

use crate::config::WriterSettings;
use crate::migration::Migrator;
use crate::view::{
    ClientUnionStrategy, ServerRoutineStrategy, ViewBuildStrategy, ViewMaterializer, ViewStats,
};
use crate::{DatabaseConfig, StrataConfig};
use strata_core::{
    DatasetFamily, LifecyclePhase, SchemaRegistry, StrataError, StrataResult, TablePrefix,
};

/// Sharded time-series store over one relational connection pool.
///
/// Cloning is cheap; clones share the pool, the schema registry, the view
/// materializer and the lifecycle phase.
#[derive(Clone)]
pub struct StrataStore {
    pub(crate) conn: DatabaseConnection,
    pub(crate) backend: DatabaseBackend,
    pub(crate) registry: Arc<SchemaRegistry>,
    pub(crate) views: Arc<ViewMaterializer>,
    pub(crate) writer: WriterSettings,
    failpoints: Arc<HashSet<String>>,
    phase: Arc<Mutex<LifecyclePhase>>,
}

impl StrataStore {
    pub async fn connect(config: &StrataConfig, base_dir: &Path) -> StrataResult<Self> {
        let url = build_connection_url(config, base_dir)?;
        let mut options = ConnectOptions::new(url);
        let mut sql_logging = false;
        if let Some(pool) = &config.pool {
            if let Some(max) = pool.max_connections {
                options.max_connections(max);
            }
            if let Some(min) = pool.min_connections {
                options.min_connections(min);
            }
            if let Some(timeout_ms) = pool.connect_timeout_ms {
                options.connect_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.acquire_timeout_ms {
                options.acquire_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.idle_timeout_ms {
                options.idle_timeout(Duration::from_millis(timeout_ms));
            }
            sql_logging = pool.sql_logging.unwrap_or(false);
        }
        options.sqlx_logging(sql_logging);
        let conn = Database::connect(options).await.map_err(StrataError::from)?;
        let backend = conn.get_database_backend();
        let registry = Arc::new(SchemaRegistry::new(config.table_prefix()?));

        let mut writer = WriterSettings::from_config(config);
        if backend == DatabaseBackend::Sqlite && writer.workers > 1 {
            log::debug!(
                "sqlite serializes writers; clamping upsert workers from {} to 1",
                writer.workers
            );
            writer.workers = 1;
        }

        let failpoints = config
            .failpoints
            .clone()
            .unwrap_or_default()
            .into_iter()
            .collect::<HashSet<_>>();

        let prefer_server = config
            .views
            .as_ref()
            .and_then(|views| views.prefer_server_routine)
            .unwrap_or(true);
        let mut strategies: Vec<Arc<dyn ViewBuildStrategy>> = Vec::with_capacity(2);
        if prefer_server {
            strategies.push(Arc::new(ServerRoutineStrategy::new(
                failpoints.contains("view_routine"),
            )));
        }
        strategies.push(Arc::new(ClientUnionStrategy::new(
            failpoints.contains("view_client"),
        )));
        let views = Arc::new(ViewMaterializer::new(
            conn.clone(),
            registry.prefix().clone(),
            strategies,
        ));

        Migrator::up(&conn, None).await.map_err(StrataError::from)?;
        log::info!(
            "strata store ready (backend={}, prefix={}, workers={})",
            config.backend_name(),
            registry.prefix(),
            writer.workers
        );
        Ok(Self {
            conn,
            backend,
            registry,
            views,
            writer,
            failpoints: Arc::new(failpoints),
            phase: Arc::new(Mutex::new(LifecyclePhase::Idle)),
        })
    }

    pub async fn connect_sqlite(path: &Path) -> StrataResult<Self> {
        let config = StrataConfig::default_sqlite(path.to_string_lossy());
        Self::connect(&config, path.parent().unwrap_or_else(|| Path::new("."))).await
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.backend
    }

    pub fn table_prefix(&self) -> &TablePrefix {
        self.registry.prefix()
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn view_stats(&self, family: DatasetFamily) -> ViewStats {
        self.views.stats(family)
    }

    /// Width of the `upsert_batch` worker pool after backend clamping.
    pub fn writer_workers(&self) -> usize {
        self.writer.workers
    }

    pub(crate) fn maybe_failpoint(&self, key: &str) -> StrataResult<()> {
        if self.failpoints.contains(key) {
            Err(StrataError::storage(format!("failpoint {key}")))
        } else {
            Ok(())
        }
    }

    pub(crate) fn set_phase(&self, phase: LifecyclePhase) {
        *self.lock_phase() = phase;
    }

    pub(crate) fn current_phase(&self) -> LifecyclePhase {
        *self.lock_phase()
    }

    fn lock_phase(&self) -> MutexGuard<'_, LifecyclePhase> {
        self.phase
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn build_connection_url(config: &StrataConfig, base_dir: &Path) -> StrataResult<String> {
    match &config.database {
        DatabaseConfig::Sqlite { .. } => {
            let path = config.sqlite_path(base_dir)?;
            Ok(format!("sqlite://{}?mode=rwc", path.display()))
        }
        DatabaseConfig::Postgres { url } => Ok(url.clone()),
        DatabaseConfig::Mysql { url } => Ok(url.clone()),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::build_connection_url;
    use crate::StrataConfig;

    #[test]
    fn sqlite_url_is_created_on_demand() {
        let config = StrataConfig::default_sqlite("data/strata.sqlite");
        let url = build_connection_url(&config, Path::new("/var/lib/app")).expect("url");
        assert_eq!(url, "sqlite:///var/lib/app/data/strata.sqlite?mode=rwc");
    }
}
