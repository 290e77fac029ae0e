use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use strata_core::{StrataError, StrataResult, TablePrefix};

const DEFAULT_CONFIG_NAME: &str = "strata.json";
const DEFAULT_TABLE_PREFIX: &str = "ts";
const DEFAULT_WORKERS: usize = 4;
const MAX_WORKERS: usize = 64;
const DEFAULT_ROWS_PER_STATEMENT: usize = 500;
const DEFAULT_MAX_FAILURE_DETAILS: usize = 200;
const DEFAULT_UPDATED_BY: &str = "strata";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Sqlite { path: Option<String> },
    Postgres { url: String },
    Mysql { url: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
    pub sql_logging: Option<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamingConfig {
    pub table_prefix: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Entity groups written concurrently by `upsert_batch`.
    pub workers: Option<usize>,
    pub max_rows_per_statement: Option<usize>,
    pub max_failure_details: Option<usize>,
    pub updated_by: Option<String>,
    pub progress_every: Option<usize>,
    pub progress_interval_ms: Option<u64>,
}

impl WriterConfig {
    pub fn with_defaults() -> Self {
        Self {
            workers: Some(DEFAULT_WORKERS),
            max_rows_per_statement: Some(DEFAULT_ROWS_PER_STATEMENT),
            max_failure_details: Some(DEFAULT_MAX_FAILURE_DETAILS),
            updated_by: Some(DEFAULT_UPDATED_BY.to_string()),
            progress_every: Some(50),
            progress_interval_ms: Some(5_000),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ViewConfig {
    /// Try the stored routine before the client-side builder.
    pub prefer_server_routine: Option<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrataConfig {
    pub database: DatabaseConfig,
    pub pool: Option<PoolConfig>,
    pub naming: Option<NamingConfig>,
    pub writer: Option<WriterConfig>,
    pub views: Option<ViewConfig>,
    pub failpoints: Option<Vec<String>>,
}

impl StrataConfig {
    pub fn default_sqlite(path: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig::Sqlite {
                path: Some(path.into()),
            },
            pool: None,
            naming: Some(NamingConfig {
                table_prefix: Some(DEFAULT_TABLE_PREFIX.to_string()),
            }),
            writer: Some(WriterConfig::with_defaults()),
            views: Some(ViewConfig {
                prefer_server_routine: Some(true),
            }),
            failpoints: None,
        }
    }

    pub fn load_or_init(base_dir: &Path, default_sqlite_path: &Path) -> StrataResult<Self> {
        fs::create_dir_all(base_dir)
            .map_err(|err| StrataError::storage(format!("create config dir: {err}")))?;
        let config_path = base_dir.join(DEFAULT_CONFIG_NAME);
        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .map_err(|err| StrataError::storage(format!("read config: {err}")))?;
            let config: StrataConfig = serde_json::from_str(&raw)
                .map_err(|err| StrataError::validation(err.to_string()))?;
            return Ok(config);
        }
        let default = StrataConfig::default_sqlite(default_sqlite_path.to_string_lossy());
        let payload = serde_json::to_string_pretty(&default)
            .map_err(|err| StrataError::storage(format!("serialize config: {err}")))?;
        fs::write(&config_path, payload)
            .map_err(|err| StrataError::storage(format!("write config: {err}")))?;
        Ok(default)
    }

    pub fn sqlite_path(&self, base_dir: &Path) -> StrataResult<PathBuf> {
        match &self.database {
            DatabaseConfig::Sqlite { path } => {
                let path = path.clone().unwrap_or_else(|| "strata.sqlite".to_string());
                let candidate = PathBuf::from(path);
                if candidate.is_absolute() {
                    Ok(candidate)
                } else {
                    Ok(base_dir.join(candidate))
                }
            }
            _ => Err(StrataError::validation("config is not sqlite backend")),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.database {
            DatabaseConfig::Sqlite { .. } => "sqlite",
            DatabaseConfig::Postgres { .. } => "postgres",
            DatabaseConfig::Mysql { .. } => "mysql",
        }
    }

    pub fn connection_url(&self) -> Option<&str> {
        match &self.database {
            DatabaseConfig::Sqlite { .. } => None,
            DatabaseConfig::Postgres { url } | DatabaseConfig::Mysql { url } => Some(url.as_str()),
        }
    }

    pub fn table_prefix(&self) -> StrataResult<TablePrefix> {
        let raw = self
            .naming
            .as_ref()
            .and_then(|naming| naming.table_prefix.as_deref())
            .unwrap_or(DEFAULT_TABLE_PREFIX);
        TablePrefix::parse(raw)
    }
}

/// Writer settings resolved against defaults.
#[derive(Clone, Debug)]
pub(crate) struct WriterSettings {
    pub workers: usize,
    pub max_rows_per_statement: usize,
    pub max_failure_details: usize,
    pub updated_by: String,
    pub progress_every: usize,
    pub progress_interval_ms: u64,
}

impl WriterSettings {
    pub fn from_config(config: &StrataConfig) -> Self {
        let defaults = WriterConfig::with_defaults();
        let writer = config.writer.clone().unwrap_or(defaults);
        Self {
            workers: writer
                .workers
                .unwrap_or(DEFAULT_WORKERS)
                .clamp(1, MAX_WORKERS),
            max_rows_per_statement: writer
                .max_rows_per_statement
                .unwrap_or(DEFAULT_ROWS_PER_STATEMENT)
                .max(1),
            max_failure_details: writer
                .max_failure_details
                .unwrap_or(DEFAULT_MAX_FAILURE_DETAILS),
            updated_by: writer
                .updated_by
                .unwrap_or_else(|| DEFAULT_UPDATED_BY.to_string())
                .chars()
                .take(64)
                .collect(),
            progress_every: writer.progress_every.unwrap_or(50).max(1),
            progress_interval_ms: writer.progress_interval_ms.unwrap_or(5_000),
        }
    }
}
