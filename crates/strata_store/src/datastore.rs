//! Entry points for hosts that keep the store under one base directory.

use std::path::{Path, PathBuf};

use crate::{StrataConfig, StrataResult, StrataStore};
use strata_core::{JobControl, PartitionLifecycleApi, ProvisionResult};

const DEFAULT_DB_NAME: &str = "strata.sqlite";

pub fn default_sqlite_path(base: &Path) -> PathBuf {
    base.join(DEFAULT_DB_NAME)
}

/// Read `strata.json` under `base`, writing a SQLite default on first use.
pub fn load_or_init_config(base: &Path) -> StrataResult<StrataConfig> {
    StrataConfig::load_or_init(base, &default_sqlite_path(base))
}

pub async fn open_store(base: &Path) -> StrataResult<StrataStore> {
    let config = load_or_init_config(base)?;
    StrataStore::connect(&config, base).await
}

/// Open the store and provision every registered entity that has no shards yet.
/// The result is `None` when the registry held nothing new.
pub async fn open_and_provision(
    base: &Path,
    job: &dyn JobControl,
) -> StrataResult<(StrataStore, Option<ProvisionResult>)> {
    let store = open_store(base).await?;
    let fresh = store.detect_new_entities().await?;
    if fresh.is_empty() {
        log::debug!("no unprovisioned entities under {}", base.display());
        return Ok((store, None));
    }
    let result = store.provision_entities(fresh, job).await?;
    Ok((store, Some(result)))
}

#[cfg(test)]
mod tests {
    use super::{default_sqlite_path, load_or_init_config, open_and_provision, open_store};
    use strata_core::{
        DatasetFamily, EntityKey, EntityRegistration, EntityRegistryApi, NoopJobControl,
        ShardCatalogApi,
    };
    use tempfile::tempdir;

    #[tokio::test]
    async fn first_open_writes_a_sqlite_config() {
        let dir = tempdir().expect("tempdir");
        let base = dir.path();
        let config = load_or_init_config(base).expect("config");
        assert_eq!(config.backend_name(), "sqlite");
        assert!(base.join("strata.json").exists());
        let store = open_store(base).await.expect("open store");
        assert!(default_sqlite_path(base).exists());
        assert_eq!(store.table_prefix().as_str(), "ts");
    }

    #[tokio::test]
    async fn reopening_provisions_newly_registered_entities() {
        let dir = tempdir().expect("tempdir");
        let base = dir.path();
        let (store, nothing) = open_and_provision(base, &NoopJobControl)
            .await
            .expect("open");
        assert!(nothing.is_none());
        store
            .register_entities(vec![EntityRegistration::new(
                EntityKey::parse("000001.SZ").expect("key"),
            )])
            .await
            .expect("register");
        drop(store);

        let (store, provisioned) = open_and_provision(base, &NoopJobControl)
            .await
            .expect("reopen");
        let provisioned = provisioned.expect("provisioned");
        assert_eq!(provisioned.provisioned.len(), 1);
        assert_eq!(
            store
                .list_family_shards(DatasetFamily::CustomFactors)
                .await
                .expect("shards")
                .len(),
            1
        );
    }
}
