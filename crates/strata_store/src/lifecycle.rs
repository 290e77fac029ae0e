//! Partition lifecycle: find registered entities without shards and provision every
//! family's shard for them, rebuilding each family view once per batch.
//!
//! Phases run Idle → Detecting → Provisioning → ViewRebuilding → Idle. A partial
//! provisioning failure moves forward to view rebuilding; failed entities are reported
//! for the external scheduler and never retried here.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use async_trait::async_trait;

use crate::StrataStore;
use strata_core::{
    DatasetFamily, EntityFailure, EntityKey, EntityRegistryApi, FamilyViewReport, JobControl,
    LifecyclePhase, PartitionLifecycleApi, ProgressThrottle, ProvisionResult, ShardCatalogApi,
    StrataResult, UnifiedViewApi,
};

/// Resets the phase to Idle however the operation exits.
struct PhaseGuard<'a> {
    store: &'a StrataStore,
}

impl<'a> PhaseGuard<'a> {
    fn enter(store: &'a StrataStore, phase: LifecyclePhase) -> Self {
        store.set_phase(phase);
        Self { store }
    }

    fn advance(&self, phase: LifecyclePhase) {
        self.store.set_phase(phase);
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.store.set_phase(LifecyclePhase::Idle);
    }
}

#[async_trait]
impl PartitionLifecycleApi for StrataStore {
    async fn detect_new_entities(&self) -> StrataResult<Vec<EntityKey>> {
        let _phase = PhaseGuard::enter(self, LifecyclePhase::Detecting);
        let registered = self.list_active_entities().await?;
        let namer = self.registry.namer();
        let existing: HashSet<String> = self
            .list_family_shards(DatasetFamily::REFERENCE)
            .await?
            .into_iter()
            .map(|table| table.as_str().to_string())
            .collect();
        let mut fresh = Vec::new();
        for entity in registered {
            match namer.shard_name(DatasetFamily::REFERENCE, &entity) {
                Ok(table) if existing.contains(table.as_str()) => {}
                Ok(_) => fresh.push(entity),
                Err(err) => log::warn!("registered entity {entity} has no valid shard name: {err}"),
            }
        }
        log::info!(
            "detected {} new entities ({} shards present in {})",
            fresh.len(),
            existing.len(),
            DatasetFamily::REFERENCE
        );
        Ok(fresh)
    }

    async fn provision_entities(
        &self,
        entities: Vec<EntityKey>,
        job: &dyn JobControl,
    ) -> StrataResult<ProvisionResult> {
        let phase = PhaseGuard::enter(self, LifecyclePhase::Provisioning);
        let mut seen = BTreeSet::new();
        let entities: Vec<EntityKey> = entities
            .into_iter()
            .filter(|entity| seen.insert(entity.clone()))
            .collect();
        let total = entities.len();
        let mut result = ProvisionResult {
            attempted: total,
            provisioned: Vec::new(),
            failed: Vec::new(),
            views: Vec::new(),
        };
        let throttle = ProgressThrottle::new(
            job,
            self.writer.progress_every,
            Duration::from_millis(self.writer.progress_interval_ms),
        );

        for (index, entity) in entities.into_iter().enumerate() {
            throttle.checkpoint().await?;
            let mut failures = Vec::new();
            for family in DatasetFamily::ALL {
                let definition = match self.registry.get_or_create_shard_definition(family, &entity) {
                    Ok(definition) => definition,
                    Err(err) => {
                        failures.push(format!("{family}: {err}"));
                        continue;
                    }
                };
                if !self.ensure_shard_exists(&definition).await {
                    failures.push(format!("{family}: could not create {}", definition.table_name));
                }
            }
            if failures.is_empty() {
                result.provisioned.push(entity.clone());
            } else {
                result.failed.push(EntityFailure {
                    entity_key: entity.clone(),
                    message: failures.join("; "),
                });
            }
            throttle.report(index + 1, total, entity.as_str(), "provision");
        }

        phase.advance(LifecyclePhase::ViewRebuilding);
        if total > 0 {
            for family in DatasetFamily::ALL {
                let rebuilt = self.rebuild_view(family).await;
                result.views.push(FamilyViewReport { family, rebuilt });
            }
        }
        log::info!(
            "provisioned {} of {total} entities ({} failed)",
            result.provisioned.len(),
            result.failed.len()
        );
        Ok(result)
    }

    fn lifecycle_phase(&self) -> LifecyclePhase {
        self.current_phase()
    }
}
