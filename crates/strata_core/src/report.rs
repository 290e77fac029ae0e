use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{DatasetFamily, EntityKey};

/// Per-entity failure carried in batch results instead of being raised.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFailure {
    pub entity_key: EntityKey,
    pub message: String,
}

/// Result of writing one entity's rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub entity_key: EntityKey,
    pub count: usize,
    pub error: Option<String>,
}

impl UpsertOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewRebuildStatus {
    /// Caller asked for the rebuild to be deferred to the end of a larger batch.
    Deferred,
    /// Nothing was written, so the view was left alone.
    NotNeeded,
    Rebuilt,
    /// Both strategies failed or no shard existed; the previous view is untouched.
    Stale,
}

/// Outcome of one `upsert_batch` call; owned by the caller, never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub run_id: Uuid,
    pub family: DatasetFamily,
    pub attempted: usize,
    pub succeeded: usize,
    pub rows_written: usize,
    pub failed: Vec<EntityFailure>,
    /// Failures beyond the retained detail limit; counted but not described.
    pub failed_overflow: usize,
    pub defer_view_rebuild: bool,
    pub view_rebuild: ViewRebuildStatus,
}

impl BatchResult {
    pub fn new(family: DatasetFamily, attempted: usize, defer_view_rebuild: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            family,
            attempted,
            succeeded: 0,
            rows_written: 0,
            failed: Vec::new(),
            failed_overflow: 0,
            defer_view_rebuild,
            view_rebuild: if defer_view_rebuild {
                ViewRebuildStatus::Deferred
            } else {
                ViewRebuildStatus::NotNeeded
            },
        }
    }

    pub fn record(&mut self, outcome: UpsertOutcome, max_failure_details: usize) {
        match outcome.error {
            None => {
                self.succeeded += 1;
                self.rows_written += outcome.count;
            }
            Some(message) => {
                if self.failed.len() < max_failure_details {
                    self.failed.push(EntityFailure {
                        entity_key: outcome.entity_key,
                        message,
                    });
                } else {
                    self.failed_overflow += 1;
                }
            }
        }
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len() + self.failed_overflow
    }

    /// A batch is only a hard failure when it had work and nothing succeeded.
    pub fn is_hard_failure(&self) -> bool {
        self.attempted > 0 && self.succeeded == 0
    }

    pub fn failed_entities(&self) -> Vec<&EntityKey> {
        self.failed.iter().map(|failure| &failure.entity_key).collect()
    }
}

/// Per-family view rebuild report from provisioning or reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyViewReport {
    pub family: DatasetFamily,
    pub rebuilt: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProvisionResult {
    pub attempted: usize,
    pub provisioned: Vec<EntityKey>,
    pub failed: Vec<EntityFailure>,
    pub views: Vec<FamilyViewReport>,
}

impl ProvisionResult {
    pub fn is_hard_failure(&self) -> bool {
        self.attempted > 0 && self.provisioned.is_empty()
    }
}

/// Columns added to one shard by the synchronizer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnAddition {
    pub table: String,
    pub column: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSyncReport {
    pub shards_scanned: usize,
    pub union_columns: Vec<String>,
    pub added: Vec<ColumnAddition>,
    pub failed: Vec<ColumnAddition>,
    pub view_rebuilt: bool,
}

impl ColumnSyncReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.failed.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Idle,
    Detecting,
    Provisioning,
    ViewRebuilding,
}
