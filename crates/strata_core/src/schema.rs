use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::columns::{
    DAILY_BAR_COLUMNS, DAILY_INDICATOR_COLUMNS, PRO_FACTOR_ADJUSTED_BASES, PRO_FACTOR_ADJUSTMENTS,
    PRO_FACTOR_PLAIN_COLUMNS, TECHNICAL_FACTOR_COLUMNS,
};
use crate::{DatasetFamily, EntityKey, ShardNamer, StrataError, StrataResult, TableName, TablePrefix};

pub const ENTITY_KEY_COLUMN: &str = "entity_key";
pub const DATE_COLUMN: &str = "observation_date";
pub const UPDATED_AT_COLUMN: &str = "updated_at";
pub const UPDATED_BY_COLUMN: &str = "updated_by";

pub const KEY_COLUMNS: [&str; 2] = [ENTITY_KEY_COLUMN, DATE_COLUMN];
pub const AUDIT_COLUMNS: [&str; 2] = [UPDATED_AT_COLUMN, UPDATED_BY_COLUMN];

/// Comment applied to open-family columns nobody ever described.
pub const GENERIC_COLUMN_COMMENT: &str = "custom factor";

const MAX_COLUMN_NAME_LEN: usize = 64;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// `varchar(20)` entity key.
    Key,
    Date,
    Double,
    BigInt,
    Text,
    Boolean,
    Timestamp,
    /// `varchar(64)` writer stamp.
    Audit,
}

impl ColumnKind {
    /// Map a type string reported by engine metadata back to a column kind.
    pub fn from_sql_type(raw: &str) -> Option<Self> {
        let ty = raw.trim().to_ascii_lowercase();
        if ty.is_empty() {
            return None;
        }
        if ty.starts_with("tinyint(1)") || ty.starts_with("bool") {
            return Some(ColumnKind::Boolean);
        }
        if ty.starts_with("datetime") || ty.starts_with("timestamp") {
            return Some(ColumnKind::Timestamp);
        }
        if ty == "date" || ty == "date_text" {
            return Some(ColumnKind::Date);
        }
        if ty.starts_with("double")
            || ty.starts_with("float")
            || ty.starts_with("real")
            || ty.starts_with("decimal")
            || ty.starts_with("numeric")
        {
            return Some(ColumnKind::Double);
        }
        if ty.contains("int") {
            return Some(ColumnKind::BigInt);
        }
        if ty.contains("char") || ty.contains("text") || ty.contains("clob") {
            return Some(ColumnKind::Text);
        }
        None
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnKind::Double | ColumnKind::BigInt)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    pub comment: Option<String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, kind: ColumnKind, comment: Option<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            comment,
        }
    }

    pub fn double(name: &str, comment: &str) -> Self {
        Self::new(name, ColumnKind::Double, Some(comment.to_string()))
    }

    pub fn is_key(&self) -> bool {
        KEY_COLUMNS.contains(&self.name.as_str())
    }

    pub fn is_audit(&self) -> bool {
        AUDIT_COLUMNS.contains(&self.name.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Everything needed to create one shard table.
#[derive(Clone, Debug)]
pub struct ShardDefinition {
    pub family: DatasetFamily,
    pub entity_key: EntityKey,
    pub table_name: TableName,
    pub columns: Arc<[ColumnSpec]>,
    pub indexes: Vec<IndexSpec>,
}

impl ShardDefinition {
    pub fn primary_key(&self) -> [&'static str; 2] {
        KEY_COLUMNS
    }

    /// Family columns, excluding the key and audit columns.
    pub fn value_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns
            .iter()
            .filter(|column| !column.is_key() && !column.is_audit())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|column| column.name == name)
    }
}

/// True for the columns every shard carries regardless of family.
pub fn is_base_column(name: &str) -> bool {
    KEY_COLUMNS.contains(&name) || AUDIT_COLUMNS.contains(&name)
}

/// Field names become column identifiers, so they pass the same kind of gate as keys.
pub fn validate_column_name(name: &str) -> StrataResult<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|ch| ch.is_ascii_lowercase() || ch == '_')
        && name.len() <= MAX_COLUMN_NAME_LEN
        && chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_');
    if !valid {
        return Err(StrataError::invalid_identifier(format!(
            "column name must match [a-z_][a-z0-9_]{{0,{}}}: {name:?}",
            MAX_COLUMN_NAME_LEN - 1
        )));
    }
    if is_base_column(name) {
        return Err(StrataError::invalid_identifier(format!(
            "column name {name:?} is reserved"
        )));
    }
    Ok(())
}

fn base_head() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new(
            ENTITY_KEY_COLUMN,
            ColumnKind::Key,
            Some("entity key".to_string()),
        ),
        ColumnSpec::new(
            DATE_COLUMN,
            ColumnKind::Date,
            Some("observation date".to_string()),
        ),
    ]
}

fn base_tail() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new(
            UPDATED_AT_COLUMN,
            ColumnKind::Timestamp,
            Some("last write time".to_string()),
        ),
        ColumnSpec::new(
            UPDATED_BY_COLUMN,
            ColumnKind::Audit,
            Some("last writer".to_string()),
        ),
    ]
}

fn canonical_columns(family: DatasetFamily) -> Vec<ColumnSpec> {
    let mut columns = base_head();
    match family {
        DatasetFamily::DailyBars => extend_doubles(&mut columns, DAILY_BAR_COLUMNS),
        DatasetFamily::DailyIndicators => extend_doubles(&mut columns, DAILY_INDICATOR_COLUMNS),
        DatasetFamily::TechnicalFactors => extend_doubles(&mut columns, TECHNICAL_FACTOR_COLUMNS),
        DatasetFamily::ProFactors => {
            for (base, base_comment) in PRO_FACTOR_ADJUSTED_BASES {
                for (adj, adj_comment) in PRO_FACTOR_ADJUSTMENTS {
                    columns.push(ColumnSpec::new(
                        format!("{base}_{adj}"),
                        ColumnKind::Double,
                        Some(format!("{base_comment} ({adj_comment})")),
                    ));
                }
            }
            extend_doubles(&mut columns, PRO_FACTOR_PLAIN_COLUMNS);
        }
        DatasetFamily::CustomFactors => {}
    }
    columns.extend(base_tail());
    columns
}

fn extend_doubles(columns: &mut Vec<ColumnSpec>, catalog: &[(&str, &str)]) {
    columns.extend(
        catalog
            .iter()
            .map(|(name, comment)| ColumnSpec::double(name, comment)),
    );
}

/// Declares each family's column set and memoizes per-entity shard definitions.
///
/// The memo lives as long as the registry; the entity universe is bounded in the low
/// thousands, so entries are never evicted.
#[derive(Debug)]
pub struct SchemaRegistry {
    namer: ShardNamer,
    families: HashMap<DatasetFamily, Arc<[ColumnSpec]>>,
    definitions: Mutex<HashMap<(DatasetFamily, EntityKey), Arc<ShardDefinition>>>,
}

impl SchemaRegistry {
    pub fn new(prefix: TablePrefix) -> Self {
        let families = DatasetFamily::ALL
            .into_iter()
            .map(|family| (family, Arc::from(canonical_columns(family))))
            .collect();
        Self {
            namer: ShardNamer::new(prefix),
            families,
            definitions: Mutex::new(HashMap::new()),
        }
    }

    pub fn namer(&self) -> &ShardNamer {
        &self.namer
    }

    pub fn prefix(&self) -> &TablePrefix {
        self.namer.prefix()
    }

    /// Canonical columns including key and audit columns, in table order.
    pub fn family_columns(&self, family: DatasetFamily) -> Arc<[ColumnSpec]> {
        self.families
            .get(&family)
            .cloned()
            .unwrap_or_else(|| Arc::from(canonical_columns(family)))
    }

    pub fn get_or_create_shard_definition(
        &self,
        family: DatasetFamily,
        entity: &EntityKey,
    ) -> StrataResult<Arc<ShardDefinition>> {
        let key = (family, entity.clone());
        if let Some(found) = self.lock_definitions().get(&key) {
            return Ok(found.clone());
        }
        let table_name = self.namer.shard_name(family, entity)?;
        let definition = Arc::new(ShardDefinition {
            family,
            entity_key: entity.clone(),
            indexes: vec![IndexSpec {
                name: format!("idx_{table_name}_date"),
                columns: vec![DATE_COLUMN.to_string()],
                unique: false,
            }],
            table_name,
            columns: self.family_columns(family),
        });
        let mut guard = self.lock_definitions();
        Ok(guard.entry(key).or_insert(definition).clone())
    }

    pub fn cached_definitions(&self) -> usize {
        self.lock_definitions().len()
    }

    fn lock_definitions(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<(DatasetFamily, EntityKey), Arc<ShardDefinition>>> {
        self.definitions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
