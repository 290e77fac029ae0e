use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;

use crate::StrataStore;
use crate::sql::{self, CatalogColumn, TableFilter};
use strata_core::{
    ColumnAddition, ColumnKind, ColumnSpec, ColumnSyncApi, ColumnSyncReport, DatasetFamily,
    GENERIC_COLUMN_COMMENT, ShardCatalogApi, StrataError, StrataResult, TableName,
    UnifiedViewApi, is_base_column,
};

/// Best description of one unioned column across every shard that has it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ObservedColumn {
    pub kind: Option<ColumnKind>,
    pub comment: Option<String>,
}

impl ObservedColumn {
    fn to_spec(&self, name: &str) -> ColumnSpec {
        ColumnSpec::new(
            name,
            self.kind.unwrap_or(ColumnKind::Double),
            Some(
                self.comment
                    .clone()
                    .unwrap_or_else(|| GENERIC_COLUMN_COMMENT.to_string()),
            ),
        )
    }
}

/// Union of non-base columns across `shards`, with the per-shard gaps to fill.
pub(crate) fn column_drift(
    shards: &[TableName],
    described: &[CatalogColumn],
) -> (BTreeMap<String, ObservedColumn>, Vec<(TableName, String)>) {
    let mut union: BTreeMap<String, ObservedColumn> = BTreeMap::new();
    let mut per_table: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for column in described {
        if !shards.iter().any(|shard| shard.as_str() == column.table) {
            continue;
        }
        per_table
            .entry(column.table.as_str())
            .or_default()
            .insert(column.name.as_str());
        if is_base_column(&column.name) {
            continue;
        }
        let observed = union.entry(column.name.clone()).or_insert(ObservedColumn {
            kind: None,
            comment: None,
        });
        if observed.kind.is_none() {
            observed.kind = ColumnKind::from_sql_type(&column.sql_type);
        }
        if observed.comment.is_none() {
            observed.comment = column.comment.clone();
        }
    }
    let mut missing = Vec::new();
    for shard in shards {
        let have = per_table.get(shard.as_str());
        for name in union.keys() {
            if !have.is_some_and(|columns| columns.contains(name.as_str())) {
                missing.push((shard.clone(), name.clone()));
            }
        }
    }
    (union, missing)
}

#[async_trait]
impl ColumnSyncApi for StrataStore {
    async fn sync_columns(&self, family: DatasetFamily) -> StrataResult<ColumnSyncReport> {
        if !family.is_open() {
            return Err(StrataError::validation(format!(
                "{family} has a fixed schema; column sync only applies to open families"
            )));
        }
        let shards = self.family_shards(&self.conn, family).await?;
        let mut report = ColumnSyncReport {
            shards_scanned: shards.len(),
            ..ColumnSyncReport::default()
        };
        if shards.is_empty() {
            return Ok(report);
        }
        let prefix = family.shard_prefix(self.registry.prefix().as_str());
        let described = sql::describe_columns(&self.conn, TableFilter::Prefix(&prefix)).await?;
        let (union, missing) = column_drift(&shards, &described);
        report.union_columns = union.keys().cloned().collect();

        for (table, name) in missing {
            let Some(observed) = union.get(&name) else {
                continue;
            };
            let addition = ColumnAddition {
                table: table.to_string(),
                column: name.clone(),
            };
            if self.ensure_column_exists(&table, &observed.to_spec(&name)).await {
                report.added.push(addition);
            } else {
                report.failed.push(addition);
            }
        }

        if !report.added.is_empty() {
            report.view_rebuilt = self.rebuild_view(family).await;
        }
        log::info!(
            "column sync for {family}: {} shards, {} columns, {} added, {} failed",
            report.shards_scanned,
            report.union_columns.len(),
            report.added.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::column_drift;
    use crate::sql::CatalogColumn;
    use strata_core::{ColumnKind, TableName};

    fn column(table: &str, name: &str, sql_type: &str, comment: Option<&str>) -> CatalogColumn {
        CatalogColumn {
            table: table.to_string(),
            name: name.to_string(),
            sql_type: sql_type.to_string(),
            comment: comment.map(str::to_string),
            ordinal: 0,
        }
    }

    #[test]
    fn finds_gaps_and_keeps_described_metadata() {
        let shards = vec![
            TableName::from_catalog("ts_factors_custom_a"),
            TableName::from_catalog("ts_factors_custom_b"),
        ];
        let described = vec![
            column("ts_factors_custom_a", "entity_key", "varchar(20)", None),
            column("ts_factors_custom_a", "alpha", "bigint", Some("alpha signal")),
            column("ts_factors_custom_b", "entity_key", "varchar(20)", None),
            column("ts_factors_custom_b", "beta", "", None),
        ];
        let (union, missing) = column_drift(&shards, &described);
        assert_eq!(union.keys().collect::<Vec<_>>(), vec!["alpha", "beta"]);
        assert_eq!(union["alpha"].kind, Some(ColumnKind::BigInt));
        assert_eq!(union["alpha"].comment.as_deref(), Some("alpha signal"));

        let spec = union["beta"].to_spec("beta");
        assert_eq!(spec.kind, ColumnKind::Double);
        assert_eq!(spec.comment.as_deref(), Some("custom factor"));

        let gaps: Vec<(&str, &str)> = missing
            .iter()
            .map(|(table, name)| (table.as_str(), name.as_str()))
            .collect();
        assert_eq!(
            gaps,
            vec![
                ("ts_factors_custom_a", "beta"),
                ("ts_factors_custom_b", "alpha"),
            ]
        );
    }

    #[test]
    fn aligned_shards_have_no_gaps() {
        let shards = vec![TableName::from_catalog("ts_factors_custom_a")];
        let described = vec![column("ts_factors_custom_a", "alpha", "double", None)];
        let (_, missing) = column_drift(&shards, &described);
        assert!(missing.is_empty());
    }
}
