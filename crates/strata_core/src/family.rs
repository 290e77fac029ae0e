use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{StrataError, StrataResult};

/// A named group of shards sharing one schema shape and one unified view.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetFamily {
    DailyBars,
    DailyIndicators,
    TechnicalFactors,
    ProFactors,
    CustomFactors,
}

impl DatasetFamily {
    pub const ALL: [DatasetFamily; 5] = [
        DatasetFamily::DailyBars,
        DatasetFamily::DailyIndicators,
        DatasetFamily::TechnicalFactors,
        DatasetFamily::ProFactors,
        DatasetFamily::CustomFactors,
    ];

    /// Family used by the lifecycle manager to decide whether an entity is provisioned.
    pub const REFERENCE: DatasetFamily = DatasetFamily::DailyBars;

    pub fn name(self) -> &'static str {
        match self {
            DatasetFamily::DailyBars => "daily-bars",
            DatasetFamily::DailyIndicators => "daily-indicators",
            DatasetFamily::TechnicalFactors => "technical-factors",
            DatasetFamily::ProFactors => "pro-factors",
            DatasetFamily::CustomFactors => "custom-factors",
        }
    }

    /// Token spliced between the table prefix and the shard suffix.
    pub fn table_token(self) -> &'static str {
        match self {
            DatasetFamily::DailyBars => "daily",
            DatasetFamily::DailyIndicators => "daily_indicators",
            DatasetFamily::TechnicalFactors => "factors",
            DatasetFamily::ProFactors => "factors_pro",
            DatasetFamily::CustomFactors => "factors_custom",
        }
    }

    /// The open family has no canonical columns; everything beyond the key arrives at
    /// write time and is reconciled by the column synchronizer.
    pub fn is_open(self) -> bool {
        matches!(self, DatasetFamily::CustomFactors)
    }

    /// `<prefix>_<token>_`, the text every shard of this family starts with.
    pub fn shard_prefix(self, table_prefix: &str) -> String {
        format!("{table_prefix}_{}_", self.table_token())
    }

    pub fn view_name(self, table_prefix: &str) -> String {
        format!("{table_prefix}_{}_view", self.table_token())
    }

    /// Shard prefixes of other families that start with this family's prefix. Tables
    /// matching one of these belong to the more specific family.
    pub fn more_specific_prefixes(self, table_prefix: &str) -> Vec<String> {
        let own = self.shard_prefix(table_prefix);
        DatasetFamily::ALL
            .iter()
            .filter(|other| **other != self)
            .map(|other| other.shard_prefix(table_prefix))
            .filter(|candidate| candidate.len() > own.len() && candidate.starts_with(&own))
            .collect()
    }

    /// Resolve the family owning `table_name`, longest matching prefix first.
    pub fn owning_family(table_prefix: &str, table_name: &str) -> Option<DatasetFamily> {
        let mut families = DatasetFamily::ALL.to_vec();
        families.sort_by_key(|family| std::cmp::Reverse(family.table_token().len()));
        families
            .into_iter()
            .find(|family| table_name.starts_with(&family.shard_prefix(table_prefix)))
    }

    /// True when `table_name` is a shard of this family and not of a more specific one.
    pub fn owns_table(self, table_prefix: &str, table_name: &str) -> bool {
        if table_name == self.view_name(table_prefix) {
            return false;
        }
        DatasetFamily::owning_family(table_prefix, table_name) == Some(self)
            && table_name.len() > self.shard_prefix(table_prefix).len()
    }
}

impl fmt::Display for DatasetFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DatasetFamily {
    type Err = StrataError;

    fn from_str(value: &str) -> StrataResult<Self> {
        DatasetFamily::ALL
            .into_iter()
            .find(|family| family.name() == value || family.table_token() == value)
            .ok_or_else(|| StrataError::validation(format!("unknown dataset family '{value}'")))
    }
}
