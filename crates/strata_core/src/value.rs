use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{ColumnKind, EntityKey};

/// A single observed field value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// NaN and infinities never reach the database; they persist as NULL.
    pub fn normalized(self) -> Self {
        match self {
            FieldValue::Float(value) if !value.is_finite() => FieldValue::Null,
            other => other,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(value) => Some(*value),
            FieldValue::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Column kind used when a previously unseen field creates an open-family column.
    pub fn inferred_kind(&self) -> ColumnKind {
        match self {
            FieldValue::Bool(_) => ColumnKind::Boolean,
            FieldValue::Int(_) => ColumnKind::BigInt,
            FieldValue::Text(_) => ColumnKind::Text,
            FieldValue::Null | FieldValue::Float(_) => ColumnKind::Double,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<Option<f64>> for FieldValue {
    fn from(value: Option<f64>) -> Self {
        value.map(FieldValue::Float).unwrap_or(FieldValue::Null)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

/// One producer record: an (entity, date) observation with family-specific fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub entity_key: EntityKey,
    pub observation_date: NaiveDate,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl ObservationRecord {
    pub fn new(entity_key: EntityKey, observation_date: NaiveDate) -> Self {
        Self {
            entity_key,
            observation_date,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

/// A row read back through a unified view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewRow {
    pub entity_key: String,
    pub observation_date: NaiveDate,
    pub fields: BTreeMap<String, FieldValue>,
}

impl ViewRow {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}
