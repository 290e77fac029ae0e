use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{DatasetFamily, StrataError, StrataResult};

const MAX_KEY_LEN: usize = 20;
const MAX_PREFIX_LEN: usize = 16;
const RESERVED_SUFFIX: &str = "view";

/// External entity identifier (an instrument code such as `000001.SZ`).
///
/// Construction validates the raw text against `[A-Za-z0-9._-]{1,20}`, so a held
/// `EntityKey` is always safe to derive SQL identifiers from.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct EntityKey(String);

impl EntityKey {
    pub fn parse(raw: &str) -> StrataResult<Self> {
        if raw.is_empty() || raw.len() > MAX_KEY_LEN {
            return Err(StrataError::invalid_identifier(format!(
                "entity key must be 1..={MAX_KEY_LEN} characters: {raw:?}"
            )));
        }
        if !raw
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'))
        {
            return Err(StrataError::invalid_identifier(format!(
                "entity key contains characters outside [A-Za-z0-9._-]: {raw:?}"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shard suffix: text before the first `.`, lowercased, `-` folded to `_`.
    pub fn shard_suffix(&self) -> StrataResult<ShardSuffix> {
        let head = self.0.split('.').next().unwrap_or_default();
        let suffix: String = head
            .chars()
            .map(|ch| match ch {
                '-' => '_',
                other => other.to_ascii_lowercase(),
            })
            .collect();
        ShardSuffix::parse(&suffix)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntityKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for EntityKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for EntityKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        EntityKey::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ShardSuffix(String);

impl ShardSuffix {
    fn parse(raw: &str) -> StrataResult<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_KEY_LEN
            && raw
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
        if !valid {
            return Err(StrataError::invalid_identifier(format!(
                "shard suffix must match [A-Za-z0-9_]{{1,{MAX_KEY_LEN}}}: {raw:?}"
            )));
        }
        if raw == RESERVED_SUFFIX {
            return Err(StrataError::invalid_identifier(
                "shard suffix 'view' collides with the unified view name",
            ));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Prefix shared by every object this store creates.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TablePrefix(String);

impl TablePrefix {
    pub fn parse(raw: &str) -> StrataResult<Self> {
        let mut chars = raw.chars();
        let starts_alpha = chars.next().is_some_and(|ch| ch.is_ascii_lowercase());
        let valid = starts_alpha
            && raw.len() <= MAX_PREFIX_LEN
            && chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_');
        if !valid {
            return Err(StrataError::invalid_identifier(format!(
                "table prefix must match [a-z][a-z0-9_]{{0,{}}}: {raw:?}",
                MAX_PREFIX_LEN - 1
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TablePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Physical name of one shard table.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName(String);

impl TableName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a name read back from engine metadata. Only names already produced by
    /// [`shard_name`] or matched against a family prefix should pass through here.
    pub fn from_catalog(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Deterministically derive `<prefix>_<family token>_<suffix>`.
pub fn shard_name(
    prefix: &TablePrefix,
    family: DatasetFamily,
    entity: &EntityKey,
) -> StrataResult<TableName> {
    let suffix = entity.shard_suffix()?;
    let name = format!("{}{}", family.shard_prefix(prefix.as_str()), suffix);
    if DatasetFamily::owning_family(prefix.as_str(), &name) != Some(family) {
        return Err(StrataError::invalid_identifier(format!(
            "entity {entity} would map to {name}, which belongs to another family"
        )));
    }
    Ok(TableName(name))
}

/// Name of the family's unified view.
pub fn view_name(prefix: &TablePrefix, family: DatasetFamily) -> String {
    family.view_name(prefix.as_str())
}

/// Binds a validated prefix to the naming functions.
#[derive(Clone, Debug)]
pub struct ShardNamer {
    prefix: TablePrefix,
}

impl ShardNamer {
    pub fn new(prefix: TablePrefix) -> Self {
        Self { prefix }
    }

    pub fn prefix(&self) -> &TablePrefix {
        &self.prefix
    }

    pub fn shard_name(&self, family: DatasetFamily, entity: &EntityKey) -> StrataResult<TableName> {
        shard_name(&self.prefix, family, entity)
    }

    pub fn view_name(&self, family: DatasetFamily) -> String {
        view_name(&self.prefix, family)
    }

    pub fn owns_table(&self, family: DatasetFamily, table_name: &str) -> bool {
        family.owns_table(self.prefix.as_str(), table_name)
    }

    /// Strip the family prefix from a shard name, leaving its suffix.
    pub fn suffix_of<'a>(&self, family: DatasetFamily, table_name: &'a str) -> Option<&'a str> {
        if !self.owns_table(family, table_name) {
            return None;
        }
        table_name.strip_prefix(&family.shard_prefix(self.prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::{EntityKey, ShardNamer, TablePrefix, shard_name};
    use crate::{DatasetFamily, StrataError};

    fn prefix() -> TablePrefix {
        TablePrefix::parse("ts").expect("prefix")
    }

    #[test]
    fn shard_name_is_pure() {
        let key = EntityKey::parse("000001.SZ").expect("key");
        let first = shard_name(&prefix(), DatasetFamily::DailyBars, &key).expect("name");
        let second = shard_name(&prefix(), DatasetFamily::DailyBars, &key).expect("name");
        assert_eq!(first, second);
        assert_eq!(first.as_str(), "ts_daily_000001");
    }

    #[test]
    fn suffix_is_lowercased_and_underscored() {
        let key = EntityKey::parse("AB-c9.US").expect("key");
        let name = shard_name(&prefix(), DatasetFamily::ProFactors, &key).expect("name");
        assert_eq!(name.as_str(), "ts_factors_pro_ab_c9");
    }

    #[test]
    fn rejects_injection_attempts() {
        for raw in ["1;DROP TABLE x", "a b", "", "x'--", "abc`", "000001.SZ\n"] {
            let err = EntityKey::parse(raw).expect_err(raw);
            assert!(matches!(err, StrataError::InvalidIdentifier { .. }), "{raw}");
        }
    }

    #[test]
    fn rejects_overlong_keys() {
        let raw = "a".repeat(21);
        assert!(EntityKey::parse(&raw).is_err());
        assert!(EntityKey::parse(&"a".repeat(20)).is_ok());
    }

    #[test]
    fn rejects_empty_suffix() {
        let key = EntityKey::parse(".SZ").expect("key passes the raw pattern");
        let err = shard_name(&prefix(), DatasetFamily::DailyBars, &key).expect_err("empty");
        assert!(matches!(err, StrataError::InvalidIdentifier { .. }));
    }

    #[test]
    fn rejects_reserved_view_suffix() {
        let key = EntityKey::parse("VIEW").expect("key");
        assert!(shard_name(&prefix(), DatasetFamily::DailyBars, &key).is_err());
    }

    #[test]
    fn rejects_names_swept_into_a_more_specific_family() {
        let key = EntityKey::parse("indicators_x").expect("key");
        assert!(shard_name(&prefix(), DatasetFamily::DailyBars, &key).is_err());
        assert!(shard_name(&prefix(), DatasetFamily::DailyIndicators, &key).is_ok());
    }

    #[test]
    fn prefix_validation() {
        assert!(TablePrefix::parse("ts").is_ok());
        assert!(TablePrefix::parse("stock_v2").is_ok());
        assert!(TablePrefix::parse("9ts").is_err());
        assert!(TablePrefix::parse("TS").is_err());
        assert!(TablePrefix::parse("").is_err());
        assert!(TablePrefix::parse("ts;drop").is_err());
    }

    #[test]
    fn namer_round_trips_suffix() {
        let namer = ShardNamer::new(prefix());
        let key = EntityKey::parse("600000.SH").expect("key");
        let name = namer
            .shard_name(DatasetFamily::DailyIndicators, &key)
            .expect("name");
        assert_eq!(
            namer.suffix_of(DatasetFamily::DailyIndicators, name.as_str()),
            Some("600000")
        );
        assert_eq!(namer.suffix_of(DatasetFamily::DailyBars, name.as_str()), None);
    }

    #[test]
    fn entity_key_deserialization_validates() {
        let ok: EntityKey = serde_json::from_str("\"000002.SZ\"").expect("valid");
        assert_eq!(ok.as_str(), "000002.SZ");
        assert!(serde_json::from_str::<EntityKey>("\"1;DROP\"").is_err());
    }
}
