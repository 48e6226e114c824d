use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::StoreError;

/// Whether the implicit sequence column gets a unique index.
///
/// Under `unique` the sequence participates in uniqueness checks exactly
/// like a declared unique field; under `no`, duplicate sequence numbers
/// create independent rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeqIndex {
    #[default]
    No,
    Unique,
}

/// Open direction, applicable to the document variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    R,
    W,
    #[default]
    Rw,
}

impl Direction {
    pub fn readable(self) -> bool {
        matches!(self, Direction::R | Direction::Rw)
    }

    pub fn writable(self) -> bool {
        matches!(self, Direction::W | Direction::Rw)
    }
}

/// Replay filter for the document variant.
///
/// `message` alone selects a type and replays all its rows; each entry in
/// `filters` adds a `key path == value` equality conjunction; an empty spec
/// selects every row of every type.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuerySpec {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

impl QuerySpec {
    pub fn for_message(name: impl Into<String>) -> Self {
        Self { message: Some(name.into()), filters: BTreeMap::new() }
    }

    pub fn filter(mut self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(path.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.message.is_none() && self.filters.is_empty()
    }
}

/// Recognized open parameters. Anything else is a configuration error,
/// enforced by `deny_unknown_fields`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct OpenOptions {
    /// Insert-vs-upsert policy: under replace, a constraint collision fully
    /// overwrites the existing row.
    #[serde(default)]
    pub replace: bool,

    #[serde(default)]
    pub seq_index: SeqIndex,

    /// Rows per transaction. 1 (the default) commits every write.
    #[serde(default = "default_bulk_size")]
    pub bulk_size: usize,

    /// Explicit read target selected at open time. For the columnar variant
    /// this is a resolved table name; the document variant requires it as
    /// the shared backing table.
    #[serde(default)]
    pub table: Option<String>,

    #[serde(default)]
    pub dir: Direction,

    /// Document-variant replay filter.
    #[serde(default)]
    pub query: Option<QuerySpec>,
}

fn default_bulk_size() -> usize {
    1
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            replace: false,
            seq_index: SeqIndex::default(),
            bulk_size: default_bulk_size(),
            table: None,
            dir: Direction::default(),
            query: None,
        }
    }
}

impl OpenOptions {
    /// Parse options from a TOML document, rejecting unrecognized keys.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, StoreError> {
        let options: OpenOptions =
            toml::from_str(toml_str).map_err(|e| StoreError::Config(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.bulk_size == 0 {
            return Err(StoreError::Config("bulk-size must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_commit_every_write() {
        let options = OpenOptions::default();
        assert!(!options.replace);
        assert_eq!(options.seq_index, SeqIndex::No);
        assert_eq!(options.bulk_size, 1);
        assert_eq!(options.dir, Direction::Rw);
    }

    #[test]
    fn parses_recognized_set() {
        let options = OpenOptions::from_toml_str(
            r#"
            replace = true
            seq-index = "unique"
            bulk-size = 10
            table = "scalar"
            dir = "r"
            "#,
        )
        .unwrap();
        assert!(options.replace);
        assert_eq!(options.seq_index, SeqIndex::Unique);
        assert_eq!(options.bulk_size, 10);
        assert_eq!(options.table.as_deref(), Some("scalar"));
        assert!(options.dir.readable());
        assert!(!options.dir.writable());
    }

    #[test]
    fn unrecognized_option_is_config_error() {
        let err = OpenOptions::from_toml_str("autoconnect = true").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn zero_bulk_size_rejected() {
        let err = OpenOptions::from_toml_str("bulk-size = 0").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn query_spec_builder() {
        let q = QuerySpec::for_message("msg").filter("header.s1", "first");
        assert_eq!(q.message.as_deref(), Some("msg"));
        assert_eq!(q.filters.get("header.s1").map(String::as_str), Some("first"));
        assert!(!q.is_empty());
        assert!(QuerySpec::default().is_empty());
    }
}
