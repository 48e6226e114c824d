use serde::Deserialize;

use crate::error::StoreError;

/// Primitive kind of a message field.
///
/// Struct fields reference another message in the same scheme by name; the
/// referenced message usually has no id and exists only to be embedded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Double,
    /// Fixed-length byte array of the declared width.
    Bytes { size: usize },
    /// Variable-length byte string.
    ByteString,
    /// Variable-length text string.
    Text,
    /// Nested message, by name.
    Struct { message: String },
}

impl FieldKind {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            FieldKind::Int8
                | FieldKind::Int16
                | FieldKind::Int32
                | FieldKind::Int64
                | FieldKind::Uint8
                | FieldKind::Uint16
                | FieldKind::Uint32
                | FieldKind::Uint64
        )
    }

    /// Whether values of this kind support equality comparison, i.e. may
    /// carry a primary-key or unique annotation.
    pub fn is_comparable(&self) -> bool {
        !matches!(self, FieldKind::Struct { .. })
    }
}

/// Index annotation on a field (or on the implicit sequence column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    #[default]
    No,
    Yes,
    Unique,
}

/// One field of a message type, with its storage annotations.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    /// `index: yes|unique` — secondary index on the backing column.
    #[serde(default)]
    pub index: IndexMode,
    /// `primary-key: true` — column becomes the table's primary key.
    #[serde(default, rename = "primary-key")]
    pub primary_key: bool,
    /// Type override: interpret a fixed byte array as text. Stored trimmed
    /// at the first NUL instead of zero-padded.
    #[serde(default, rename = "as-text")]
    pub as_text: bool,
}

/// One message type in the catalog.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageDescriptor {
    pub name: String,
    /// Numeric id. Zero means the message is embedded-only: it never gets a
    /// table of its own and cannot be posted directly.
    #[serde(default)]
    pub id: i32,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    /// Table remap: override the destination table name for this type.
    #[serde(default)]
    pub table: Option<String>,
    /// Dotted key path used by the document codec for indexing/filtering.
    #[serde(default)]
    pub key: Option<String>,
    /// Per-type sequence-column index mode, overriding the open option for
    /// this type's table. Unlike the open option it also allows a plain
    /// non-unique index.
    #[serde(default, rename = "seq-index")]
    pub seq_index: Option<IndexMode>,
}

impl MessageDescriptor {
    /// Destination table name: the remap annotation when present, otherwise
    /// the message name.
    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// The external message-type catalog.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scheme {
    #[serde(default)]
    pub messages: Vec<MessageDescriptor>,
}

impl Scheme {
    /// Parse a scheme from a TOML document.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, StoreError> {
        let scheme: Scheme =
            toml::from_str(toml_str).map_err(|e| StoreError::Schema(e.to_string()))?;
        scheme.validate()?;
        Ok(scheme)
    }

    /// Load a scheme from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Schema(format!("{path}: {e}")))?;
        Self::from_toml_str(&content)
    }

    pub fn message_by_id(&self, id: i32) -> Option<&MessageDescriptor> {
        if id == 0 {
            return None;
        }
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn message_by_name(&self, name: &str) -> Option<&MessageDescriptor> {
        self.messages.iter().find(|m| m.name == name)
    }

    /// Structural checks that do not depend on the codec strategy:
    /// duplicate ids/names, unresolvable struct references, key annotations
    /// on kinds incapable of equality comparison.
    pub fn validate(&self) -> Result<(), StoreError> {
        for (i, m) in self.messages.iter().enumerate() {
            if self.messages[..i].iter().any(|o| o.name == m.name) {
                return Err(StoreError::Schema(format!("duplicate message name '{}'", m.name)));
            }
            if m.id != 0 && self.messages[..i].iter().any(|o| o.id == m.id) {
                return Err(StoreError::Schema(format!(
                    "duplicate message id {} ('{}')",
                    m.id, m.name
                )));
            }
            for f in &m.fields {
                if let FieldKind::Struct { message } = &f.kind {
                    if self.message_by_name(message).is_none() {
                        return Err(StoreError::Schema(format!(
                            "message '{}' field '{}' references unknown message '{}'",
                            m.name, f.name, message
                        )));
                    }
                }
                if (f.primary_key || f.index != IndexMode::No) && !f.kind.is_comparable() {
                    return Err(StoreError::Schema(format!(
                        "message '{}' field '{}': key annotation on non-comparable kind",
                        m.name, f.name
                    )));
                }
            }
            if let Some(key) = &m.key {
                self.resolve_key_path(m, key)?;
            }
        }
        Ok(())
    }

    /// Walk a dotted key path through nested struct fields, returning the
    /// terminal field descriptor.
    pub fn resolve_key_path<'a>(
        &'a self,
        message: &'a MessageDescriptor,
        path: &str,
    ) -> Result<&'a FieldDescriptor, StoreError> {
        let mut current = message;
        let mut resolved: Option<&FieldDescriptor> = None;

        for segment in path.split('.') {
            if let Some(prev) = resolved {
                let FieldKind::Struct { message: nested } = &prev.kind else {
                    return Err(StoreError::KeyPath(format!(
                        "'{path}': field '{}' of '{}' is not a nested message",
                        prev.name, current.name
                    )));
                };
                current = self.message_by_name(nested).ok_or_else(|| {
                    StoreError::KeyPath(format!("'{path}': unknown message '{nested}'"))
                })?;
            }
            resolved = Some(current.field(segment).ok_or_else(|| {
                StoreError::KeyPath(format!(
                    "'{path}': message '{}' has no field '{segment}'",
                    current.name
                ))
            })?);
        }

        let field = resolved
            .ok_or_else(|| StoreError::KeyPath(format!("'{path}': empty key path")))?;
        if !field.kind.is_comparable() {
            return Err(StoreError::KeyPath(format!(
                "'{path}': terminal field '{}' is not a comparable kind",
                field.name
            )));
        }
        Ok(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested_scheme() -> Scheme {
        Scheme::from_toml_str(
            r#"
            [[messages]]
            name = "header"
            key = "s0"
            fields = [
                { name = "s0", kind = { type = "int8" } },
                { name = "s1", kind = { type = "text" } },
            ]

            [[messages]]
            name = "msg"
            id = 10
            key = "header.s0"
            fields = [
                { name = "header", kind = { type = "struct", message = "header" } },
                { name = "f0", kind = { type = "int8" } },
                { name = "f1", kind = { type = "double" } },
            ]
            "#,
        )
        .unwrap()
    }

    #[test]
    fn toml_scheme_loads() {
        let scheme = nested_scheme();
        assert_eq!(scheme.messages.len(), 2);
        let msg = scheme.message_by_id(10).unwrap();
        assert_eq!(msg.name, "msg");
        assert_eq!(msg.table_name(), "msg");
        // id 0 is never resolvable by id
        assert!(scheme.message_by_id(0).is_none());
    }

    #[test]
    fn key_path_resolves_through_nested_struct() {
        let scheme = nested_scheme();
        let msg = scheme.message_by_name("msg").unwrap();
        let field = scheme.resolve_key_path(msg, "header.s0").unwrap();
        assert_eq!(field.name, "s0");
        assert_eq!(field.kind, FieldKind::Int8);
    }

    #[test]
    fn key_path_rejects_unknown_field() {
        let scheme = nested_scheme();
        let msg = scheme.message_by_name("msg").unwrap();
        assert!(matches!(
            scheme.resolve_key_path(msg, "header.missing"),
            Err(StoreError::KeyPath(_))
        ));
        assert!(matches!(
            scheme.resolve_key_path(msg, "f0.s0"),
            Err(StoreError::KeyPath(_))
        ));
    }

    #[test]
    fn key_path_rejects_struct_terminal() {
        let scheme = nested_scheme();
        let msg = scheme.message_by_name("msg").unwrap();
        assert!(matches!(
            scheme.resolve_key_path(msg, "header"),
            Err(StoreError::KeyPath(_))
        ));
    }

    #[test]
    fn validate_rejects_key_annotation_on_struct() {
        let err = Scheme::from_toml_str(
            r#"
            [[messages]]
            name = "inner"
            fields = [{ name = "x", kind = { type = "int8" } }]

            [[messages]]
            name = "outer"
            id = 1
            fields = [
                { name = "n", kind = { type = "struct", message = "inner" }, index = "unique" },
            ]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::Schema(_)));
    }

    #[test]
    fn validate_rejects_duplicate_ids() {
        let err = Scheme::from_toml_str(
            r#"
            [[messages]]
            name = "a"
            id = 1
            [[messages]]
            name = "b"
            id = 1
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::Schema(_)));
    }

    #[test]
    fn seq_index_annotation_parses_all_modes() {
        let scheme = Scheme::from_toml_str(
            r#"
            [[messages]]
            name = "plain"
            id = 1
            seq-index = "yes"

            [[messages]]
            name = "strict"
            id = 2
            seq-index = "unique"

            [[messages]]
            name = "default"
            id = 3
            "#,
        )
        .unwrap();
        assert_eq!(scheme.message_by_id(1).unwrap().seq_index, Some(IndexMode::Yes));
        assert_eq!(scheme.message_by_id(2).unwrap().seq_index, Some(IndexMode::Unique));
        assert_eq!(scheme.message_by_id(3).unwrap().seq_index, None);
    }

    #[test]
    fn table_remap_overrides_name() {
        let scheme = Scheme::from_toml_str(
            r#"
            [[messages]]
            name = "msg"
            id = 10
            table = "table"
            fields = [{ name = "field", kind = { type = "int32" } }]
            "#,
        )
        .unwrap();
        assert_eq!(scheme.message_by_id(10).unwrap().table_name(), "table");
    }
}
