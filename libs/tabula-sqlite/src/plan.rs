//! Table plans: the resolved backing shape of a message type.
//!
//! A plan is built once per message type and cached by the store handle; it
//! carries everything the schema resolver and the codecs need — column names
//! in persisted order, SQL affinities, and the index set.

use tabula_api::{FieldDescriptor, FieldKind, IndexMode, MessageDescriptor, Scheme, SeqIndex, StoreError};

/// Implicit leading column holding the producer sequence number.
pub const SEQ_COLUMN: &str = "_seq";

/// What a column stores, so codecs can encode/decode without re-deriving
/// the layout from the scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRole {
    /// The implicit sequence column.
    Seq,
    /// Scalar field column of the columnar layout, by field name.
    Field(String),
    /// Message-type discriminator of the shared document table.
    MessageName,
    /// Serialized document blob.
    Document,
    /// Projected key side-column for one message type of the shared table.
    Key { message: String },
}

#[derive(Debug, Clone)]
pub struct ColumnPlan {
    pub name: String,
    pub sql_type: &'static str,
    pub not_null: bool,
    pub primary_key: bool,
    pub role: ColumnRole,
}

/// Secondary index over a single column. `only_message` restricts the index
/// to rows of one message type in the shared document table.
#[derive(Debug, Clone)]
pub struct IndexPlan {
    pub column: String,
    pub unique: bool,
    pub only_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TablePlan {
    /// Message type the plan was built for; empty for the document catalog
    /// plan that serves unfiltered replay.
    pub message: String,
    pub msg_id: i32,
    pub table: String,
    /// Columns in persisted order, the sequence column first.
    pub columns: Vec<ColumnPlan>,
    pub indexes: Vec<IndexPlan>,
}

impl TablePlan {
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// SQL affinity for a scalar field. Unsigned 64-bit values do not fit the
/// engine's signed integer storage and are rejected outright, as are nested
/// messages, which have no scalar column representation.
pub fn sql_type(field: &FieldDescriptor) -> Result<&'static str, StoreError> {
    match &field.kind {
        FieldKind::Int8
        | FieldKind::Int16
        | FieldKind::Int32
        | FieldKind::Int64
        | FieldKind::Uint8
        | FieldKind::Uint16
        | FieldKind::Uint32 => Ok("INTEGER"),
        FieldKind::Uint64 => Err(StoreError::Schema(format!(
            "field '{}': uint64 values exceed the engine's integer range",
            field.name
        ))),
        FieldKind::Double => Ok("REAL"),
        FieldKind::Bytes { .. } if field.as_text => Ok("VARCHAR"),
        FieldKind::Bytes { .. } | FieldKind::ByteString => Ok("BLOB"),
        FieldKind::Text => Ok("VARCHAR"),
        FieldKind::Struct { .. } => Err(StoreError::Schema(format!(
            "field '{}': nested messages have no scalar column",
            field.name
        ))),
    }
}

/// Build the columnar plan: one table per message type, one column per
/// declared field, the sequence column first.
pub fn columnar_plan(
    message: &MessageDescriptor,
    seq_index: SeqIndex,
) -> Result<TablePlan, StoreError> {
    if message.id == 0 {
        return Err(StoreError::Schema(format!(
            "message '{}' is embedded-only and has no table",
            message.name
        )));
    }

    let mut columns = vec![ColumnPlan {
        name: SEQ_COLUMN.to_string(),
        sql_type: "INTEGER",
        not_null: false,
        primary_key: false,
        role: ColumnRole::Seq,
    }];
    let mut indexes = Vec::new();
    // the per-type annotation wins over the open option and also allows a
    // plain non-unique index
    let seq_mode = message.seq_index.unwrap_or(match seq_index {
        SeqIndex::No => IndexMode::No,
        SeqIndex::Unique => IndexMode::Unique,
    });
    match seq_mode {
        IndexMode::No => {}
        IndexMode::Yes => indexes.push(IndexPlan {
            column: SEQ_COLUMN.to_string(),
            unique: false,
            only_message: None,
        }),
        IndexMode::Unique => indexes.push(IndexPlan {
            column: SEQ_COLUMN.to_string(),
            unique: true,
            only_message: None,
        }),
    }

    for field in &message.fields {
        let sql_type = sql_type(field)
            .map_err(|e| e.with_context(format!("message '{}'", message.name)))?;
        columns.push(ColumnPlan {
            name: field.name.clone(),
            sql_type,
            not_null: true,
            primary_key: field.primary_key,
            role: ColumnRole::Field(field.name.clone()),
        });
        match field.index {
            IndexMode::No => {}
            IndexMode::Yes => indexes.push(IndexPlan {
                column: field.name.clone(),
                unique: false,
                only_message: None,
            }),
            IndexMode::Unique => indexes.push(IndexPlan {
                column: field.name.clone(),
                unique: true,
                only_message: None,
            }),
        }
    }

    Ok(TablePlan {
        message: message.name.clone(),
        msg_id: message.id,
        table: message.table_name().to_string(),
        columns,
        indexes,
    })
}

/// Name of the projected key side-column for one message type.
pub fn key_column(message: &str) -> String {
    format!("_key_{message}")
}

/// Build the document plan: every message type shares one table of
/// `(_seq, name, data)` plus one projected side-column per declared key
/// path. The column set is derived from the whole scheme so the table is
/// identical regardless of which type triggers its creation.
///
/// `message` is the type the plan serves; `None` builds the catalog plan
/// used for unfiltered replay.
pub fn document_plan(
    scheme: &Scheme,
    message: Option<&MessageDescriptor>,
    table: &str,
    seq_index: SeqIndex,
) -> Result<TablePlan, StoreError> {
    let mut columns = vec![
        ColumnPlan {
            name: SEQ_COLUMN.to_string(),
            sql_type: "INTEGER",
            not_null: false,
            primary_key: false,
            role: ColumnRole::Seq,
        },
        ColumnPlan {
            name: "name".to_string(),
            sql_type: "VARCHAR",
            not_null: true,
            primary_key: false,
            role: ColumnRole::MessageName,
        },
        ColumnPlan {
            name: "data".to_string(),
            sql_type: "TEXT",
            not_null: true,
            primary_key: false,
            role: ColumnRole::Document,
        },
    ];
    let mut indexes = Vec::new();
    if seq_index == SeqIndex::Unique {
        indexes.push(IndexPlan { column: SEQ_COLUMN.to_string(), unique: true, only_message: None });
    }

    for m in &scheme.messages {
        let Some(key) = &m.key else { continue };
        let field = scheme
            .resolve_key_path(m, key)
            .map_err(|e| e.with_context(format!("message '{}'", m.name)))?;
        let sql_type = sql_type(field)
            .map_err(|e| e.with_context(format!("message '{}' key '{key}'", m.name)))?;
        columns.push(ColumnPlan {
            name: key_column(&m.name),
            sql_type,
            not_null: false,
            primary_key: false,
            role: ColumnRole::Key { message: m.name.clone() },
        });
        // The key index is unique only when the terminal field says so; a
        // plain key gets a non-unique index and tolerates duplicates.
        indexes.push(IndexPlan {
            column: key_column(&m.name),
            unique: field.index == IndexMode::Unique,
            only_message: Some(m.name.clone()),
        });
    }

    Ok(TablePlan {
        message: message.map(|m| m.name.clone()).unwrap_or_default(),
        msg_id: message.map(|m| m.id).unwrap_or(0),
        table: table.to_string(),
        columns,
        indexes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_api::Scheme;

    fn scheme(toml: &str) -> Scheme {
        Scheme::from_toml_str(toml).unwrap()
    }

    #[test]
    fn columnar_plan_orders_columns_after_seq() {
        let scheme = scheme(
            r#"
            [[messages]]
            name = "scalar"
            id = 10
            fields = [
                { name = "i8", kind = { type = "int8" }, index = "unique" },
                { name = "d", kind = { type = "double" } },
                { name = "t", kind = { type = "text" }, primary-key = true },
            ]
            "#,
        );
        let plan = columnar_plan(scheme.message_by_id(10).unwrap(), SeqIndex::Unique).unwrap();
        assert_eq!(plan.table, "scalar");
        let names: Vec<_> = plan.column_names().collect();
        assert_eq!(names, vec!["_seq", "i8", "d", "t"]);
        assert_eq!(plan.columns[1].sql_type, "INTEGER");
        assert_eq!(plan.columns[2].sql_type, "REAL");
        assert!(plan.columns[3].primary_key);
        assert_eq!(plan.indexes.len(), 2);
        assert!(plan.indexes.iter().all(|i| i.unique));
    }

    #[test]
    fn seq_index_annotation_overrides_the_open_option() {
        let scheme = scheme(
            r#"
            [[messages]]
            name = "plain"
            id = 1
            seq-index = "yes"
            fields = [{ name = "f", kind = { type = "int64" } }]

            [[messages]]
            name = "unindexed"
            id = 2
            seq-index = "no"
            fields = [{ name = "f", kind = { type = "int64" } }]

            [[messages]]
            name = "default"
            id = 3
            fields = [{ name = "f", kind = { type = "int64" } }]
            "#,
        );
        let seq_index = |plan: &TablePlan| {
            plan.indexes.iter().find(|i| i.column == SEQ_COLUMN).map(|i| i.unique)
        };

        let plan = columnar_plan(scheme.message_by_id(1).unwrap(), SeqIndex::Unique).unwrap();
        assert_eq!(seq_index(&plan), Some(false));

        let plan = columnar_plan(scheme.message_by_id(2).unwrap(), SeqIndex::Unique).unwrap();
        assert_eq!(seq_index(&plan), None);

        let plan = columnar_plan(scheme.message_by_id(3).unwrap(), SeqIndex::Unique).unwrap();
        assert_eq!(seq_index(&plan), Some(true));
    }

    #[test]
    fn uint64_field_rejected() {
        let scheme = scheme(
            r#"
            [[messages]]
            name = "msg"
            id = 1
            fields = [{ name = "u64", kind = { type = "uint64" } }]
            "#,
        );
        let err = columnar_plan(scheme.message_by_id(1).unwrap(), SeqIndex::No).unwrap_err();
        assert!(matches!(err, StoreError::Schema(_)));
    }

    #[test]
    fn nested_field_rejected_in_columnar_layout() {
        let scheme = scheme(
            r#"
            [[messages]]
            name = "inner"
            fields = [{ name = "x", kind = { type = "int8" } }]

            [[messages]]
            name = "outer"
            id = 1
            fields = [{ name = "n", kind = { type = "struct", message = "inner" } }]
            "#,
        );
        let err = columnar_plan(scheme.message_by_id(1).unwrap(), SeqIndex::No).unwrap_err();
        assert!(matches!(err, StoreError::Schema(_)));
    }

    #[test]
    fn embedded_only_message_has_no_plan() {
        let scheme = scheme(
            r#"
            [[messages]]
            name = "embedded"
            fields = [{ name = "x", kind = { type = "int8" } }]
            "#,
        );
        let err =
            columnar_plan(scheme.message_by_name("embedded").unwrap(), SeqIndex::No).unwrap_err();
        assert!(matches!(err, StoreError::Schema(_)));
    }

    #[test]
    fn text_override_maps_to_varchar() {
        let scheme = scheme(
            r#"
            [[messages]]
            name = "msg"
            id = 1
            fields = [
                { name = "raw", kind = { type = "bytes", size = 8 } },
                { name = "txt", kind = { type = "bytes", size = 32 }, as-text = true },
            ]
            "#,
        );
        let plan = columnar_plan(scheme.message_by_id(1).unwrap(), SeqIndex::No).unwrap();
        assert_eq!(plan.columns[1].sql_type, "BLOB");
        assert_eq!(plan.columns[2].sql_type, "VARCHAR");
    }

    #[test]
    fn document_plan_projects_every_declared_key() {
        let scheme = scheme(
            r#"
            [[messages]]
            name = "header"
            fields = [
                { name = "s0", kind = { type = "int8" } },
                { name = "s1", kind = { type = "text" } },
            ]

            [[messages]]
            name = "msg"
            id = 10
            key = "header.s1"
            fields = [
                { name = "header", kind = { type = "struct", message = "header" } },
                { name = "f0", kind = { type = "int32" } },
            ]

            [[messages]]
            name = "other"
            id = 20
            key = "tag"
            fields = [{ name = "tag", kind = { type = "int32" }, index = "unique" }]
            "#,
        );
        let msg = scheme.message_by_id(10).unwrap();
        let plan = document_plan(&scheme, Some(msg), "store", SeqIndex::No).unwrap();
        let names: Vec<_> = plan.column_names().collect();
        assert_eq!(names, vec!["_seq", "name", "data", "_key_msg", "_key_other"]);
        // key index uniqueness follows the terminal field annotation
        let by_col = |c: &str| plan.indexes.iter().find(|i| i.column == c).unwrap();
        assert!(!by_col("_key_msg").unique);
        assert!(by_col("_key_other").unique);
        assert_eq!(by_col("_key_msg").only_message.as_deref(), Some("msg"));
    }
}
