//! Codec strategies: how typed messages map onto rows.
//!
//! `ColumnarCodec` gives every message type its own table with one scalar
//! column per field. `DocumentCodec` serializes whole messages into a shared
//! table of `(_seq, name, data)` and projects declared key paths into
//! indexed side-columns so filtered replay stays typed and indexed.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rusqlite::Row;
use rusqlite::types::Value as SqlValue;
use tabula_api::{
    DataFrame, FieldDescriptor, FieldKind, MessageDescriptor, OpenOptions, QuerySpec, Scheme,
    SeqIndex, StoreError, Value,
};
use tracing::warn;

use crate::map_sqlite_err;
use crate::plan::{self, ColumnRole, TablePlan, columnar_plan, document_plan, key_column};
use crate::schema::ident;

/// Strategy seam between the pipelines and the row layout.
///
/// Replay statements follow one contract: the select lists `rowid` first,
/// binds the rowid watermark as parameter 1 (the reader supplies it), and
/// returns at most one row; `build_select` params follow the watermark.
pub(crate) trait RowCodec {
    /// Resolve the backing plan for one message type.
    fn plan_for(
        &self,
        scheme: &Scheme,
        message: &MessageDescriptor,
    ) -> Result<TablePlan, StoreError>;

    /// Plan behind the initial read cursor, when the open options select
    /// one. `None` leaves the read side idle until a control directive.
    fn open_read_plan(
        &self,
        scheme: &Scheme,
        options: &OpenOptions,
    ) -> Result<Option<TablePlan>, StoreError>;

    /// Encode a posted frame into values aligned with the plan's columns.
    fn encode(
        &self,
        scheme: &Scheme,
        plan: &TablePlan,
        frame: &DataFrame,
    ) -> Result<Vec<SqlValue>, StoreError>;

    /// Decode one fetched row back into a typed frame.
    fn decode(&self, scheme: &Scheme, plan: &TablePlan, row: &Row<'_>)
    -> Result<DataFrame, StoreError>;

    /// Build the single-row replay statement and its post-watermark params.
    fn build_select(
        &self,
        scheme: &Scheme,
        plan: &TablePlan,
        query: Option<&QuerySpec>,
    ) -> Result<(String, Vec<SqlValue>), StoreError>;
}

fn type_mismatch(field: &FieldDescriptor, value: &Value) -> StoreError {
    StoreError::Validation(format!(
        "field '{}': value does not match kind {:?}",
        field.name, field.kind
    ))
    .with_context(format!("{value:?}"))
}

fn int_in_width(field: &FieldDescriptor, v: i64) -> bool {
    match &field.kind {
        FieldKind::Int8 => i8::try_from(v).is_ok(),
        FieldKind::Int16 => i16::try_from(v).is_ok(),
        FieldKind::Int32 => i32::try_from(v).is_ok(),
        FieldKind::Int64 => true,
        FieldKind::Uint8 => u8::try_from(v).is_ok(),
        FieldKind::Uint16 => u16::try_from(v).is_ok(),
        FieldKind::Uint32 => u32::try_from(v).is_ok(),
        FieldKind::Uint64 => v >= 0,
        _ => true,
    }
}

/// Scalar encoding shared by the columnar columns and the document key
/// side-columns. `None` encodes the kind's zero value.
fn encode_scalar(field: &FieldDescriptor, value: Option<&Value>) -> Result<SqlValue, StoreError> {
    let Some(value) = value else { return Ok(zero_scalar(field)) };
    match &field.kind {
        FieldKind::Int8
        | FieldKind::Int16
        | FieldKind::Int32
        | FieldKind::Int64
        | FieldKind::Uint8
        | FieldKind::Uint16
        | FieldKind::Uint32
        | FieldKind::Uint64 => {
            let v = value.as_int().ok_or_else(|| type_mismatch(field, value))?;
            if !int_in_width(field, v) {
                return Err(StoreError::Validation(format!(
                    "field '{}': value {v} out of range for {:?}",
                    field.name, field.kind
                )));
            }
            Ok(SqlValue::Integer(v))
        }
        FieldKind::Double => {
            let v = value.as_float().ok_or_else(|| type_mismatch(field, value))?;
            Ok(SqlValue::Real(v))
        }
        FieldKind::Bytes { size } if field.as_text => {
            let text = value.as_str().ok_or_else(|| type_mismatch(field, value))?;
            // text override: store trimmed at the first NUL
            let trimmed = text.split('\0').next().unwrap_or("");
            if trimmed.len() > *size {
                return Err(StoreError::Validation(format!(
                    "field '{}': {} bytes exceed declared width {size}",
                    field.name,
                    trimmed.len()
                )));
            }
            Ok(SqlValue::Text(trimmed.to_string()))
        }
        FieldKind::Bytes { size } => {
            let bytes = value.as_bytes().ok_or_else(|| type_mismatch(field, value))?;
            if bytes.len() > *size {
                return Err(StoreError::Validation(format!(
                    "field '{}': {} bytes exceed declared width {size}",
                    field.name,
                    bytes.len()
                )));
            }
            let mut buf = bytes.to_vec();
            buf.resize(*size, 0);
            Ok(SqlValue::Blob(buf))
        }
        FieldKind::ByteString => {
            let bytes = value.as_bytes().ok_or_else(|| type_mismatch(field, value))?;
            Ok(SqlValue::Blob(bytes.to_vec()))
        }
        FieldKind::Text => {
            let text = value.as_str().ok_or_else(|| type_mismatch(field, value))?;
            Ok(SqlValue::Text(text.to_string()))
        }
        FieldKind::Struct { .. } => Err(StoreError::Validation(format!(
            "field '{}': nested message has no scalar encoding",
            field.name
        ))),
    }
}

fn zero_scalar(field: &FieldDescriptor) -> SqlValue {
    match &field.kind {
        FieldKind::Int8
        | FieldKind::Int16
        | FieldKind::Int32
        | FieldKind::Int64
        | FieldKind::Uint8
        | FieldKind::Uint16
        | FieldKind::Uint32
        | FieldKind::Uint64 => SqlValue::Integer(0),
        FieldKind::Double => SqlValue::Real(0.0),
        FieldKind::Bytes { .. } if field.as_text => SqlValue::Text(String::new()),
        FieldKind::Bytes { size } => SqlValue::Blob(vec![0u8; *size]),
        FieldKind::ByteString => SqlValue::Blob(Vec::new()),
        FieldKind::Text => SqlValue::Text(String::new()),
        FieldKind::Struct { .. } => SqlValue::Null,
    }
}

fn decode_scalar(field: &FieldDescriptor, row: &Row<'_>, idx: usize) -> Result<Value, StoreError> {
    match &field.kind {
        FieldKind::Int8 | FieldKind::Int16 | FieldKind::Int32 | FieldKind::Int64 => {
            Ok(Value::Int(row.get(idx).map_err(map_sqlite_err)?))
        }
        FieldKind::Uint8 | FieldKind::Uint16 | FieldKind::Uint32 | FieldKind::Uint64 => {
            let v: i64 = row.get(idx).map_err(map_sqlite_err)?;
            Ok(Value::UInt(v as u64))
        }
        FieldKind::Double => Ok(Value::Float(row.get(idx).map_err(map_sqlite_err)?)),
        FieldKind::Bytes { .. } if field.as_text => {
            Ok(Value::Str(row.get(idx).map_err(map_sqlite_err)?))
        }
        FieldKind::Bytes { size } => {
            // restore the declared width; stored rows may predate a resize
            let mut bytes: Vec<u8> = row.get(idx).map_err(map_sqlite_err)?;
            bytes.resize(*size, 0);
            Ok(Value::Bytes(bytes))
        }
        FieldKind::ByteString => Ok(Value::Bytes(row.get(idx).map_err(map_sqlite_err)?)),
        FieldKind::Text => Ok(Value::Str(row.get(idx).map_err(map_sqlite_err)?)),
        FieldKind::Struct { .. } => Err(StoreError::Schema(format!(
            "field '{}': nested message has no scalar column",
            field.name
        ))),
    }
}

fn check_known_fields(
    message: &MessageDescriptor,
    fields: &[(String, Value)],
) -> Result<(), StoreError> {
    for (name, _) in fields {
        if message.field(name).is_none() {
            return Err(StoreError::Validation(format!(
                "message '{}' has no field '{name}'",
                message.name
            )));
        }
    }
    Ok(())
}

fn filter_path_valid(path: &str) -> bool {
    !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Coerce a textual filter value into the terminal field's storage type, so
/// comparisons happen on typed columns instead of text.
fn coerce_filter(field: &FieldDescriptor, raw: &str) -> Result<SqlValue, StoreError> {
    match &field.kind {
        kind if kind.is_integer() => raw
            .parse::<i64>()
            .map(SqlValue::Integer)
            .map_err(|_| StoreError::Config(format!("invalid integer filter value '{raw}'"))),
        FieldKind::Double => raw
            .parse::<f64>()
            .map(SqlValue::Real)
            .map_err(|_| StoreError::Config(format!("invalid float filter value '{raw}'"))),
        _ => Ok(SqlValue::Text(raw.to_string())),
    }
}

pub(crate) struct ColumnarCodec {
    seq_index: SeqIndex,
}

impl ColumnarCodec {
    pub(crate) fn new(seq_index: SeqIndex) -> Self {
        Self { seq_index }
    }
}

impl RowCodec for ColumnarCodec {
    fn plan_for(
        &self,
        _scheme: &Scheme,
        message: &MessageDescriptor,
    ) -> Result<TablePlan, StoreError> {
        columnar_plan(message, self.seq_index)
    }

    fn open_read_plan(
        &self,
        scheme: &Scheme,
        options: &OpenOptions,
    ) -> Result<Option<TablePlan>, StoreError> {
        if options.query.as_ref().is_some_and(|q| !q.is_empty()) {
            return Err(StoreError::Config(
                "query filters require the document layout".into(),
            ));
        }
        let Some(table) = &options.table else { return Ok(None) };
        if !options.dir.readable() {
            return Ok(None);
        }
        let message = scheme
            .messages
            .iter()
            .find(|m| m.table_name() == table || m.name == *table)
            .ok_or_else(|| {
                StoreError::Config(format!("table '{table}' does not match any message"))
            })?;
        columnar_plan(message, self.seq_index).map(Some)
    }

    fn encode(
        &self,
        scheme: &Scheme,
        plan: &TablePlan,
        frame: &DataFrame,
    ) -> Result<Vec<SqlValue>, StoreError> {
        let message = scheme
            .message_by_name(&plan.message)
            .ok_or_else(|| StoreError::Schema(format!("plan for unknown message '{}'", plan.message)))?;
        check_known_fields(message, &frame.fields)?;

        let mut values = Vec::with_capacity(plan.columns.len());
        for column in &plan.columns {
            match &column.role {
                ColumnRole::Seq => values.push(SqlValue::Integer(frame.seq)),
                ColumnRole::Field(name) => {
                    let field = message.field(name).ok_or_else(|| {
                        StoreError::Schema(format!(
                            "plan column '{name}' missing from message '{}'",
                            message.name
                        ))
                    })?;
                    values.push(encode_scalar(field, frame.get(name))?);
                }
                other => {
                    return Err(StoreError::Schema(format!(
                        "unexpected column role {other:?} in columnar plan"
                    )));
                }
            }
        }
        Ok(values)
    }

    fn decode(
        &self,
        scheme: &Scheme,
        plan: &TablePlan,
        row: &Row<'_>,
    ) -> Result<DataFrame, StoreError> {
        let message = scheme
            .message_by_name(&plan.message)
            .ok_or_else(|| StoreError::Schema(format!("plan for unknown message '{}'", plan.message)))?;

        let mut frame = DataFrame::new(plan.msg_id);
        frame.seq = row.get(1).map_err(map_sqlite_err)?;
        for (i, column) in plan.columns.iter().enumerate().skip(1) {
            let ColumnRole::Field(name) = &column.role else { continue };
            let field = message.field(name).ok_or_else(|| {
                StoreError::Schema(format!(
                    "plan column '{name}' missing from message '{}'",
                    message.name
                ))
            })?;
            frame.fields.push((name.clone(), decode_scalar(field, row, i + 1)?));
        }
        Ok(frame)
    }

    fn build_select(
        &self,
        _scheme: &Scheme,
        plan: &TablePlan,
        query: Option<&QuerySpec>,
    ) -> Result<(String, Vec<SqlValue>), StoreError> {
        if query.is_some_and(|q| !q.is_empty()) {
            return Err(StoreError::Config(
                "query filters require the document layout".into(),
            ));
        }
        let columns: Vec<String> = plan.columns.iter().map(|c| ident(&c.name)).collect();
        let sql = format!(
            "SELECT rowid, {} FROM {} WHERE rowid > ?1 ORDER BY rowid LIMIT 1",
            columns.join(", "),
            ident(&plan.table)
        );
        Ok((sql, Vec::new()))
    }
}

pub(crate) struct DocumentCodec {
    table: String,
    seq_index: SeqIndex,
}

impl DocumentCodec {
    pub(crate) fn new(table: impl Into<String>, seq_index: SeqIndex) -> Self {
        Self { table: table.into(), seq_index }
    }
}

impl RowCodec for DocumentCodec {
    fn plan_for(
        &self,
        scheme: &Scheme,
        message: &MessageDescriptor,
    ) -> Result<TablePlan, StoreError> {
        if message.id == 0 {
            return Err(StoreError::Schema(format!(
                "message '{}' is embedded-only and cannot be posted",
                message.name
            )));
        }
        document_plan(scheme, Some(message), &self.table, self.seq_index)
    }

    fn open_read_plan(
        &self,
        scheme: &Scheme,
        options: &OpenOptions,
    ) -> Result<Option<TablePlan>, StoreError> {
        if !options.dir.readable() {
            return Ok(None);
        }
        document_plan(scheme, None, &self.table, self.seq_index).map(Some)
    }

    fn encode(
        &self,
        scheme: &Scheme,
        plan: &TablePlan,
        frame: &DataFrame,
    ) -> Result<Vec<SqlValue>, StoreError> {
        let message = scheme
            .message_by_name(&plan.message)
            .ok_or_else(|| StoreError::Schema(format!("plan for unknown message '{}'", plan.message)))?;
        let doc = document_json(scheme, message, &frame.fields)?;
        let json = serde_json::to_string(&doc)
            .map_err(|e| StoreError::Storage(format!("document serialization: {e}")))?;

        let mut values = Vec::with_capacity(plan.columns.len());
        for column in &plan.columns {
            match &column.role {
                ColumnRole::Seq => values.push(SqlValue::Integer(frame.seq)),
                ColumnRole::MessageName => values.push(SqlValue::Text(message.name.clone())),
                ColumnRole::Document => values.push(SqlValue::Text(json.clone())),
                ColumnRole::Key { message: owner } if owner == &message.name => {
                    values.push(key_scalar(scheme, message, frame)?);
                }
                ColumnRole::Key { .. } => values.push(SqlValue::Null),
                other => {
                    return Err(StoreError::Schema(format!(
                        "unexpected column role {other:?} in document plan"
                    )));
                }
            }
        }
        Ok(values)
    }

    fn decode(
        &self,
        scheme: &Scheme,
        _plan: &TablePlan,
        row: &Row<'_>,
    ) -> Result<DataFrame, StoreError> {
        let seq: i64 = row.get(1).map_err(map_sqlite_err)?;
        let name: String = row.get(2).map_err(map_sqlite_err)?;
        let raw: String = row.get(3).map_err(map_sqlite_err)?;

        let message = scheme.message_by_name(&name).ok_or_else(|| {
            StoreError::Validation(format!("stored row references unknown message '{name}'"))
        })?;
        let doc: serde_json::Value = serde_json::from_str(&raw).map_err(|e| {
            StoreError::Validation(format!("message '{name}': malformed document: {e}"))
        })?;
        let fields = fields_from_json(scheme, message, &doc)?;
        Ok(DataFrame { msg_id: message.id, seq, fields })
    }

    fn build_select(
        &self,
        scheme: &Scheme,
        plan: &TablePlan,
        query: Option<&QuerySpec>,
    ) -> Result<(String, Vec<SqlValue>), StoreError> {
        let mut sql = format!(
            "SELECT rowid, {}, \"name\", \"data\" FROM {} WHERE rowid > ?1",
            ident(plan::SEQ_COLUMN),
            ident(&plan.table)
        );
        let mut params = Vec::new();
        let mut idx = 1usize;

        // a cursor retargeted at one message type overrides the open query's
        // type selector; filters still apply
        let selected = if plan.message.is_empty() {
            query.and_then(|q| q.message.as_deref())
        } else {
            Some(plan.message.as_str())
        };
        let message = match selected {
            Some(name) => Some(scheme.message_by_name(name).ok_or_else(|| {
                StoreError::Validation(format!("query for message '{name}' not in scheme"))
            })?),
            None => None,
        };
        if let Some(message) = message {
            idx += 1;
            sql.push_str(&format!(" AND \"name\" = ?{idx}"));
            params.push(SqlValue::Text(message.name.clone()));
        }

        if let Some(query) = query {
            for (path, raw) in &query.filters {
                if !filter_path_valid(path) {
                    return Err(StoreError::Config(format!("invalid filter path '{path}'")));
                }
                idx += 1;
                match message {
                    Some(message) => {
                        let field = scheme
                            .resolve_key_path(message, path)
                            .map_err(|e| e.with_context(format!("query filter '{path}'")))?;
                        if message.key.as_deref() == Some(path.as_str()) {
                            sql.push_str(&format!(
                                " AND {} = ?{idx}",
                                ident(&key_column(&message.name))
                            ));
                        } else {
                            sql.push_str(&format!(
                                " AND json_extract(\"data\", '$.{path}') = ?{idx}"
                            ));
                        }
                        params.push(coerce_filter(field, raw)?);
                    }
                    None => {
                        warn!(filter = %path, "query filter without message type, comparing as text");
                        sql.push_str(&format!(
                            " AND json_extract(\"data\", '$.{path}') = ?{idx}"
                        ));
                        params.push(SqlValue::Text(raw.clone()));
                    }
                }
            }
        }

        sql.push_str(" ORDER BY rowid LIMIT 1");
        Ok((sql, params))
    }
}

/// Serialize one message level: every declared field present, omitted
/// fields as their zero values, nested messages recursing.
fn document_json(
    scheme: &Scheme,
    message: &MessageDescriptor,
    fields: &[(String, Value)],
) -> Result<serde_json::Value, StoreError> {
    check_known_fields(message, fields)?;
    let mut map = serde_json::Map::with_capacity(message.fields.len());
    for field in &message.fields {
        let provided = fields.iter().find(|(k, _)| k == &field.name).map(|(_, v)| v);
        map.insert(field.name.clone(), json_field(scheme, field, provided)?);
    }
    Ok(serde_json::Value::Object(map))
}

fn json_field(
    scheme: &Scheme,
    field: &FieldDescriptor,
    value: Option<&Value>,
) -> Result<serde_json::Value, StoreError> {
    if let FieldKind::Struct { message } = &field.kind {
        let nested = scheme.message_by_name(message).ok_or_else(|| {
            StoreError::Schema(format!(
                "field '{}' references unknown message '{message}'",
                field.name
            ))
        })?;
        let empty: &[(String, Value)] = &[];
        let fields = match value {
            None => empty,
            Some(Value::Struct(fields)) => fields.as_slice(),
            Some(other) => return Err(type_mismatch(field, other)),
        };
        return document_json(scheme, nested, fields)
            .map_err(|e| e.with_context(format!("field '{}'", field.name)));
    }
    sql_to_json(encode_scalar(field, value)?)
}

/// Binary columns have no direct JSON form; blobs travel base64-encoded.
fn sql_to_json(value: SqlValue) -> Result<serde_json::Value, StoreError> {
    Ok(match value {
        SqlValue::Null => serde_json::Value::Null,
        SqlValue::Integer(v) => serde_json::Value::from(v),
        SqlValue::Real(v) => serde_json::Value::from(v),
        SqlValue::Text(v) => serde_json::Value::from(v),
        SqlValue::Blob(v) => serde_json::Value::from(BASE64.encode(v)),
    })
}

fn fields_from_json(
    scheme: &Scheme,
    message: &MessageDescriptor,
    doc: &serde_json::Value,
) -> Result<Vec<(String, Value)>, StoreError> {
    let object = doc.as_object().ok_or_else(|| {
        StoreError::Validation(format!("message '{}': document is not an object", message.name))
    })?;
    message
        .fields
        .iter()
        .map(|field| {
            let value = value_from_json(scheme, field, object.get(&field.name))
                .map_err(|e| e.with_context(format!("field '{}'", field.name)))?;
            Ok((field.name.clone(), value))
        })
        .collect()
}

fn value_from_json(
    scheme: &Scheme,
    field: &FieldDescriptor,
    value: Option<&serde_json::Value>,
) -> Result<Value, StoreError> {
    let Some(value) = value else { return Ok(Value::zero_of(&field.kind)) };
    let bad = || StoreError::Validation(format!("unexpected json value for {:?}", field.kind));
    match &field.kind {
        FieldKind::Int8 | FieldKind::Int16 | FieldKind::Int32 | FieldKind::Int64 => {
            value.as_i64().map(Value::Int).ok_or_else(bad)
        }
        FieldKind::Uint8 | FieldKind::Uint16 | FieldKind::Uint32 | FieldKind::Uint64 => {
            value.as_u64().map(Value::UInt).ok_or_else(bad)
        }
        FieldKind::Double => value.as_f64().map(Value::Float).ok_or_else(bad),
        FieldKind::Bytes { .. } if field.as_text => {
            value.as_str().map(|s| Value::Str(s.to_string())).ok_or_else(bad)
        }
        FieldKind::Bytes { size } => {
            let encoded = value.as_str().ok_or_else(bad)?;
            let mut bytes = BASE64.decode(encoded).map_err(|_| bad())?;
            bytes.resize(*size, 0);
            Ok(Value::Bytes(bytes))
        }
        FieldKind::ByteString => {
            let encoded = value.as_str().ok_or_else(bad)?;
            let bytes = BASE64.decode(encoded).map_err(|_| bad())?;
            Ok(Value::Bytes(bytes))
        }
        FieldKind::Text => value.as_str().map(|s| Value::Str(s.to_string())).ok_or_else(bad),
        FieldKind::Struct { message } => {
            let nested = scheme.message_by_name(message).ok_or_else(|| {
                StoreError::Schema(format!(
                    "field '{}' references unknown message '{message}'",
                    field.name
                ))
            })?;
            Ok(Value::Struct(fields_from_json(scheme, nested, value)?))
        }
    }
}

/// Extract the declared key path value from a posted frame. Absent segments
/// project as NULL so unkeyed writes never collide on the key index.
fn key_scalar(
    scheme: &Scheme,
    message: &MessageDescriptor,
    frame: &DataFrame,
) -> Result<SqlValue, StoreError> {
    let Some(path) = &message.key else { return Ok(SqlValue::Null) };
    let field = scheme.resolve_key_path(message, path)?;

    let mut segments = path.split('.');
    let mut current = segments.next().and_then(|first| frame.get(first));
    for segment in segments {
        current = current.and_then(|v| v.get(segment));
    }
    match current {
        None => Ok(SqlValue::Null),
        Some(value) => encode_scalar(field, Some(value)),
    }
}
