use crate::scheme::FieldKind;

/// Canonical owned value representation for message fields.
///
/// Scalars are eager; `Struct` carries its fields in declaration order so
/// nested messages round-trip without a separate descriptor lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Variable-length text, or a fixed byte field with the text override.
    Str(String),
    /// Fixed or variable-length binary data.
    Bytes(Vec<u8>),
    /// Nested message, fields in declaration order.
    Struct(Vec<(String, Value)>),
}

impl Value {
    /// Zero value for a field kind — what an omitted field encodes as.
    pub fn zero_of(kind: &FieldKind) -> Value {
        match kind {
            FieldKind::Int8 | FieldKind::Int16 | FieldKind::Int32 | FieldKind::Int64 => {
                Value::Int(0)
            }
            FieldKind::Uint8 | FieldKind::Uint16 | FieldKind::Uint32 | FieldKind::Uint64 => {
                Value::UInt(0)
            }
            FieldKind::Double => Value::Float(0.0),
            FieldKind::Bytes { size } => Value::Bytes(vec![0u8; *size]),
            FieldKind::ByteString => Value::Bytes(Vec::new()),
            FieldKind::Text => Value::Str(String::new()),
            FieldKind::Struct { .. } => Value::Struct(Vec::new()),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Field lookup for `Struct` values.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }
}
