use crate::value::Value;

/// One data message posted to or replayed from the store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataFrame {
    /// Message type id — resolves the destination table through the scheme.
    pub msg_id: i32,
    /// Producer sequence number; defaults to 0 when none is supplied.
    pub seq: i64,
    /// Field values in no particular order; omitted fields persist as the
    /// kind's zero value.
    pub fields: Vec<(String, Value)>,
}

impl DataFrame {
    pub fn new(msg_id: i32) -> Self {
        Self { msg_id, seq: 0, fields: Vec::new() }
    }

    pub fn with_seq(mut self, seq: i64) -> Self {
        self.seq = seq;
        self
    }

    pub fn set(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.push((name.into(), value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

/// In-band control directive, multiplexed with data on the same stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Redirect the active read cursor to the table of message type
    /// `msg_id`, resolved exactly as a data message of that type would be.
    /// Writes are unaffected: the write target is always derived from the
    /// posted message's own type.
    TableName { msg_id: i32 },
    /// Replay cursor exhausted. Emitted exactly once per cursor, never
    /// accepted on the write path.
    DataEnd,
}

/// Entry on the multiplexed stream. Consumers distinguish data from control
/// by this tag, never by content inspection.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Data(DataFrame),
    Control(Directive),
}

impl Frame {
    pub fn as_data(&self) -> Option<&DataFrame> {
        match self {
            Frame::Data(d) => Some(d),
            Frame::Control(_) => None,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Frame::Control(_))
    }
}
