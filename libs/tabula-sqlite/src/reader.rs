//! Read pipeline: incremental replay over a dedicated read-only connection.
//!
//! Each poll fetches at most one row past the rowid watermark, so a replay
//! session observes rows committed after it started without re-reading what
//! it already delivered. The separate connection keeps the writer's open
//! batch invisible until commit.

use std::path::Path;

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags, params_from_iter};
use tabula_api::{Directive, Frame, Scheme, StoreError};
use tracing::debug;

use crate::codec::RowCodec;
use crate::map_sqlite_err;
use crate::plan::TablePlan;

/// Active replay target: the statement, its bound predicate values and the
/// rowid of the last delivered row.
pub(crate) struct ReplayCursor {
    pub(crate) plan: TablePlan,
    pub(crate) select_sql: String,
    pub(crate) params: Vec<SqlValue>,
    pub(crate) last_rowid: i64,
}

enum ReadState {
    /// No table selected; polls produce nothing.
    Idle,
    Streaming(ReplayCursor),
    /// End-of-data already delivered; further polls produce nothing.
    Exhausted,
}

pub(crate) struct ReadSession {
    conn: Connection,
    state: ReadState,
}

impl ReadSession {
    pub(crate) fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(map_sqlite_err)?;
        conn.busy_timeout(std::time::Duration::from_millis(5_000))
            .map_err(map_sqlite_err)?;
        Ok(Self { conn, state: ReadState::Idle })
    }

    /// Point the session at a new target. Resets the watermark: a redirect
    /// replays the new table from its beginning, even mid-stream or after
    /// exhaustion.
    pub(crate) fn select(&mut self, cursor: ReplayCursor) {
        debug!(table = %cursor.plan.table, "replay cursor selected");
        self.state = ReadState::Streaming(cursor);
    }

    /// Fetch the next entry: a data frame while rows remain, the
    /// end-of-data directive exactly once, then nothing.
    pub(crate) fn poll(
        &mut self,
        codec: &dyn RowCodec,
        scheme: &Scheme,
    ) -> Result<Option<Frame>, StoreError> {
        let ReadState::Streaming(cursor) = &mut self.state else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare_cached(&cursor.select_sql).map_err(map_sqlite_err)?;
        let mut bound = Vec::with_capacity(cursor.params.len() + 1);
        bound.push(SqlValue::Integer(cursor.last_rowid));
        bound.extend(cursor.params.iter().cloned());

        let mut rows = stmt.query(params_from_iter(bound)).map_err(map_sqlite_err)?;
        match rows.next().map_err(map_sqlite_err)? {
            Some(row) => {
                let rowid: i64 = row.get(0).map_err(map_sqlite_err)?;
                let frame = codec.decode(scheme, &cursor.plan, row)?;
                cursor.last_rowid = rowid;
                Ok(Some(Frame::Data(frame)))
            }
            None => {
                debug!(table = %cursor.plan.table, last_rowid = cursor.last_rowid, "replay exhausted");
                self.state = ReadState::Exhausted;
                Ok(Some(Frame::Control(Directive::DataEnd)))
            }
        }
    }
}
