//! The store handle: one writable connection, a lazy plan cache, the write
//! pipeline and an optional replay session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use tabula_api::{DataFrame, Directive, Frame, OpenOptions, Scheme, StoreError};
use tracing::{error, info};

use crate::codec::{ColumnarCodec, DocumentCodec, RowCodec};
use crate::map_sqlite_err;
use crate::plan::TablePlan;
use crate::reader::{ReadSession, ReplayCursor};
use crate::schema;
use crate::writer::WritePipeline;

/// Row layout selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecStrategy {
    /// One table per message type, one scalar column per field.
    Columnar,
    /// One shared table of serialized documents with projected key columns.
    Document,
}

pub struct SqliteStore {
    path: PathBuf,
    conn: Connection,
    scheme: Arc<Scheme>,
    options: OpenOptions,
    codec: Box<dyn RowCodec>,
    plans: HashMap<i32, Arc<TablePlan>>,
    writer: WritePipeline,
    reader: Option<ReadSession>,
    finished: bool,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open a store backed by the database at `path`. Missing tables are
    /// created lazily as message types are first posted; existing tables
    /// are verified against their plans.
    pub fn open(
        path: impl AsRef<Path>,
        scheme: Scheme,
        strategy: CodecStrategy,
        options: OpenOptions,
    ) -> Result<Self, StoreError> {
        options.validate()?;
        scheme.validate()?;

        let codec: Box<dyn RowCodec> = match strategy {
            CodecStrategy::Columnar => Box::new(ColumnarCodec::new(options.seq_index)),
            CodecStrategy::Document => {
                let table = options.table.as_deref().ok_or_else(|| {
                    StoreError::Config("document layout requires the table option".into())
                })?;
                Box::new(DocumentCodec::new(table, options.seq_index))
            }
        };

        let conn = open_connection(path.as_ref())?;
        let mut store = Self {
            path: path.as_ref().to_path_buf(),
            conn,
            scheme: Arc::new(scheme),
            writer: WritePipeline::new(options.replace, options.bulk_size),
            options,
            codec,
            plans: HashMap::new(),
            reader: None,
            finished: false,
        };

        if let Some(plan) = store.codec.open_read_plan(&store.scheme, &store.options)? {
            schema::ensure(&store.conn, &plan)?;
            let (select_sql, params) =
                store.codec.build_select(&store.scheme, &plan, store.options.query.as_ref())?;
            let mut session = ReadSession::open(&store.path)?;
            session.select(ReplayCursor { plan, select_sql, params, last_rowid: 0 });
            store.reader = Some(session);
        }

        info!(path = %store.path.display(), ?strategy, "store opened");
        Ok(store)
    }

    pub fn open_columnar(
        path: impl AsRef<Path>,
        scheme: Scheme,
        options: OpenOptions,
    ) -> Result<Self, StoreError> {
        Self::open(path, scheme, CodecStrategy::Columnar, options)
    }

    pub fn open_document(
        path: impl AsRef<Path>,
        scheme: Scheme,
        options: OpenOptions,
    ) -> Result<Self, StoreError> {
        Self::open(path, scheme, CodecStrategy::Document, options)
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// Post one entry to the stream: data frames are written, the
    /// table-name directive retargets the replay cursor, and end-of-data is
    /// read-side only.
    pub fn post(&mut self, frame: &Frame) -> Result<(), StoreError> {
        match frame {
            Frame::Data(data) => self.post_data(data),
            Frame::Control(Directive::TableName { msg_id }) => self.select_read_target(*msg_id),
            Frame::Control(Directive::DataEnd) => Err(StoreError::Validation(
                "end-of-data is emitted by the store, never posted to it".into(),
            )),
        }
    }

    fn post_data(&mut self, data: &DataFrame) -> Result<(), StoreError> {
        if !self.options.dir.writable() {
            return Err(StoreError::Validation("store is not open for writing".into()));
        }
        if data.msg_id == 0 {
            return Err(StoreError::Validation(
                "message id 0 is reserved for embedded-only types".into(),
            ));
        }
        let plan = self.plan_for(data.msg_id)?;
        let values = self.codec.encode(&self.scheme, &plan, data)?;
        self.writer.append(&self.conn, &plan, values)
    }

    /// Retrieve the next replay entry, if any. Returns data frames while
    /// rows remain, then the end-of-data directive once, then `None`.
    pub fn process(&mut self) -> Result<Option<Frame>, StoreError> {
        let Some(reader) = self.reader.as_mut() else { return Ok(None) };
        reader.poll(self.codec.as_ref(), &self.scheme)
    }

    /// Commit the open batch immediately, regardless of fill level.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.writer.flush(&self.conn)
    }

    /// Flush and consume the handle. Prefer this over relying on drop: the
    /// final commit can fail and drop can only log it.
    pub fn close(mut self) -> Result<(), StoreError> {
        self.finished = true;
        self.writer.flush(&self.conn)
    }

    fn plan_for(&mut self, msg_id: i32) -> Result<Arc<TablePlan>, StoreError> {
        if let Some(plan) = self.plans.get(&msg_id) {
            return Ok(plan.clone());
        }
        let message = self
            .scheme
            .message_by_id(msg_id)
            .ok_or_else(|| StoreError::Validation(format!("unknown message id {msg_id}")))?;
        let plan = Arc::new(self.codec.plan_for(&self.scheme, message)?);
        schema::ensure(&self.conn, &plan)?;
        self.plans.insert(msg_id, plan.clone());
        Ok(plan)
    }

    fn select_read_target(&mut self, msg_id: i32) -> Result<(), StoreError> {
        if !self.options.dir.readable() {
            return Err(StoreError::Validation("store is not open for reading".into()));
        }
        let plan = self.plan_for(msg_id)?;
        let (select_sql, params) =
            self.codec.build_select(&self.scheme, &plan, self.options.query.as_ref())?;

        if self.reader.is_none() {
            self.reader = Some(ReadSession::open(&self.path)?);
        }
        let reader = self.reader.as_mut().ok_or_else(|| {
            StoreError::Storage("read session unavailable".into())
        })?;
        reader.select(ReplayCursor {
            plan: (*plan).clone(),
            select_sql,
            params,
            last_rowid: 0,
        });
        Ok(())
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.writer.flush(&self.conn) {
            error!(error = %e, "final batch commit failed on drop");
        }
    }
}

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path).map_err(map_sqlite_err)?;
    conn.busy_timeout(std::time::Duration::from_millis(5_000))
        .map_err(map_sqlite_err)?;
    // write-ahead journal lets the replay session read committed rows while
    // a batch transaction is open on this connection
    let _mode: String = conn
        .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
        .map_err(map_sqlite_err)?;
    Ok(conn)
}
