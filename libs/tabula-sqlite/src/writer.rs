//! Write pipeline: prepared inserts batched into explicit transactions.
//!
//! The batch counter is global to the store handle, not per table: rows of
//! different message types share one transaction and commit together once
//! `bulk_size` rows accumulate. A rejected row never tears down the open
//! batch, and a single row is all-or-nothing by statement atomicity.

use rusqlite::{Connection, params_from_iter};
use rusqlite::types::Value as SqlValue;
use tabula_api::StoreError;
use tracing::{debug, trace};

use crate::map_sqlite_err;
use crate::plan::TablePlan;
use crate::schema::ident;

pub(crate) struct WritePipeline {
    replace: bool,
    bulk_size: usize,
    pending: usize,
    in_txn: bool,
}

impl WritePipeline {
    pub(crate) fn new(replace: bool, bulk_size: usize) -> Self {
        Self { replace, bulk_size, pending: 0, in_txn: false }
    }

    /// Append one encoded row to the current batch, opening a transaction
    /// when none is active and committing once the batch fills.
    pub(crate) fn append(
        &mut self,
        conn: &Connection,
        plan: &TablePlan,
        values: Vec<SqlValue>,
    ) -> Result<(), StoreError> {
        if !self.in_txn {
            conn.execute_batch("BEGIN").map_err(map_sqlite_err)?;
            self.in_txn = true;
        }

        let sql = insert_sql(plan, self.replace);
        let mut stmt = conn.prepare_cached(&sql).map_err(map_sqlite_err)?;
        stmt.execute(params_from_iter(values)).map_err(map_sqlite_err)?;
        trace!(table = %plan.table, "row appended");

        self.pending += 1;
        if self.pending >= self.bulk_size {
            self.flush(conn)?;
        }
        Ok(())
    }

    /// Commit the open batch, making its rows visible to readers.
    pub(crate) fn flush(&mut self, conn: &Connection) -> Result<(), StoreError> {
        if !self.in_txn {
            return Ok(());
        }
        conn.execute_batch("COMMIT").map_err(map_sqlite_err)?;
        debug!(rows = self.pending, "batch committed");
        self.pending = 0;
        self.in_txn = false;
        Ok(())
    }
}

fn insert_sql(plan: &TablePlan, replace: bool) -> String {
    let columns: Vec<String> = plan.columns.iter().map(|c| ident(&c.name)).collect();
    let placeholders: Vec<String> = (1..=plan.columns.len()).map(|i| format!("?{i}")).collect();
    let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };
    format!(
        "{verb} INTO {} ({}) VALUES ({})",
        ident(&plan.table),
        columns.join(", "),
        placeholders.join(", ")
    )
}
