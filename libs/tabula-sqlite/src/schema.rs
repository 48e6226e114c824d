//! Schema resolution: materialize a table plan in the database, or verify
//! that an existing table is compatible with it.

use rusqlite::{Connection, OptionalExtension};
use tabula_api::StoreError;
use tracing::{debug, info};

use crate::map_sqlite_err;
use crate::plan::{IndexPlan, TablePlan};

/// Quote an identifier for embedding in DDL/DML text.
pub(crate) fn ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Idempotent: creates the table and its indexes when missing, otherwise
/// verifies the existing column set matches the plan. Safe to call on every
/// open and on every lazy plan resolution.
pub(crate) fn ensure(conn: &Connection, plan: &TablePlan) -> Result<(), StoreError> {
    if table_exists(conn, &plan.table)? {
        verify_compatible(conn, plan)?;
        debug!(table = %plan.table, "table exists, plan compatible");
        return Ok(());
    }

    create_table(conn, plan)?;
    for index in &plan.indexes {
        create_index(conn, &plan.table, index)?;
    }
    info!(table = %plan.table, columns = plan.columns.len(), "created table");
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, StoreError> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_sqlite_err)?;
    Ok(found.is_some())
}

fn create_table(conn: &Connection, plan: &TablePlan) -> Result<(), StoreError> {
    let mut defs = Vec::with_capacity(plan.columns.len());
    for column in &plan.columns {
        let mut def = format!("{} {}", ident(&column.name), column.sql_type);
        if column.not_null {
            def.push_str(" NOT NULL");
        }
        if column.primary_key {
            def.push_str(" PRIMARY KEY");
        }
        defs.push(def);
    }
    let sql = format!("CREATE TABLE {} ({})", ident(&plan.table), defs.join(", "));
    conn.execute(&sql, []).map_err(map_sqlite_err)?;
    Ok(())
}

fn create_index(conn: &Connection, table: &str, index: &IndexPlan) -> Result<(), StoreError> {
    let unique = if index.unique { "UNIQUE " } else { "" };
    let name = format!("idx_{table}_{}", index.column);
    let mut sql = format!(
        "CREATE {unique}INDEX {} ON {} ({})",
        ident(&name),
        ident(table),
        ident(&index.column)
    );
    if let Some(message) = &index.only_message {
        sql.push_str(&format!(" WHERE \"name\" = {}", string_literal(message)));
    }
    conn.execute(&sql, []).map_err(map_sqlite_err)?;
    debug!(index = %name, unique = index.unique, "created index");
    Ok(())
}

/// The compatibility contract is column names in persisted order; SQLite's
/// dynamic typing makes declared affinities advisory, so they are not
/// compared.
fn verify_compatible(conn: &Connection, plan: &TablePlan) -> Result<(), StoreError> {
    let sql = format!("PRAGMA table_info({})", ident(&plan.table));
    let mut stmt = conn.prepare(&sql).map_err(map_sqlite_err)?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(map_sqlite_err)?
        .collect::<Result<_, _>>()
        .map_err(map_sqlite_err)?;

    let expected: Vec<&str> = plan.column_names().collect();
    if existing.len() != expected.len()
        || existing.iter().zip(&expected).any(|(have, want)| have != want)
    {
        return Err(StoreError::SchemaMismatch(format!(
            "table '{}' has columns [{}], plan expects [{}]",
            plan.table,
            existing.join(", "),
            expected.join(", ")
        )));
    }
    Ok(())
}
