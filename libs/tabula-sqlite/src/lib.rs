//! SQLite storage adapter for scheme-described message streams.
//!
//! Messages are posted as typed frames, resolved through the scheme into
//! table plans and written in batched transactions; replay walks committed
//! rows incrementally and closes each cursor with an end-of-data directive.
//! Two row layouts are available: columnar (one table per message type) and
//! document (one shared table of serialized messages with projected key
//! columns).

pub mod plan;
pub mod store;

mod codec;
mod reader;
mod schema;
mod writer;

pub use store::{CodecStrategy, SqliteStore};

use tabula_api::StoreError;

/// Engine errors fold into the adapter taxonomy here; uniqueness and
/// primary-key collisions surface as their own recoverable variant.
pub(crate) fn map_sqlite_err(e: rusqlite::Error) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(failure, message)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::ConstraintViolation(
                message.clone().unwrap_or_else(|| failure.to_string()),
            )
        }
        _ => StoreError::Storage(e.to_string()),
    }
}
