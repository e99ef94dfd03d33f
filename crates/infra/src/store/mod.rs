//! Relational store boundary.
//!
//! The ledger addresses arbitrary business tables (dependency discovery,
//! cascade and bulk deletes, row corrections), so the boundary is row-shaped
//! rather than one repository per entity: rows are JSON objects, filters are
//! equality conjunctions, identifiers are validated [`Identifier`]s.
//!
//! [`Identifier`]: shopledger_core::Identifier

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemoryStore, InMemoryStoreBuilder};
pub use postgres::PostgresStore;
pub use r#trait::{ColumnDef, Filter, ForeignKey, Row, Store, StoreError, StoreTx, value_text};

use serde_json::Value as JsonValue;

/// Typed accessors for loosely-typed rows.
pub trait RowExt {
    fn text(&self, column: &str) -> Option<String>;
    fn int(&self, column: &str) -> Option<i64>;
}

impl RowExt for Row {
    fn text(&self, column: &str) -> Option<String> {
        self.get(column).and_then(value_text)
    }

    fn int(&self, column: &str) -> Option<i64> {
        match self.get(column)? {
            JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            JsonValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// Commit `tx` when `result` is `Ok`, roll it back otherwise.
///
/// A failed rollback is only logged; the original error is what the caller
/// needs to see.
pub async fn settle<T, E>(tx: Box<dyn StoreTx>, result: Result<T, E>) -> Result<T, E>
where
    E: From<StoreError>,
{
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(error = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}
