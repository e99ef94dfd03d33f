use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use shopledger_core::Identifier;

/// A row as a column → value object.
pub type Row = Map<String, JsonValue>;

/// Equality-only row filter (conjunction of `column = value`).
///
/// `NULL` values match with `IS NULL`. Values are compared by their text
/// rendering, the same way Postgres compares `column::text = $n`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(Identifier, JsonValue)>,
}

impl Filter {
    /// Matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(column: Identifier, value: impl Into<JsonValue>) -> Self {
        Self::all().and(column, value)
    }

    pub fn and(mut self, column: Identifier, value: impl Into<JsonValue>) -> Self {
        self.conditions.push((column, value.into()));
        self
    }

    pub fn conditions(&self) -> &[(Identifier, JsonValue)] {
        &self.conditions
    }

    pub fn is_unscoped(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|(column, expected)| {
            let actual = row.get(column.as_str()).unwrap_or(&JsonValue::Null);
            match (value_text(expected), value_text(actual)) {
                (None, None) => true,
                (Some(e), Some(a)) => e == a,
                _ => false,
            }
        })
    }
}

/// Text rendering of a scalar, `None` for `NULL`.
pub fn value_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// A declared foreign key `table.column → referenced_table.referenced_column`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub constraint: Option<String>,
    pub table: Identifier,
    pub column: Identifier,
    pub referenced_table: Identifier,
    pub referenced_column: Identifier,
}

/// Column definition for tables the ledger owns and creates on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub sql_type: &'static str,
}

/// Relational store operation error.
///
/// These are **store errors** (constraints, catalog, connectivity) as opposed
/// to domain errors (validation, invariants).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("referential integrity violation: {message}")]
    ReferentialIntegrity {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown column: {table}.{column}")]
    UnknownColumn { table: String, column: String },

    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("store failure: {0}")]
    Backend(String),
}

/// The relational store the ledger runs on.
///
/// Autocommit reads and the catalog live here; every multi-statement mutation
/// goes through a [`StoreTx`] obtained from [`Store::begin`].
///
/// ## Implementation Requirements
///
/// - transactions run at READ COMMITTED or stronger
/// - identifiers reach SQL quoted, values reach SQL as bound parameters
/// - deleting a referenced row fails with `StoreError::ReferentialIntegrity`
///   (no implicit cascades)
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    async fn tables(&self) -> Result<Vec<Identifier>, StoreError>;

    async fn columns(&self, table: &Identifier) -> Result<Vec<Identifier>, StoreError>;

    /// Foreign keys declared on other tables that reference `table`.
    async fn foreign_keys_to(&self, table: &Identifier) -> Result<Vec<ForeignKey>, StoreError>;

    async fn select(
        &self,
        table: &Identifier,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<Row>, StoreError>;

    async fn count(&self, table: &Identifier, filter: &Filter) -> Result<u64, StoreError>;

    /// Autocommit insert; returns the stored row (with generated columns).
    async fn insert(&self, table: &Identifier, row: Row) -> Result<Row, StoreError>;

    /// Create `table` if it does not exist yet.
    async fn ensure_table(&self, table: &Identifier, columns: &[ColumnDef]) -> Result<(), StoreError>;
}

/// An open transaction. Dropping it without `commit` discards its writes.
#[async_trait]
pub trait StoreTx: Send {
    async fn select(
        &mut self,
        table: &Identifier,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<Row>, StoreError>;

    /// Like `select`, but locks the matched rows until the transaction ends.
    async fn select_for_update(&mut self, table: &Identifier, filter: &Filter) -> Result<Vec<Row>, StoreError>;

    async fn insert(&mut self, table: &Identifier, row: Row) -> Result<Row, StoreError>;

    /// Set `values` on every matched row; returns the number of rows affected.
    async fn update(&mut self, table: &Identifier, filter: &Filter, values: &Row) -> Result<u64, StoreError>;

    /// Delete every matched row; returns the number of rows affected.
    async fn delete(&mut self, table: &Identifier, filter: &Filter) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ident(s: &str) -> Identifier {
        Identifier::parse(s).unwrap()
    }

    fn row(value: JsonValue) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn filter_compares_text_renderings() {
        let r = row(json!({"id": "7", "qty": 7, "active": true, "note": null}));

        assert!(Filter::eq(ident("id"), 7).matches(&r));
        assert!(Filter::eq(ident("qty"), "7").matches(&r));
        assert!(Filter::eq(ident("active"), "true").matches(&r));
        assert!(!Filter::eq(ident("qty"), 8).matches(&r));
    }

    #[test]
    fn filter_null_matches_only_null_or_missing() {
        let r = row(json!({"note": null, "qty": 0}));

        assert!(Filter::eq(ident("note"), JsonValue::Null).matches(&r));
        assert!(Filter::eq(ident("missing"), JsonValue::Null).matches(&r));
        assert!(!Filter::eq(ident("qty"), JsonValue::Null).matches(&r));
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(Filter::all().is_unscoped());
        assert!(Filter::all().matches(&Row::new()));
    }
}
