use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use shopledger_core::Identifier;

use super::r#trait::{ColumnDef, Filter, ForeignKey, Row, Store, StoreError, StoreTx, value_text};

#[derive(Debug, Clone)]
struct Table {
    columns: Vec<Identifier>,
    primary_key: Identifier,
    rows: Vec<Row>,
}

impl Table {
    fn new(columns: Vec<Identifier>) -> Self {
        let primary_key = columns
            .iter()
            .find(|c| c.as_str() == "id")
            .or_else(|| columns.first())
            .cloned()
            .unwrap_or_else(Identifier::primary_key);
        Self {
            columns,
            primary_key,
            rows: Vec::new(),
        }
    }

    fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.as_str() == column)
    }
}

#[derive(Debug, Clone, Default)]
struct Database {
    tables: BTreeMap<Identifier, Table>,
    foreign_keys: Vec<ForeignKey>,
}

impl Database {
    fn table(&self, name: &Identifier) -> Result<&Table, StoreError> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    fn table_mut(&mut self, name: &Identifier) -> Result<&mut Table, StoreError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    fn check_columns<'a>(
        table_name: &Identifier,
        table: &Table,
        columns: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), StoreError> {
        for column in columns {
            if !table.has_column(column) {
                return Err(StoreError::UnknownColumn {
                    table: table_name.to_string(),
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }

    fn select(&self, name: &Identifier, filter: &Filter, limit: Option<usize>) -> Result<Vec<Row>, StoreError> {
        let table = self.table(name)?;
        Self::check_columns(name, table, filter.conditions().iter().map(|(c, _)| c.as_str()))?;

        let matched = table.rows.iter().filter(|r| filter.matches(r)).cloned();
        Ok(match limit {
            Some(n) => matched.take(n).collect(),
            None => matched.collect(),
        })
    }

    fn insert(&mut self, name: &Identifier, row: Row) -> Result<Row, StoreError> {
        let table = self.table_mut(name)?;
        Self::check_columns(name, table, row.keys().map(String::as_str))?;

        let mut stored = Row::new();
        for column in &table.columns {
            let value = row.get(column.as_str()).cloned().unwrap_or(JsonValue::Null);
            stored.insert(column.to_string(), value);
        }

        let pk = table.primary_key.as_str().to_string();
        if stored.get(&pk).is_none_or(JsonValue::is_null) {
            stored.insert(pk.clone(), JsonValue::String(Uuid::now_v7().to_string()));
        }

        let key = stored.get(&pk).and_then(value_text);
        if table.rows.iter().any(|r| r.get(&pk).and_then(value_text) == key) {
            return Err(StoreError::Conflict(format!(
                "duplicate key {}.{} = {}",
                name,
                pk,
                key.unwrap_or_default()
            )));
        }

        table.rows.push(stored.clone());
        Ok(stored)
    }

    fn update(&mut self, name: &Identifier, filter: &Filter, values: &Row) -> Result<u64, StoreError> {
        let table = self.table_mut(name)?;
        Self::check_columns(name, table, filter.conditions().iter().map(|(c, _)| c.as_str()))?;
        Self::check_columns(name, table, values.keys().map(String::as_str))?;

        let mut affected = 0;
        for row in table.rows.iter_mut().filter(|r| filter.matches(r)) {
            for (column, value) in values {
                row.insert(column.clone(), value.clone());
            }
            affected += 1;
        }
        Ok(affected)
    }

    /// Delete with RESTRICT semantics, checked at statement end like Postgres.
    fn delete(&mut self, name: &Identifier, filter: &Filter) -> Result<u64, StoreError> {
        let table = self.table(name)?;
        Self::check_columns(name, table, filter.conditions().iter().map(|(c, _)| c.as_str()))?;

        let (doomed, kept): (Vec<Row>, Vec<Row>) =
            table.rows.iter().cloned().partition(|r| filter.matches(r));

        for fk in self.foreign_keys.iter().filter(|fk| &fk.referenced_table == name) {
            let referencing: &[Row] = if &fk.table == name {
                &kept
            } else {
                &self.table(&fk.table)?.rows
            };

            for row in &doomed {
                let Some(value) = row.get(fk.referenced_column.as_str()).and_then(value_text) else {
                    continue;
                };
                let still_referenced = referencing
                    .iter()
                    .any(|r| r.get(fk.column.as_str()).and_then(value_text).as_deref() == Some(value.as_str()));
                if still_referenced {
                    return Err(StoreError::ReferentialIntegrity {
                        constraint: fk.constraint.clone(),
                        table: Some(fk.table.to_string()),
                        message: format!(
                            "delete on table \"{name}\" violates foreign key on table \"{}\"",
                            fk.table
                        ),
                    });
                }
            }
        }

        let affected = doomed.len() as u64;
        self.table_mut(name)?.rows = kept;
        Ok(affected)
    }
}

/// In-memory relational store.
///
/// Intended for tests/dev. Transactions work on a private copy of the whole
/// database under an owned async lock and swap it in on commit, so they are
/// fully serialised. Foreign keys are enforced on delete only.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    db: Arc<Mutex<Database>>,
}

impl InMemoryStore {
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// The retail back-office schema the ledger's compensation rules expect.
    pub fn retail() -> Result<Self, StoreError> {
        Self::builder()
            .table("branches", &["id", "name", "is_active"])
            .table("products", &["id", "name", "sku", "price", "is_active"])
            .table("inventory", &["id", "product_id", "branch_id", "quantity", "updated_at"])
            .table("expenses", &["id", "branch_id", "amount", "category", "description", "created_at"])
            .table("sales", &["id", "branch_id", "user_id", "total_amount", "created_at"])
            .table("sale_items", &["id", "sale_id", "product_id", "quantity", "unit_price"])
            .table(
                "activities",
                &[
                    "id",
                    "type",
                    "title",
                    "description",
                    "status",
                    "branch_id",
                    "user_id",
                    "related_entity_type",
                    "related_entity_id",
                    "delta",
                    "metadata",
                    "parent_activity_id",
                    "created_at",
                ],
            )
            .foreign_key("inventory", "product_id", "products", "id")
            .foreign_key("inventory", "branch_id", "branches", "id")
            .foreign_key("expenses", "branch_id", "branches", "id")
            .foreign_key("sales", "branch_id", "branches", "id")
            .foreign_key("sale_items", "sale_id", "sales", "id")
            .foreign_key("sale_items", "product_id", "products", "id")
            .build()
    }
}

/// Declarative schema builder for [`InMemoryStore`].
#[derive(Debug, Default)]
pub struct InMemoryStoreBuilder {
    db: Database,
    error: Option<StoreError>,
}

impl InMemoryStoreBuilder {
    pub fn table(mut self, name: &str, columns: &[&str]) -> Self {
        let parsed = Identifier::parse(name).and_then(|n| {
            let cols = columns
                .iter()
                .map(|c| Identifier::parse(c))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((n, cols))
        });
        match parsed {
            Ok((n, cols)) => {
                self.db.tables.insert(n, Table::new(cols));
            }
            Err(e) => self.fail(StoreError::Backend(e.to_string())),
        }
        self
    }

    pub fn foreign_key(mut self, table: &str, column: &str, referenced_table: &str, referenced_column: &str) -> Self {
        let parsed = (|| {
            Ok::<_, shopledger_core::DomainError>(ForeignKey {
                constraint: Some(format!("{table}_{column}_fkey")),
                table: Identifier::parse(table)?,
                column: Identifier::parse(column)?,
                referenced_table: Identifier::parse(referenced_table)?,
                referenced_column: Identifier::parse(referenced_column)?,
            })
        })();
        match parsed {
            Ok(fk) => self.db.foreign_keys.push(fk),
            Err(e) => self.fail(StoreError::Backend(e.to_string())),
        }
        self
    }

    fn fail(&mut self, err: StoreError) {
        self.error.get_or_insert(err);
    }

    pub fn build(self) -> Result<InMemoryStore, StoreError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        for fk in &self.db.foreign_keys {
            for (table, column) in [(&fk.table, &fk.column), (&fk.referenced_table, &fk.referenced_column)] {
                let t = self.db.table(table)?;
                Database::check_columns(table, t, [column.as_str()])?;
            }
        }
        Ok(InMemoryStore {
            db: Arc::new(Mutex::new(self.db)),
        })
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.db.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTx { guard, working }))
    }

    async fn tables(&self) -> Result<Vec<Identifier>, StoreError> {
        Ok(self.db.lock().await.tables.keys().cloned().collect())
    }

    async fn columns(&self, table: &Identifier) -> Result<Vec<Identifier>, StoreError> {
        Ok(self.db.lock().await.table(table)?.columns.clone())
    }

    async fn foreign_keys_to(&self, table: &Identifier) -> Result<Vec<ForeignKey>, StoreError> {
        let db = self.db.lock().await;
        db.table(table)?;
        Ok(db
            .foreign_keys
            .iter()
            .filter(|fk| &fk.referenced_table == table)
            .cloned()
            .collect())
    }

    async fn select(&self, table: &Identifier, filter: &Filter, limit: Option<usize>) -> Result<Vec<Row>, StoreError> {
        self.db.lock().await.select(table, filter, limit)
    }

    async fn count(&self, table: &Identifier, filter: &Filter) -> Result<u64, StoreError> {
        Ok(self.db.lock().await.select(table, filter, None)?.len() as u64)
    }

    async fn insert(&self, table: &Identifier, row: Row) -> Result<Row, StoreError> {
        self.db.lock().await.insert(table, row)
    }

    async fn ensure_table(&self, table: &Identifier, columns: &[ColumnDef]) -> Result<(), StoreError> {
        let mut db = self.db.lock().await;
        if db.tables.contains_key(table) {
            return Ok(());
        }
        let cols = columns
            .iter()
            .map(|c| Identifier::parse(c.name))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        db.tables.insert(table.clone(), Table::new(cols));
        Ok(())
    }
}

struct InMemoryTx {
    guard: OwnedMutexGuard<Database>,
    working: Database,
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn select(&mut self, table: &Identifier, filter: &Filter, limit: Option<usize>) -> Result<Vec<Row>, StoreError> {
        self.working.select(table, filter, limit)
    }

    async fn select_for_update(&mut self, table: &Identifier, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        // The whole database is already locked for the lifetime of the transaction.
        self.working.select(table, filter, None)
    }

    async fn insert(&mut self, table: &Identifier, row: Row) -> Result<Row, StoreError> {
        self.working.insert(table, row)
    }

    async fn update(&mut self, table: &Identifier, filter: &Filter, values: &Row) -> Result<u64, StoreError> {
        self.working.update(table, filter, values)
    }

    async fn delete(&mut self, table: &Identifier, filter: &Filter) -> Result<u64, StoreError> {
        self.working.delete(table, filter)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
