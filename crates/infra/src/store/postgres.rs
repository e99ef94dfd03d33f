//! Postgres-backed relational store.
//!
//! Statements are built from validated [`Identifier`]s (always quoted) and
//! every value is a bound parameter. Rows travel as `jsonb`: reads project
//! `to_jsonb(t.*)`, while writes and filter values go through
//! `jsonb_populate_record`, so column types are coerced by Postgres itself and
//! filters compare typed values (indexes stay usable).
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | StoreError | Scenario |
//! |-----------------------|------------|----------|
//! | `23503` | `ReferentialIntegrity` | Delete/update of a row that is still referenced |
//! | `23505` | `Conflict` | Duplicate key |
//! | `42P01` | `UnknownTable` | Table does not exist |
//! | `42703` | `UnknownColumn` | Column does not exist |
//! | Any other | `Backend` | Everything else (connectivity, pool closed, ...) |

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgConnection, PgPool, Postgres, Row as _, Transaction};
use tracing::instrument;

use shopledger_core::Identifier;

use super::r#trait::{ColumnDef, Filter, ForeignKey, Row, Store, StoreError, StoreTx};

/// Postgres store backed by an SQLx connection pool.
///
/// Transactions run at READ COMMITTED; restores rely on row locks
/// (`SELECT ... FOR UPDATE`) and conditional updates rather than on
/// serializable isolation.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a bounded pool.
    #[instrument(skip(url), err)]
    pub async fn connect(url: &str, max_connections: u32, acquire_timeout: Duration) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", None, e))?;
        Ok(Self::new(pool))
    }

    /// Apply the embedded migrations (`activities` table and indexes).
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn conn(&self) -> Result<sqlx::pool::PoolConnection<Postgres>, StoreError> {
        self.pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", None, e))
    }
}

#[async_trait]
impl Store for PostgresStore {
    #[instrument(skip(self), err)]
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", None, e))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("begin", None, e))?;
        Ok(Box::new(PgTx { tx }))
    }

    #[instrument(skip(self), err)]
    async fn tables(&self) -> Result<Vec<Identifier>, StoreError> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = current_schema() AND table_type = 'BASE TABLE'
            ORDER BY table_name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("tables", None, e))?;

        // Tables whose names the ledger cannot address are simply not listed.
        Ok(names.iter().filter_map(|n| Identifier::parse(n).ok()).collect())
    }

    #[instrument(skip(self), fields(table = %table), err)]
    async fn columns(&self, table: &Identifier) -> Result<Vec<Identifier>, StoreError> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT column_name::text
            FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1
            ORDER BY ordinal_position
            "#,
        )
        .bind(table.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("columns", Some(table), e))?;

        if names.is_empty() {
            return Err(StoreError::UnknownTable(table.to_string()));
        }
        Ok(names.iter().filter_map(|n| Identifier::parse(n).ok()).collect())
    }

    #[instrument(skip(self), fields(table = %table), err)]
    async fn foreign_keys_to(&self, table: &Identifier) -> Result<Vec<ForeignKey>, StoreError> {
        // Existence check so an unknown table is an error rather than "no references".
        self.columns(table).await?;

        let rows = sqlx::query(
            r#"
            SELECT
                c.conname::text  AS constraint_name,
                src.relname::text AS table_name,
                sa.attname::text  AS column_name,
                dst.relname::text AS referenced_table,
                da.attname::text  AS referenced_column
            FROM pg_constraint c
            JOIN pg_class src ON src.oid = c.conrelid
            JOIN pg_class dst ON dst.oid = c.confrelid
            JOIN pg_namespace n ON n.oid = dst.relnamespace
            CROSS JOIN LATERAL unnest(c.conkey, c.confkey) AS k(src_attnum, dst_attnum)
            JOIN pg_attribute sa ON sa.attrelid = c.conrelid AND sa.attnum = k.src_attnum
            JOIN pg_attribute da ON da.attrelid = c.confrelid AND da.attnum = k.dst_attnum
            WHERE c.contype = 'f'
              AND n.nspname = current_schema()
              AND dst.relname = $1
            ORDER BY src.relname, c.conname, sa.attnum
            "#,
        )
        .bind(table.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("foreign_keys_to", Some(table), e))?;

        let mut fks = Vec::with_capacity(rows.len());
        for row in rows {
            let names = ["constraint_name", "table_name", "column_name", "referenced_table", "referenced_column"]
                .map(|name| row.try_get::<String, _>(name));
            let [constraint, src_table, src_column, dst_table, dst_column] = names;
            let constraint = constraint.map_err(|e| map_sqlx_error("foreign_keys_to", Some(table), e))?;

            let parsed = (|| {
                let ident = |r: Result<String, sqlx::Error>| {
                    Identifier::parse(&r.unwrap_or_default())
                };
                Ok::<_, shopledger_core::DomainError>(ForeignKey {
                    constraint: Some(constraint.clone()),
                    table: ident(src_table)?,
                    column: ident(src_column)?,
                    referenced_table: ident(dst_table)?,
                    referenced_column: ident(dst_column)?,
                })
            })();
            match parsed {
                Ok(fk) => fks.push(fk),
                Err(e) => tracing::debug!(error = %e, constraint = %constraint, "skipping foreign key on unaddressable column"),
            }
        }
        Ok(fks)
    }

    #[instrument(skip(self, filter), fields(table = %table), err)]
    async fn select(&self, table: &Identifier, filter: &Filter, limit: Option<usize>) -> Result<Vec<Row>, StoreError> {
        let mut conn = self.conn().await?;
        let (sql, binds) = select_sql(table, filter, limit, false);
        fetch_rows(&mut conn, &sql, &binds)
            .await
            .map_err(|e| map_sqlx_error("select", Some(table), e))
    }

    #[instrument(skip(self, filter), fields(table = %table), err)]
    async fn count(&self, table: &Identifier, filter: &Filter) -> Result<u64, StoreError> {
        let (clause, binds) = where_clause(table, filter, 1);
        let sql = format!("SELECT count(*) FROM {} AS t{clause}", table.quoted());
        let count: i64 = bind_all(sqlx::query(&sql), &binds)
            .fetch_one(&self.pool)
            .await
            .and_then(|row| row.try_get(0))
            .map_err(|e| map_sqlx_error("count", Some(table), e))?;
        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self, row), fields(table = %table), err)]
    async fn insert(&self, table: &Identifier, row: Row) -> Result<Row, StoreError> {
        let mut conn = self.conn().await?;
        insert_row(&mut conn, table, row).await
    }

    #[instrument(skip(self, columns), fields(table = %table), err)]
    async fn ensure_table(&self, table: &Identifier, columns: &[ColumnDef]) -> Result<(), StoreError> {
        let defs = columns
            .iter()
            .map(|c| Identifier::parse(c.name).map(|name| format!("{} {}", name.quoted(), c.sql_type)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let sql = format!("CREATE TABLE IF NOT EXISTS {} ({})", table.quoted(), defs.join(", "));
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_table", Some(table), e))?;
        Ok(())
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    #[instrument(skip(self, filter), fields(table = %table), err)]
    async fn select(&mut self, table: &Identifier, filter: &Filter, limit: Option<usize>) -> Result<Vec<Row>, StoreError> {
        let (sql, binds) = select_sql(table, filter, limit, false);
        fetch_rows(&mut self.tx, &sql, &binds)
            .await
            .map_err(|e| map_sqlx_error("select", Some(table), e))
    }

    #[instrument(skip(self, filter), fields(table = %table), err)]
    async fn select_for_update(&mut self, table: &Identifier, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        let (sql, binds) = select_sql(table, filter, None, true);
        fetch_rows(&mut self.tx, &sql, &binds)
            .await
            .map_err(|e| map_sqlx_error("select_for_update", Some(table), e))
    }

    #[instrument(skip(self, row), fields(table = %table), err)]
    async fn insert(&mut self, table: &Identifier, row: Row) -> Result<Row, StoreError> {
        insert_row(&mut self.tx, table, row).await
    }

    #[instrument(skip(self, filter, values), fields(table = %table), err)]
    async fn update(&mut self, table: &Identifier, filter: &Filter, values: &Row) -> Result<u64, StoreError> {
        let Some((sql, binds)) = update_sql(table, filter, values) else {
            // Nothing to set: report how many rows would have been touched.
            let (clause, binds) = where_clause(table, filter, 1);
            let sql = format!("SELECT count(*) FROM {} AS t{clause}", table.quoted());
            let count: i64 = bind_all(sqlx::query(&sql), &binds)
                .fetch_one(&mut *self.tx)
                .await
                .and_then(|row| row.try_get(0))
                .map_err(|e| map_sqlx_error("update", Some(table), e))?;
            return Ok(count.max(0) as u64);
        };

        let result = bind_all(sqlx::query(&sql), &binds)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("update", Some(table), e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, filter), fields(table = %table), err)]
    async fn delete(&mut self, table: &Identifier, filter: &Filter) -> Result<u64, StoreError> {
        let (clause, binds) = where_clause(table, filter, 1);
        let sql = format!("DELETE FROM {} AS t{clause}", table.quoted());
        let result = bind_all(sqlx::query(&sql), &binds)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete", Some(table), e))?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", None, e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", None, e))
    }
}

/// A bound `jsonb` statement parameter.
#[derive(Debug, Clone, PartialEq)]
struct Bind(JsonValue);

fn bind_all<'q>(mut query: Query<'q, Postgres, PgArguments>, binds: &'q [Bind]) -> Query<'q, Postgres, PgArguments> {
    for Bind(value) in binds {
        query = query.bind(sqlx::types::Json(value.clone()));
    }
    query
}

/// ` WHERE ...` for `filter`, numbering parameters from `first_param`.
///
/// Each value is bound as `{column: value}` and read back through the
/// table's own row type, so the comparison happens on the column type and
/// `t.column = ...` can use an index.
fn where_clause(table: &Identifier, filter: &Filter, first_param: usize) -> (String, Vec<Bind>) {
    if filter.is_unscoped() {
        return (String::new(), Vec::new());
    }
    let mut binds = Vec::new();
    let mut parts = Vec::with_capacity(filter.conditions().len());
    for (column, value) in filter.conditions() {
        if value.is_null() {
            parts.push(format!("t.{} IS NULL", column.quoted()));
            continue;
        }
        let mut typed = Row::new();
        typed.insert(column.as_str().to_string(), value.clone());
        binds.push(Bind(JsonValue::Object(typed)));
        parts.push(format!(
            "t.{col} = (jsonb_populate_record(NULL::{table}, ${n})).{col}",
            col = column.quoted(),
            table = table.quoted(),
            n = first_param + binds.len() - 1,
        ));
    }
    (format!(" WHERE {}", parts.join(" AND ")), binds)
}

fn select_sql(table: &Identifier, filter: &Filter, limit: Option<usize>, for_update: bool) -> (String, Vec<Bind>) {
    let (clause, binds) = where_clause(table, filter, 1);
    let mut sql = format!("SELECT to_jsonb(t.*) AS row FROM {} AS t{clause}", table.quoted());
    if let Some(n) = limit {
        sql.push_str(&format!(" LIMIT {n}"));
    }
    if for_update {
        sql.push_str(" FOR UPDATE OF t");
    }
    (sql, binds)
}

fn insert_sql(table: &Identifier, row: &Row) -> Result<(String, Vec<Bind>), StoreError> {
    let returning = "RETURNING to_jsonb(t.*) AS row";
    if row.is_empty() {
        return Ok((format!("INSERT INTO {} AS t DEFAULT VALUES {returning}", table.quoted()), Vec::new()));
    }
    let columns = quoted_columns(table, row.keys())?;
    let sql = format!(
        "INSERT INTO {table} AS t ({columns}) SELECT {columns} FROM jsonb_populate_record(NULL::{table}, $1) {returning}",
        table = table.quoted(),
    );
    Ok((sql, vec![Bind(JsonValue::Object(row.clone()))]))
}

/// `None` when `values` is empty.
fn update_sql(table: &Identifier, filter: &Filter, values: &Row) -> Option<(String, Vec<Bind>)> {
    if values.is_empty() {
        return None;
    }
    let assignments = values
        .keys()
        .filter_map(|k| Identifier::parse(k).ok())
        .map(|c| format!("{col} = r.{col}", col = c.quoted()))
        .collect::<Vec<_>>()
        .join(", ");
    let (clause, mut binds) = where_clause(table, filter, 2);
    let sql = format!(
        "UPDATE {table} AS t SET {assignments} FROM jsonb_populate_record(NULL::{table}, $1) AS r{clause}",
        table = table.quoted(),
    );
    binds.insert(0, Bind(JsonValue::Object(values.clone())));
    Some((sql, binds))
}

fn quoted_columns<'a>(table: &Identifier, names: impl Iterator<Item = &'a String>) -> Result<String, StoreError> {
    let quoted = names
        .map(|n| {
            Identifier::parse(n).map(|c| c.quoted()).map_err(|_| StoreError::UnknownColumn {
                table: table.to_string(),
                column: n.clone(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(quoted.join(", "))
}

async fn fetch_rows(conn: &mut PgConnection, sql: &str, binds: &[Bind]) -> Result<Vec<Row>, sqlx::Error> {
    let rows = bind_all(sqlx::query(sql), binds).fetch_all(&mut *conn).await?;
    rows.iter()
        .map(|r| {
            let value: JsonValue = r.try_get("row")?;
            Ok(match value {
                JsonValue::Object(map) => map,
                _ => Row::new(),
            })
        })
        .collect()
}

async fn insert_row(conn: &mut PgConnection, table: &Identifier, row: Row) -> Result<Row, StoreError> {
    // Unknown columns would otherwise be dropped silently by jsonb_populate_record.
    for column in row.keys() {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.columns
                WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2
            )
            "#,
        )
        .bind(table.as_str())
        .bind(column.as_str())
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("insert", Some(table), e))?;
        if !exists {
            return Err(StoreError::UnknownColumn {
                table: table.to_string(),
                column: column.clone(),
            });
        }
    }

    let (sql, binds) = insert_sql(table, &row)?;
    let mut rows = fetch_rows(conn, &sql, &binds)
        .await
        .map_err(|e| map_sqlx_error("insert", Some(table), e))?;
    rows.pop()
        .ok_or_else(|| StoreError::Backend(format!("insert into {table} returned no row")))
}

/// Map SQLx errors to `StoreError`, keeping the constraint and table that
/// Postgres reports for foreign key violations.
fn map_sqlx_error(operation: &str, table: Option<&Identifier>, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23503") => StoreError::ReferentialIntegrity {
                    constraint: db_err.constraint().map(str::to_string),
                    table: db_err.table().map(str::to_string),
                    message: db_err.message().to_string(),
                },
                Some("23505") => StoreError::Conflict(msg),
                Some("42P01") => StoreError::UnknownTable(
                    table.map(ToString::to_string).unwrap_or_else(|| db_err.message().to_string()),
                ),
                Some("42703") => StoreError::UnknownColumn {
                    table: table.map(ToString::to_string).unwrap_or_default(),
                    column: first_quoted(db_err.message()).unwrap_or_else(|| db_err.message().to_string()),
                },
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Backend(format!("connection pool closed in {operation}")),
        sqlx::Error::PoolTimedOut => StoreError::Backend(format!("connection pool timed out in {operation}")),
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

/// First `"quoted"` name in a Postgres message, with any `t.` prefix removed.
fn first_quoted(message: &str) -> Option<String> {
    let start = message.find('"')? + 1;
    let end = start + message[start..].find('"')?;
    let name = &message[start..end];
    Some(name.rsplit('.').next().unwrap_or(name).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ident(s: &str) -> Identifier {
        Identifier::parse(s).unwrap()
    }

    #[test]
    fn select_quotes_identifiers_and_binds_values() {
        let filter = Filter::eq(ident("product_id"), "p1").and(ident("branch_id"), "b1");
        let (sql, binds) = select_sql(&ident("inventory"), &filter, Some(5), true);

        assert_eq!(
            sql,
            "SELECT to_jsonb(t.*) AS row FROM \"inventory\" AS t \
             WHERE t.\"product_id\" = (jsonb_populate_record(NULL::\"inventory\", $1)).\"product_id\" \
             AND t.\"branch_id\" = (jsonb_populate_record(NULL::\"inventory\", $2)).\"branch_id\" \
             LIMIT 5 FOR UPDATE OF t"
        );
        assert_eq!(
            binds,
            vec![Bind(json!({"product_id": "p1"})), Bind(json!({"branch_id": "b1"}))]
        );
    }

    #[test]
    fn null_conditions_use_is_null() {
        let filter = Filter::eq(ident("parent_activity_id"), JsonValue::Null).and(ident("status"), "completed");
        let (clause, binds) = where_clause(&ident("activities"), &filter, 1);
        assert_eq!(
            clause,
            " WHERE t.\"parent_activity_id\" IS NULL \
             AND t.\"status\" = (jsonb_populate_record(NULL::\"activities\", $1)).\"status\""
        );
        assert_eq!(binds, vec![Bind(json!({"status": "completed"}))]);
    }

    #[test]
    fn update_numbers_filter_after_payload() {
        let values = json!({"status": "reversed"}).as_object().cloned().unwrap();
        let filter = Filter::eq(ident("id"), "a1").and(ident("status"), "completed");
        let (sql, binds) = update_sql(&ident("activities"), &filter, &values).unwrap();

        assert_eq!(
            sql,
            "UPDATE \"activities\" AS t SET \"status\" = r.\"status\" \
             FROM jsonb_populate_record(NULL::\"activities\", $1) AS r \
             WHERE t.\"id\" = (jsonb_populate_record(NULL::\"activities\", $2)).\"id\" \
             AND t.\"status\" = (jsonb_populate_record(NULL::\"activities\", $3)).\"status\""
        );
        assert_eq!(binds[0], Bind(json!({"status": "reversed"})));
        assert_eq!(binds[1], Bind(json!({"id": "a1"})));
        assert!(update_sql(&ident("activities"), &filter, &Row::new()).is_none());
    }

    #[test]
    fn filter_values_keep_their_json_type() {
        let filter = Filter::eq(ident("amount"), json!(7.5)).and(ident("paid_at"), "2026-01-02T03:04:05Z");
        let (clause, binds) = where_clause(&ident("expenses"), &filter, 1);

        assert!(!clause.contains("::text"));
        assert_eq!(binds[0], Bind(json!({"amount": 7.5})));
        assert_eq!(binds[1], Bind(json!({"paid_at": "2026-01-02T03:04:05Z"})));
    }

    #[test]
    fn insert_uses_populate_record() {
        let row = json!({"id": "e1", "amount": 500}).as_object().cloned().unwrap();
        let (sql, binds) = insert_sql(&ident("expenses"), &row).unwrap();
        assert!(sql.starts_with("INSERT INTO \"expenses\" AS t (\"amount\", \"id\") SELECT \"amount\", \"id\""));
        assert!(sql.ends_with("RETURNING to_jsonb(t.*) AS row"));
        assert_eq!(binds.len(), 1);
    }

    #[test]
    fn insert_rejects_unaddressable_columns() {
        let row = json!({"amount; drop": 1}).as_object().cloned().unwrap();
        assert!(matches!(
            insert_sql(&ident("expenses"), &row),
            Err(StoreError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn first_quoted_strips_alias() {
        assert_eq!(first_quoted("column t.\"colour\" does not exist"), Some("colour".into()));
        assert_eq!(first_quoted("column \"t.colour\" does not exist"), Some("colour".into()));
        assert_eq!(first_quoted("no quotes"), None);
    }
}
