//! Admin Audit Trail.
//!
//! Append-only forensic record of administrative row mutations, kept apart
//! from the activity ledger so ad-hoc edits stay reconstructable outside the
//! normal business flows. Appending is best-effort: a failure is logged and
//! never reaches the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tokio::sync::OnceCell;
use tracing::{instrument, warn};

use shopledger_auth::{RequestContext, ensure_owner};
use shopledger_core::{AuditEntryId, DomainError, Identifier, UserId};

use crate::error::{EngineError, EngineResult};
use crate::store::{ColumnDef, Filter, Row, RowExt, Store, StoreError};

pub use shopledger_activity::compensation::AUDIT_TABLE;

pub const AUDIT_COLUMNS: &[ColumnDef] = &[
    ColumnDef { name: "id", sql_type: "UUID PRIMARY KEY" },
    ColumnDef { name: "user_id", sql_type: "UUID" },
    ColumnDef { name: "email", sql_type: "TEXT" },
    ColumnDef { name: "operation", sql_type: "TEXT NOT NULL" },
    ColumnDef { name: "table_name", sql_type: "TEXT NOT NULL" },
    ColumnDef { name: "primary_key", sql_type: "TEXT" },
    ColumnDef { name: "primary_key_value", sql_type: "TEXT" },
    ColumnDef { name: "before_row", sql_type: "JSONB" },
    ColumnDef { name: "after_row", sql_type: "JSONB" },
    ColumnDef { name: "ip", sql_type: "TEXT" },
    ColumnDef { name: "created_at", sql_type: "TIMESTAMPTZ NOT NULL DEFAULT now()" },
];

pub const DEFAULT_AUDIT_LIMIT: usize = 100;
pub const MAX_AUDIT_LIMIT: usize = 1000;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    Insert,
    Update,
    Delete,
    SoftDelete,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::Insert => "insert",
            AuditOperation::Update => "update",
            AuditOperation::Delete => "delete",
            AuditOperation::SoftDelete => "soft_delete",
        }
    }
}

impl core::str::FromStr for AuditOperation {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(AuditOperation::Insert),
            "update" => Ok(AuditOperation::Update),
            "delete" => Ok(AuditOperation::Delete),
            "soft_delete" => Ok(AuditOperation::SoftDelete),
            other => Err(DomainError::validation(format!("unknown audit operation '{other}'"))),
        }
    }
}

/// What an administrative mutation did; the actor and ip come from the context.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub operation: AuditOperation,
    pub table: Identifier,
    pub primary_key: Option<Identifier>,
    pub primary_key_value: Option<String>,
    pub before_row: Option<JsonValue>,
    pub after_row: Option<JsonValue>,
}

impl AuditRecord {
    pub fn new(operation: AuditOperation, table: Identifier) -> Self {
        Self {
            operation,
            table,
            primary_key: None,
            primary_key_value: None,
            before_row: None,
            after_row: None,
        }
    }

    pub fn key(mut self, primary_key: Identifier, value: impl Into<String>) -> Self {
        self.primary_key = Some(primary_key);
        self.primary_key_value = Some(value.into());
        self
    }

    pub fn before(mut self, row: JsonValue) -> Self {
        self.before_row = Some(row);
        self
    }

    pub fn after(mut self, row: JsonValue) -> Self {
        self.after_row = Some(row);
        self
    }
}

/// A persisted audit entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub user_id: Option<UserId>,
    pub email: Option<String>,
    pub operation: AuditOperation,
    pub table_name: String,
    pub primary_key: Option<String>,
    pub primary_key_value: Option<String>,
    pub before_row: Option<JsonValue>,
    pub after_row: Option<JsonValue>,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    fn from_row(row: &Row) -> Result<Self, DomainError> {
        let json_column = |column: &str| row.get(column).filter(|v| !v.is_null()).cloned();
        Ok(Self {
            id: row
                .text("id")
                .ok_or_else(|| DomainError::validation("audit row is missing 'id'"))?
                .parse()?,
            user_id: row.text("user_id").map(|u| u.parse()).transpose()?,
            email: row.text("email"),
            operation: row.text("operation").unwrap_or_default().parse()?,
            table_name: row.text("table_name").unwrap_or_default(),
            primary_key: row.text("primary_key"),
            primary_key_value: row.text("primary_key_value"),
            before_row: json_column("before_row"),
            after_row: json_column("after_row"),
            ip: row.text("ip"),
            created_at: serde_json::from_value(row.get("created_at").cloned().unwrap_or_default())
                .map_err(|e| DomainError::validation(format!("audit created_at is malformed: {e}")))?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditQuery {
    pub table: Option<Identifier>,
    pub limit: Option<usize>,
}

#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn Store>,
    ready: Arc<OnceCell<()>>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            ready: Arc::new(OnceCell::new()),
        }
    }

    /// Create `admin_audit_log` on first use.
    async fn ensure_table(&self) -> Result<(), StoreError> {
        self.ready
            .get_or_try_init(|| async {
                let table = audit_table().map_err(|e| StoreError::Backend(e.to_string()))?;
                self.store.ensure_table(&table, AUDIT_COLUMNS).await
            })
            .await
            .map(|_| ())
    }

    /// Append an entry for `ctx`'s actor. Never fails.
    #[instrument(skip(self, ctx, record), fields(table = %record.table, operation = record.operation.as_str()))]
    pub async fn append(&self, ctx: &RequestContext, record: AuditRecord) {
        if let Err(e) = self.try_append(ctx, record).await {
            warn!(error = %e, "admin audit entry not written");
        }
    }

    async fn try_append(&self, ctx: &RequestContext, record: AuditRecord) -> Result<(), StoreError> {
        self.ensure_table().await?;

        let value = json!({
            "id": AuditEntryId::new().to_string(),
            "user_id": ctx.user_id().map(|u| u.to_string()),
            "email": ctx.actor().email,
            "operation": record.operation.as_str(),
            "table_name": record.table.as_str(),
            "primary_key": record.primary_key.as_ref().map(Identifier::as_str),
            "primary_key_value": record.primary_key_value,
            "before_row": record.before_row,
            "after_row": record.after_row,
            "ip": ctx.ip(),
            "created_at": Utc::now().to_rfc3339(),
        });
        let JsonValue::Object(row) = value else {
            return Err(StoreError::Backend("audit row must be an object".into()));
        };

        let table = audit_table().map_err(|e| StoreError::Backend(e.to_string()))?;
        self.store.insert(&table, row).await?;
        Ok(())
    }

    /// Entries newest first, optionally for one table. Owner-only.
    #[instrument(skip(self, ctx), err)]
    pub async fn list(&self, ctx: &RequestContext, query: AuditQuery) -> EngineResult<Vec<AuditEntry>> {
        ensure_owner(ctx.actor())?;

        let limit = query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT);
        if limit == 0 || limit > MAX_AUDIT_LIMIT {
            return Err(EngineError::validation(format!(
                "limit must be between 1 and {MAX_AUDIT_LIMIT}"
            )));
        }

        self.ensure_table().await?;

        let filter = match &query.table {
            Some(t) => Filter::eq("table_name".parse()?, t.as_str()),
            None => Filter::all(),
        };
        let rows = self.store.select(&audit_table()?, &filter, None).await?;

        let mut entries = rows
            .iter()
            .map(AuditEntry::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        // Ids are UUIDv7, so they break ties within the same timestamp.
        entries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.as_uuid().cmp(a.id.as_uuid()))
        });
        entries.truncate(limit);
        Ok(entries)
    }
}

fn audit_table() -> Result<Identifier, DomainError> {
    Identifier::parse(AUDIT_TABLE)
}
