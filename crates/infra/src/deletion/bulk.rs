use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, instrument};

use shopledger_auth::{RequestContext, ensure_owner};
use shopledger_core::Identifier;

use crate::audit_trail::{AuditOperation, AuditRecord, AuditTrail};
use crate::error::{EngineError, EngineResult};
use crate::store::{Filter, Row, Store, settle};

use super::ensure_unprotected;

/// Soft-delete flag column a table must expose for `soft = true`.
pub const ACTIVE_FLAG: &str = "is_active";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BulkDeleteRequest {
    /// Raw table name; validated only after the confirmation matches it.
    pub table: String,
    #[serde(default)]
    pub soft: bool,
    pub confirm: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkDeleteOutcome {
    pub success: bool,
    pub soft: bool,
    pub affected_rows: u64,
}

#[derive(Clone)]
pub struct BulkDeleteEngine {
    store: Arc<dyn Store>,
    audit: AuditTrail,
}

impl BulkDeleteEngine {
    pub fn new(store: Arc<dyn Store>, audit: AuditTrail) -> Self {
        Self { store, audit }
    }

    /// Deactivate (`soft`) or delete every row of a table.
    ///
    /// `confirm` must repeat the table name exactly. Hard deletes never
    /// cascade: a referencing row elsewhere fails the whole delete.
    #[instrument(skip(self, ctx, request), fields(table = %request.table, soft = request.soft), err)]
    pub async fn bulk_delete(&self, ctx: &RequestContext, request: BulkDeleteRequest) -> EngineResult<BulkDeleteOutcome> {
        if request.confirm != request.table {
            return Err(EngineError::validation(
                "confirmation text does not match the table name",
            ));
        }
        let table = Identifier::parse(&request.table)?;
        ensure_owner(ctx.actor())?;
        ensure_unprotected(&table)?;

        let columns = self.store.columns(&table).await?;
        if request.soft && !columns.iter().any(|c| c.as_str() == ACTIVE_FLAG) {
            return Err(EngineError::invalid_state(format!(
                "table {table} has no {ACTIVE_FLAG} column; soft delete is not possible"
            )));
        }

        let mut tx = self.store.begin().await?;
        let result = if request.soft {
            let mut values = Row::new();
            values.insert(ACTIVE_FLAG.to_string(), json!(false));
            tx.update(&table, &Filter::all(), &values).await
        } else {
            tx.delete(&table, &Filter::all()).await
        };
        let affected_rows = settle(tx, result.map_err(EngineError::from))
            .await
            .inspect_err(|e| error!(error = %e, code = e.code(), "bulk delete rolled back"))?;

        let operation = if request.soft {
            AuditOperation::SoftDelete
        } else {
            AuditOperation::Delete
        };
        self.audit
            .append(
                ctx,
                AuditRecord::new(operation, table.clone()).after(json!({ "affected_rows": affected_rows })),
            )
            .await;

        info!(affected_rows, "bulk delete committed");
        Ok(BulkDeleteOutcome {
            success: true,
            soft: request.soft,
            affected_rows,
        })
    }
}
