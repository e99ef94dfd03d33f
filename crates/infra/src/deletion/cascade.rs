use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::{error, info, instrument};

use shopledger_auth::{RequestContext, ensure_owner};
use shopledger_core::Identifier;

use crate::audit_trail::{AuditOperation, AuditRecord, AuditTrail};
use crate::error::{EngineError, EngineResult};
use crate::store::{Filter, Row, Store, StoreTx, settle};

use super::ensure_unprotected;

/// One operator-approved dependent set: rows of `table` whose `column`
/// references the target row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentRef {
    pub table: Identifier,
    pub column: Identifier,
    /// Column of the target row that `column` references; the target's
    /// primary key when absent.
    #[serde(default)]
    pub referenced_column: Option<Identifier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CascadeDeleteRequest {
    pub table: Identifier,
    pub primary_key: Identifier,
    pub value: String,
    #[serde(default)]
    pub dependents: Vec<DependentRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletedSet {
    pub table: Identifier,
    pub column: Identifier,
    pub rows: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CascadeDeleteOutcome {
    pub success: bool,
    pub deleted: Vec<DeletedSet>,
    pub target_rows: u64,
}

struct Applied {
    target: Vec<Row>,
    deleted: Vec<DeletedSet>,
    target_rows: u64,
}

#[derive(Clone)]
pub struct CascadeDeleteEngine {
    store: Arc<dyn Store>,
    audit: AuditTrail,
}

impl CascadeDeleteEngine {
    pub fn new(store: Arc<dyn Store>, audit: AuditTrail) -> Self {
        Self { store, audit }
    }

    /// Delete every approved dependent set, then the target row, atomically.
    ///
    /// An unlisted referencing table makes the final delete fail; everything
    /// is rolled back and the offending constraint/table are reported.
    #[instrument(
        skip(self, ctx, request),
        fields(table = %request.table, primary_key = %request.primary_key, dependents = request.dependents.len()),
        err
    )]
    pub async fn cascade_delete(
        &self,
        ctx: &RequestContext,
        request: CascadeDeleteRequest,
    ) -> EngineResult<CascadeDeleteOutcome> {
        if request.value.is_empty() {
            return Err(EngineError::validation("primary key value cannot be empty"));
        }
        ensure_owner(ctx.actor())?;
        ensure_unprotected(&request.table)?;
        for dep in &request.dependents {
            ensure_unprotected(&dep.table)?;
        }
        self.check_catalog(&request).await?;

        let mut tx = self.store.begin().await?;
        let result = Self::apply(&mut *tx, &request).await;
        let applied = settle(tx, result).await.inspect_err(|e| {
            error!(error = %e, code = e.code(), "cascade delete rolled back");
        })?;

        for row in &applied.target {
            self.audit
                .append(
                    ctx,
                    AuditRecord::new(AuditOperation::Delete, request.table.clone())
                        .key(request.primary_key.clone(), request.value.clone())
                        .before(JsonValue::Object(row.clone())),
                )
                .await;
        }
        for set in applied.deleted.iter().filter(|s| s.rows > 0) {
            self.audit
                .append(
                    ctx,
                    AuditRecord::new(AuditOperation::Delete, set.table.clone()).after(json!({
                        "cascade_from": request.table.as_str(),
                        "column": set.column.as_str(),
                        "value": request.value,
                        "affected_rows": set.rows,
                    })),
                )
                .await;
        }

        info!(target_rows = applied.target_rows, "cascade delete committed");
        Ok(CascadeDeleteOutcome {
            success: true,
            deleted: applied.deleted,
            target_rows: applied.target_rows,
        })
    }

    /// Every named table and column must exist before anything is touched.
    async fn check_catalog(&self, request: &CascadeDeleteRequest) -> EngineResult<()> {
        let require = |columns: &[Identifier], table: &Identifier, column: &Identifier| {
            if columns.contains(column) {
                Ok(())
            } else {
                Err(EngineError::validation(format!("table {table} has no column {column}")))
            }
        };

        let target_columns = self.store.columns(&request.table).await?;
        require(&target_columns, &request.table, &request.primary_key)?;
        for dep in &request.dependents {
            let columns = self.store.columns(&dep.table).await?;
            require(&columns, &dep.table, &dep.column)?;
            if let Some(referenced) = &dep.referenced_column {
                require(&target_columns, &request.table, referenced)?;
            }
        }
        Ok(())
    }

    async fn apply(tx: &mut dyn StoreTx, request: &CascadeDeleteRequest) -> EngineResult<Applied> {
        let key_filter = Filter::eq(request.primary_key.clone(), request.value.as_str());
        let target = tx.select_for_update(&request.table, &key_filter).await?;
        let Some(snapshot) = target.first() else {
            return Err(EngineError::not_found(format!(
                "{} with {} = {}",
                request.table, request.primary_key, request.value
            )));
        };

        let mut deleted = Vec::with_capacity(request.dependents.len());
        for dep in &request.dependents {
            let lookup = match &dep.referenced_column {
                Some(column) if column != &request.primary_key => {
                    match snapshot.get(column.as_str()) {
                        Some(v) if !v.is_null() => v.clone(),
                        _ => {
                            deleted.push(DeletedSet { table: dep.table.clone(), column: dep.column.clone(), rows: 0 });
                            continue;
                        }
                    }
                }
                _ => JsonValue::String(request.value.clone()),
            };
            let rows = tx.delete(&dep.table, &Filter::eq(dep.column.clone(), lookup)).await?;
            deleted.push(DeletedSet {
                table: dep.table.clone(),
                column: dep.column.clone(),
                rows,
            });
        }

        let target_rows = tx.delete(&request.table, &key_filter).await?;
        Ok(Applied {
            target,
            deleted,
            target_rows,
        })
    }
}
