//! Restore Engine: reverse a past activity through its compensation rule.
//!
//! A restore runs in exactly one transaction:
//!
//! 1. Re-read (and lock) the activity; it must still be `completed`
//! 2. Plan the compensation and project its effect
//! 3. Flip `completed -> reversed` with a conditional update; zero affected
//!    rows means a concurrent restore won, and this one fails
//! 4. Apply the compensation steps under row locks
//! 5. Insert the child `restore` activity pointing at the original
//!
//! Any failure rolls the whole unit back. A dry run performs steps 1-2 in a
//! transaction that is always rolled back.

pub mod preview;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, instrument};

use shopledger_activity::compensation::{EXPENSES_TABLE, INVENTORY_TABLE, PRODUCTS_TABLE};
use shopledger_activity::{Activity, CompensationPlan, CompensationStep, compensation_for};
use shopledger_auth::{AuthzError, RequestContext, ensure_branch_scope, ensure_owner};
use shopledger_core::{ActivityId, Identifier};

use crate::activity_log::ActivityRecorder;
use crate::deletion::ensure_unprotected;
use crate::error::{EngineError, EngineResult};
use crate::store::{Filter, Row, RowExt, Store, StoreTx, settle};

pub use preview::{FieldProjection, RestorePreview, StockLineProjection, TransferLineProjection};

use preview::stock_filter;

pub const MAX_REASON_LEN: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreOutcome {
    pub success: bool,
    pub dry_run: bool,
    pub activity_id: ActivityId,
    /// The child `restore` activity; `None` for dry runs.
    pub restored_activity_id: Option<ActivityId>,
    pub data: RestorePreview,
}

#[derive(Clone)]
pub struct RestoreEngine {
    store: Arc<dyn Store>,
    recorder: ActivityRecorder,
}

impl RestoreEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let recorder = ActivityRecorder::new(store.clone());
        Self { store, recorder }
    }

    /// Dry run: project the effect of restoring `activity_id`. Writes nothing.
    pub async fn preview_restore(&self, ctx: &RequestContext, activity_id: ActivityId) -> EngineResult<RestorePreview> {
        Ok(self.restore(ctx, activity_id, "", true).await?.data)
    }

    /// Apply the compensation for `activity_id` and mark it reversed.
    pub async fn commit_restore(
        &self,
        ctx: &RequestContext,
        activity_id: ActivityId,
        reason: &str,
    ) -> EngineResult<RestoreOutcome> {
        self.restore(ctx, activity_id, reason, false).await
    }

    #[instrument(skip(self, ctx, reason), fields(activity_id = %activity_id), err)]
    pub async fn restore(
        &self,
        ctx: &RequestContext,
        activity_id: ActivityId,
        reason: &str,
        dry_run: bool,
    ) -> EngineResult<RestoreOutcome> {
        let reason = reason.trim();
        if !dry_run {
            validate_reason(reason)?;
        }

        // Scope is checked before any transaction opens: the stored branch
        // first, then every branch and shared table the compensation writes.
        let activity = self.recorder.fetch(activity_id).await?;
        ensure_branch_scope(ctx.actor(), activity.branch_id)?;
        let plan = compensation_for(&activity)?;
        authorize_plan(ctx, &plan)?;

        let mut tx = self.store.begin().await?;
        if dry_run {
            let result = Self::dry_run(&mut *tx, activity_id).await;
            if let Err(e) = tx.rollback().await {
                tracing::warn!(error = %e, "dry run rollback failed");
            }
            return Ok(RestoreOutcome {
                success: true,
                dry_run: true,
                activity_id,
                restored_activity_id: None,
                data: result?,
            });
        }

        let result = Self::apply(&mut *tx, ctx, activity_id, reason).await;
        let (restore_id, data) = settle(tx, result).await.inspect_err(|e| {
            error!(error = %e, code = e.code(), "restore rolled back");
        })?;

        info!(restore_activity_id = %restore_id, "activity restored");
        Ok(RestoreOutcome {
            success: true,
            dry_run: false,
            activity_id,
            restored_activity_id: Some(restore_id),
            data,
        })
    }

    async fn dry_run(tx: &mut dyn StoreTx, activity_id: ActivityId) -> EngineResult<RestorePreview> {
        let activity = ActivityRecorder::fetch_in(tx, activity_id).await?;
        let plan = compensation_for(&activity)?;
        preview::project(tx, &activity, &plan).await
    }

    async fn apply(
        tx: &mut dyn StoreTx,
        ctx: &RequestContext,
        activity_id: ActivityId,
        reason: &str,
    ) -> EngineResult<(ActivityId, RestorePreview)> {
        let activity = ActivityRecorder::fetch_for_update(tx, activity_id).await?;
        let plan = compensation_for(&activity)?;
        let projection = preview::project(tx, &activity, &plan).await?;

        if ActivityRecorder::mark_reversed(tx, activity_id).await? == 0 {
            return Err(EngineError::invalid_state(format!(
                "activity {activity_id} was reversed concurrently"
            )));
        }

        apply_plan(tx, &activity, &plan).await?;

        let child = activity.restore_record(
            ActivityId::new(),
            reason,
            projection.to_json(),
            ctx.user_id(),
            Utc::now(),
        );
        ActivityRecorder::record_in(tx, &child).await?;
        Ok((child.id, projection))
    }
}

/// Products and corrected rows are shared across branches, so only the owner
/// may roll them back.
fn authorize_plan(ctx: &RequestContext, plan: &CompensationPlan) -> Result<(), AuthzError> {
    if plan.touches_shared_rows() {
        ensure_owner(ctx.actor())?;
    }
    for branch in plan.branches() {
        ensure_branch_scope(ctx.actor(), Some(branch))?;
    }
    Ok(())
}

fn validate_reason(reason: &str) -> EngineResult<()> {
    if reason.is_empty() {
        return Err(EngineError::validation("restore reason cannot be empty"));
    }
    if reason.chars().count() > MAX_REASON_LEN {
        return Err(EngineError::validation(format!(
            "restore reason exceeds {MAX_REASON_LEN} characters"
        )));
    }
    Ok(())
}

async fn apply_plan(tx: &mut dyn StoreTx, activity: &Activity, plan: &CompensationPlan) -> EngineResult<()> {
    for step in &plan.steps {
        match step {
            CompensationStep::AdjustStock {
                product_id,
                branch_id,
                change,
                rule,
            } => {
                let inventory = Identifier::parse(INVENTORY_TABLE)?;
                let filter = stock_filter(*product_id, *branch_id)?;
                let rows = tx.select_for_update(&inventory, &filter).await?;

                match rows.first() {
                    Some(row) => {
                        let next = rule.apply(row.int("quantity").unwrap_or(0), *change)?;
                        let mut values = Row::new();
                        values.insert("quantity".to_string(), json!(next));
                        tx.update(&inventory, &filter, &values).await?;
                    }
                    None if *change > 0 => {
                        let mut values = Row::new();
                        values.insert("product_id".to_string(), json!(product_id.to_string()));
                        values.insert("branch_id".to_string(), json!(branch_id.to_string()));
                        values.insert("quantity".to_string(), json!(change));
                        tx.insert(&inventory, values).await?;
                    }
                    // Decreasing a missing row: nothing to floor, or nothing available.
                    None => {
                        rule.apply(0, *change)?;
                    }
                }
            }
            CompensationStep::DeleteExpense { expense_key } => {
                let deleted = tx
                    .delete(
                        &Identifier::parse(EXPENSES_TABLE)?,
                        &Filter::eq(Identifier::primary_key(), expense_key.as_str()),
                    )
                    .await?;
                if deleted == 0 {
                    return Err(EngineError::invalid_state(format!(
                        "expense {expense_key} no longer exists"
                    )));
                }
            }
            CompensationStep::DeactivateProduct { product_id } => {
                let mut values = Row::new();
                values.insert("is_active".to_string(), json!(false));
                let updated = tx
                    .update(
                        &Identifier::parse(PRODUCTS_TABLE)?,
                        &Filter::eq(Identifier::primary_key(), product_id.to_string()),
                        &values,
                    )
                    .await?;
                if updated == 0 {
                    return Err(EngineError::not_found(format!("product {product_id}")));
                }
            }
            CompensationStep::RestoreFields {
                table,
                primary_key,
                key,
                fields,
            } => {
                ensure_unprotected(table)?;
                let updated = tx
                    .update(table, &Filter::eq(primary_key.clone(), key.as_str()), fields)
                    .await?;
                if updated != 1 {
                    return Err(EngineError::not_found(format!(
                        "{table} with {primary_key} = {key} (activity {})",
                        activity.id
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_must_be_present_and_bounded() {
        assert!(validate_reason("").is_err());
        assert!(validate_reason("correction").is_ok());
        assert!(validate_reason(&"x".repeat(MAX_REASON_LEN)).is_ok());
        assert!(validate_reason(&"x".repeat(MAX_REASON_LEN + 1)).is_err());
    }
}
