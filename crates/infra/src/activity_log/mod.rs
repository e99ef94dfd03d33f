//! Activity Recorder: append-only log of business mutations.
//!
//! Recording is fire-and-forget for the caller. A failure to log degrades to a
//! warning and never aborts the business operation that triggered it. The one
//! exception is [`ActivityRecorder::record_in`], used when the activity row is
//! itself part of an atomic unit (the restore transaction).

pub mod row;

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value as JsonValue, json};
use tracing::{info, instrument, warn};

use shopledger_activity::{Activity, ActivityStatus, NewActivity};
use shopledger_auth::{RequestContext, ensure_branch_scope};
use shopledger_core::ActivityId;

use crate::error::{EngineError, EngineResult};
use crate::store::{Filter, Row, Store, StoreTx};

pub use row::{ACTIVITIES_TABLE, activities_table, from_row, to_row};

#[derive(Clone)]
pub struct ActivityRecorder {
    store: Arc<dyn Store>,
}

impl ActivityRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Persist a new `completed` activity on behalf of `ctx`'s actor.
    ///
    /// Returns the new id, or `None` when the activity could not be recorded.
    #[instrument(skip(self, ctx, new), fields(activity_type = %new.delta.activity_type()))]
    pub async fn record(&self, ctx: &RequestContext, new: NewActivity) -> Option<ActivityId> {
        match self.try_record(ctx, new).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, code = e.code(), "activity not recorded");
                None
            }
        }
    }

    /// Branch users may only record against their own branch, and the delta
    /// may only move stock at that branch.
    pub fn authorize(ctx: &RequestContext, new: &NewActivity) -> EngineResult<()> {
        ensure_branch_scope(ctx.actor(), new.branch_id)?;
        for branch in new.delta.branches() {
            ensure_branch_scope(ctx.actor(), Some(branch))?;
        }
        Ok(())
    }

    async fn try_record(&self, ctx: &RequestContext, new: NewActivity) -> EngineResult<ActivityId> {
        Self::authorize(ctx, &new)?;
        let activity = new.into_activity(ActivityId::new(), ctx.user_id(), Utc::now())?;
        self.store
            .insert(&activities_table()?, to_row(&activity)?)
            .await?;
        info!(activity_id = %activity.id, "activity recorded");
        Ok(activity.id)
    }

    /// Write `activity` inside the caller's transaction; errors propagate.
    pub async fn record_in(tx: &mut dyn StoreTx, activity: &Activity) -> EngineResult<()> {
        tx.insert(&activities_table()?, to_row(activity)?).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(activity_id = %id), err)]
    pub async fn fetch(&self, id: ActivityId) -> EngineResult<Activity> {
        let rows = self
            .store
            .select(&activities_table()?, &by_id(id)?, Some(1))
            .await?;
        first_activity(id, rows)
    }

    /// Read inside a transaction without locking.
    pub(crate) async fn fetch_in(tx: &mut dyn StoreTx, id: ActivityId) -> EngineResult<Activity> {
        let rows = tx.select(&activities_table()?, &by_id(id)?, Some(1)).await?;
        first_activity(id, rows)
    }

    /// Read inside a transaction, locking the row until it ends.
    pub(crate) async fn fetch_for_update(tx: &mut dyn StoreTx, id: ActivityId) -> EngineResult<Activity> {
        let rows = tx.select_for_update(&activities_table()?, &by_id(id)?).await?;
        first_activity(id, rows)
    }

    /// Conditional `completed -> reversed` flip. Returns the affected row count,
    /// which is zero when a concurrent restore got there first.
    pub(crate) async fn mark_reversed(tx: &mut dyn StoreTx, id: ActivityId) -> EngineResult<u64> {
        let filter = by_id(id)?.and(
            "status".parse()?,
            ActivityStatus::Completed.as_str(),
        );
        let mut values = Row::new();
        values.insert("status".to_string(), json!(ActivityStatus::Reversed.as_str()));
        Ok(tx.update(&activities_table()?, &filter, &values).await?)
    }
}

fn by_id(id: ActivityId) -> EngineResult<Filter> {
    Ok(Filter::eq("id".parse()?, JsonValue::String(id.to_string())))
}

fn first_activity(id: ActivityId, rows: Vec<Row>) -> EngineResult<Activity> {
    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::not_found(format!("activity {id}")))?;
    Ok(from_row(&row)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use shopledger_activity::{ActivityDelta, ActivityType, ExpenseDelta, StockMovement};
    use shopledger_auth::Actor;
    use shopledger_core::{BranchId, ProductId, UserId};

    fn recorder() -> ActivityRecorder {
        ActivityRecorder::new(Arc::new(InMemoryStore::retail().unwrap()))
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Actor::owner(UserId::new()))
    }

    #[tokio::test]
    async fn record_then_fetch() {
        let recorder = recorder();
        let ctx = ctx();
        let id = recorder
            .record(
                &ctx,
                NewActivity::new(ActivityDelta::ExpenseAdd(ExpenseDelta {
                    expense_id: None,
                    amount: 500,
                    category: "utilities".to_string(),
                })),
            )
            .await
            .unwrap();

        let activity = recorder.fetch(id).await.unwrap();
        assert_eq!(activity.activity_type(), ActivityType::ExpenseAdd);
        assert_eq!(activity.status, ActivityStatus::Completed);
        assert_eq!(activity.user_id, ctx.user_id());
    }

    #[tokio::test]
    async fn invalid_activity_is_swallowed() {
        let recorder = recorder();
        let id = recorder
            .record(
                &ctx(),
                NewActivity::new(ActivityDelta::StockAdd(StockMovement {
                    product_id: ProductId::new(),
                    branch_id: BranchId::new(),
                    quantity: -3,
                    previous_quantity: None,
                })),
            )
            .await;
        assert!(id.is_none());
    }

    #[tokio::test]
    async fn store_failure_is_swallowed() {
        // No `activities` table at all.
        let store = InMemoryStore::builder().table("products", &["id"]).build().unwrap();
        let recorder = ActivityRecorder::new(Arc::new(store));
        let id = recorder
            .record(
                &ctx(),
                NewActivity::new(ActivityDelta::ExpenseAdd(ExpenseDelta {
                    expense_id: None,
                    amount: 1,
                    category: "misc".to_string(),
                })),
            )
            .await;
        assert!(id.is_none());
    }

    #[tokio::test]
    async fn fetch_unknown_is_not_found() {
        let err = recorder().fetch(ActivityId::new()).await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }
}
