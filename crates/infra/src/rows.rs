//! Administrative row editor.
//!
//! Single-row insert/update/delete on business tables, each in its own
//! transaction and each leaving an admin audit entry. Updates also record an
//! `edit_correction` activity in the same transaction, so a manual edit can
//! later be undone through the restore engine.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use shopledger_activity::{ActivityDelta, NewActivity, RowCorrection};
use shopledger_auth::{RequestContext, ensure_owner};
use shopledger_core::{ActivityId, Identifier};

use crate::activity_log::ActivityRecorder;
use crate::audit_trail::{AuditOperation, AuditRecord, AuditTrail};
use crate::deletion::ensure_unprotected;
use crate::error::{EngineError, EngineResult};
use crate::store::{Filter, Row, Store, StoreTx, settle};

#[derive(Clone)]
pub struct RowEditor {
    store: Arc<dyn Store>,
    audit: AuditTrail,
}

impl RowEditor {
    pub fn new(store: Arc<dyn Store>, audit: AuditTrail) -> Self {
        Self { store, audit }
    }

    #[instrument(skip(self, ctx, values), fields(table = %table), err)]
    pub async fn insert_row(&self, ctx: &RequestContext, table: &Identifier, values: Row) -> EngineResult<Row> {
        let values = self.checked_fields(ctx, table, values).await?;

        let mut tx = self.store.begin().await?;
        let result = tx.insert(table, values).await.map_err(EngineError::from);
        let inserted = settle(tx, result).await?;

        let mut record = AuditRecord::new(AuditOperation::Insert, table.clone())
            .after(JsonValue::Object(inserted.clone()));
        if let Some(key) = inserted.get(Identifier::primary_key().as_str()).and_then(crate::store::value_text) {
            record = record.key(Identifier::primary_key(), key);
        }
        self.audit.append(ctx, record).await;
        Ok(inserted)
    }

    /// Update one row and record the change as a restorable correction.
    #[instrument(skip(self, ctx, values), fields(table = %table, primary_key = %primary_key), err)]
    pub async fn update_row(
        &self,
        ctx: &RequestContext,
        table: &Identifier,
        primary_key: &Identifier,
        key: &str,
        values: Row,
    ) -> EngineResult<Row> {
        if values.is_empty() {
            return Err(EngineError::validation("no fields to update"));
        }
        if values.contains_key(primary_key.as_str()) {
            return Err(EngineError::validation("the primary key cannot be edited"));
        }
        let values = self.checked_fields(ctx, table, values).await?;
        self.require_column(table, primary_key).await?;

        let mut tx = self.store.begin().await?;
        let result = Self::update_in(&mut *tx, ctx, table, primary_key, key, &values).await;
        let (before, after) = settle(tx, result).await?;

        self.audit
            .append(
                ctx,
                AuditRecord::new(AuditOperation::Update, table.clone())
                    .key(primary_key.clone(), key)
                    .before(JsonValue::Object(before))
                    .after(JsonValue::Object(after.clone())),
            )
            .await;
        Ok(after)
    }

    async fn update_in(
        tx: &mut dyn StoreTx,
        ctx: &RequestContext,
        table: &Identifier,
        primary_key: &Identifier,
        key: &str,
        values: &Row,
    ) -> EngineResult<(Row, Row)> {
        let filter = Filter::eq(primary_key.clone(), key);
        let before = single(tx.select_for_update(table, &filter).await?, table, primary_key, key)?;

        tx.update(table, &filter, values).await?;
        let after = single(tx.select(table, &filter, Some(1)).await?, table, primary_key, key)?;

        let prior = values
            .keys()
            .map(|name| (name.clone(), before.get(name).cloned().unwrap_or(JsonValue::Null)))
            .collect();
        let correction = NewActivity::new(ActivityDelta::EditCorrection(RowCorrection {
            table: table.clone(),
            primary_key: primary_key.clone(),
            key: key.to_string(),
            before: prior,
            after: values.clone(),
        }))
        .related(table.as_str(), key)
        .into_activity(ActivityId::new(), ctx.user_id(), Utc::now())?;
        ActivityRecorder::record_in(tx, &correction).await?;

        info!(activity_id = %correction.id, "row corrected");
        Ok((before, after))
    }

    /// Delete one row. A referencing row elsewhere fails with
    /// `referential_integrity`, which callers route to dependency resolution.
    #[instrument(skip(self, ctx), fields(table = %table, primary_key = %primary_key), err)]
    pub async fn delete_row(
        &self,
        ctx: &RequestContext,
        table: &Identifier,
        primary_key: &Identifier,
        key: &str,
    ) -> EngineResult<Row> {
        ensure_owner(ctx.actor())?;
        ensure_unprotected(table)?;
        self.require_column(table, primary_key).await?;

        let mut tx = self.store.begin().await?;
        let result = async {
            let filter = Filter::eq(primary_key.clone(), key);
            let before = single(tx.select_for_update(table, &filter).await?, table, primary_key, key)?;
            tx.delete(table, &filter).await?;
            Ok::<_, EngineError>(before)
        }
        .await;
        let before = settle(tx, result).await?;

        self.audit
            .append(
                ctx,
                AuditRecord::new(AuditOperation::Delete, table.clone())
                    .key(primary_key.clone(), key)
                    .before(JsonValue::Object(before.clone())),
            )
            .await;
        Ok(before)
    }

    /// Owner check, protected-table check and field-name validation.
    async fn checked_fields(&self, ctx: &RequestContext, table: &Identifier, values: Row) -> EngineResult<Row> {
        ensure_owner(ctx.actor())?;
        ensure_unprotected(table)?;

        let columns = self.store.columns(table).await?;
        for name in values.keys() {
            let column = Identifier::parse(name)?;
            if !columns.contains(&column) {
                return Err(EngineError::validation(format!("table {table} has no column {column}")));
            }
        }
        Ok(values)
    }

    async fn require_column(&self, table: &Identifier, column: &Identifier) -> EngineResult<()> {
        if self.store.columns(table).await?.contains(column) {
            Ok(())
        } else {
            Err(EngineError::validation(format!("table {table} has no column {column}")))
        }
    }
}

fn single(rows: Vec<Row>, table: &Identifier, primary_key: &Identifier, key: &str) -> EngineResult<Row> {
    rows.into_iter()
        .next()
        .ok_or_else(|| EngineError::not_found(format!("{table} with {primary_key} = {key}")))
}
