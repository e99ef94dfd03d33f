//! Type-shaped projection of what a restore would change.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value as JsonValue;

use shopledger_activity::compensation::INVENTORY_TABLE;
use shopledger_activity::{Activity, ActivityDelta, CompensationPlan, CompensationStep, StockRule};
use shopledger_core::{BranchId, Identifier, ProductId};

use crate::error::{EngineError, EngineResult};
use crate::store::{Filter, RowExt, StoreTx};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockLineProjection {
    pub product_id: ProductId,
    pub quantity: i64,
    pub current_quantity: i64,
    pub projected_quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferLineProjection {
    pub product_id: ProductId,
    pub quantity: i64,
    pub from_current: i64,
    pub from_projected: i64,
    pub to_current: i64,
    pub to_projected: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldProjection {
    pub current: JsonValue,
    pub restored: JsonValue,
}

/// What a restore will do, shaped after the activity type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RestorePreview {
    Sale {
        items: Vec<StockLineProjection>,
        total_amount: i64,
    },
    Expense {
        amount: i64,
        category: String,
    },
    Transfer {
        from_branch: BranchId,
        to_branch: BranchId,
        items: Vec<TransferLineProjection>,
    },
    Stock {
        product_id: ProductId,
        branch_id: BranchId,
        quantity: i64,
        current_quantity: i64,
        projected_quantity: i64,
    },
    Fields {
        table: Identifier,
        key: String,
        fields: BTreeMap<String, FieldProjection>,
    },
    Product {
        product_id: ProductId,
        is_active: bool,
    },
}

impl RestorePreview {
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// Current inventory quantity of `product` at `branch`; a missing row is zero.
pub(crate) async fn stock_level(tx: &mut dyn StoreTx, product: ProductId, branch: BranchId) -> EngineResult<i64> {
    let rows = tx
        .select(&Identifier::parse(INVENTORY_TABLE)?, &stock_filter(product, branch)?, Some(1))
        .await?;
    Ok(rows.first().and_then(|r| r.int("quantity")).unwrap_or(0))
}

pub(crate) fn stock_filter(product: ProductId, branch: BranchId) -> EngineResult<Filter> {
    Ok(Filter::eq("product_id".parse()?, product.to_string()).and("branch_id".parse()?, branch.to_string()))
}

/// Compute the projection without writing anything.
///
/// Stock shortfalls that would make the restore fail are reported here too,
/// so a preview never promises something the commit cannot do.
pub(crate) async fn project(
    tx: &mut dyn StoreTx,
    activity: &Activity,
    plan: &CompensationPlan,
) -> EngineResult<RestorePreview> {
    match &activity.delta {
        ActivityDelta::Sell(sale) => {
            let mut items = Vec::with_capacity(sale.items.len());
            for line in &sale.items {
                let current = stock_level(tx, line.product_id, sale.branch_id).await?;
                items.push(StockLineProjection {
                    product_id: line.product_id,
                    quantity: line.quantity,
                    current_quantity: current,
                    projected_quantity: StockRule::RequireAvailable.apply(current, line.quantity)?,
                });
            }
            Ok(RestorePreview::Sale {
                items,
                total_amount: sale.total_amount,
            })
        }
        ActivityDelta::StockAdd(m) | ActivityDelta::StockReduce(m) => {
            let (change, rule) = match plan.steps.first() {
                Some(CompensationStep::AdjustStock { change, rule, .. }) => (*change, *rule),
                _ => return Err(EngineError::invalid_state("stock activity has no stock compensation")),
            };
            let current = stock_level(tx, m.product_id, m.branch_id).await?;
            Ok(RestorePreview::Stock {
                product_id: m.product_id,
                branch_id: m.branch_id,
                quantity: m.quantity,
                current_quantity: current,
                projected_quantity: rule.apply(current, change)?,
            })
        }
        ActivityDelta::Transfer(t) => {
            let mut items = Vec::with_capacity(t.items.len());
            for line in &t.items {
                let to_current = stock_level(tx, line.product_id, t.to_branch).await?;
                let from_current = stock_level(tx, line.product_id, t.from_branch).await?;
                items.push(TransferLineProjection {
                    product_id: line.product_id,
                    quantity: line.quantity,
                    from_current,
                    from_projected: StockRule::RequireAvailable.apply(from_current, line.quantity)?,
                    to_current,
                    to_projected: StockRule::RequireAvailable.apply(to_current, -line.quantity)?,
                });
            }
            Ok(RestorePreview::Transfer {
                from_branch: t.from_branch,
                to_branch: t.to_branch,
                items,
            })
        }
        ActivityDelta::ExpenseAdd(e) => Ok(RestorePreview::Expense {
            amount: e.amount,
            category: e.category.clone(),
        }),
        ActivityDelta::ProductCreate(p) => Ok(RestorePreview::Product {
            product_id: p.product_id,
            is_active: false,
        }),
        ActivityDelta::ProductUpdate(_) | ActivityDelta::EditCorrection(_) => {
            let Some(CompensationStep::RestoreFields {
                table,
                primary_key,
                key,
                fields,
            }) = plan.steps.first()
            else {
                return Err(EngineError::invalid_state("correction has no field compensation"));
            };
            let current = tx
                .select(table, &Filter::eq(primary_key.clone(), key.as_str()), Some(1))
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| EngineError::not_found(format!("{table} with {primary_key} = {key}")))?;

            let fields = fields
                .iter()
                .map(|(name, restored)| {
                    let projection = FieldProjection {
                        current: current.get(name).cloned().unwrap_or(JsonValue::Null),
                        restored: restored.clone(),
                    };
                    (name.clone(), projection)
                })
                .collect();
            Ok(RestorePreview::Fields {
                table: table.clone(),
                key: key.clone(),
                fields,
            })
        }
        ActivityDelta::Refund(_) | ActivityDelta::Restore(_) => Err(EngineError::invalid_state(format!(
            "{} activities are terminal",
            activity.activity_type()
        ))),
    }
}
