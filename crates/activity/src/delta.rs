//! Typed delta payloads, one per activity type.
//!
//! A delta must be self-sufficient to compute the compensation for its type,
//! so every payload is validated when the activity is recorded rather than
//! when someone later tries to undo it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use shopledger_core::{
    ActivityId, BranchId, DomainError, DomainResult, ExpenseId, Identifier, ProductId, SaleId,
};

use crate::ActivityType;
use crate::compensation::is_ledger_table;

/// Column/value snapshot of a row (subset of its columns).
pub type Fields = Map<String, JsonValue>;

/// One sold line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub product_id: ProductId,
    pub quantity: i64,
    #[serde(default)]
    pub unit_price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleDelta {
    #[serde(default)]
    pub sale_id: Option<SaleId>,
    pub branch_id: BranchId,
    pub items: Vec<SaleLine>,
    pub total_amount: i64,
}

/// A single-product inventory movement at one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub product_id: ProductId,
    pub branch_id: BranchId,
    pub quantity: i64,
    #[serde(default)]
    pub previous_quantity: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub product_id: ProductId,
    #[serde(default)]
    pub fields: Fields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductChange {
    pub product_id: ProductId,
    pub before: Fields,
    #[serde(default)]
    pub after: Fields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseDelta {
    /// Falls back to the activity's related entity id when absent.
    #[serde(default)]
    pub expense_id: Option<ExpenseId>,
    pub amount: i64,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDelta {
    pub from_branch: BranchId,
    pub to_branch: BranchId,
    pub items: Vec<TransferLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundDelta {
    #[serde(default)]
    pub sale_id: Option<SaleId>,
    pub amount: i64,
    #[serde(default)]
    pub items: Vec<SaleLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreDelta {
    pub reversed_activity_id: ActivityId,
    pub reversed_type: ActivityType,
    pub reason: String,
    /// Projection of what the restore changed, as shown by the preview.
    #[serde(default)]
    pub effect: JsonValue,
}

/// Manual correction of an arbitrary row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowCorrection {
    pub table: Identifier,
    #[serde(default = "Identifier::primary_key")]
    pub primary_key: Identifier,
    pub key: String,
    pub before: Fields,
    #[serde(default)]
    pub after: Fields,
}

/// Delta of an activity, tagged by its type.
///
/// The serialized form is `{"type": "...", "delta": {...}}`, which maps onto
/// the `type` and `delta` columns of the `activities` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "delta", rename_all = "snake_case")]
pub enum ActivityDelta {
    Sell(SaleDelta),
    StockAdd(StockMovement),
    StockReduce(StockMovement),
    ProductCreate(ProductCreated),
    ProductUpdate(ProductChange),
    ExpenseAdd(ExpenseDelta),
    Transfer(TransferDelta),
    Refund(RefundDelta),
    Restore(RestoreDelta),
    EditCorrection(RowCorrection),
}

impl ActivityDelta {
    pub fn activity_type(&self) -> ActivityType {
        match self {
            ActivityDelta::Sell(_) => ActivityType::Sell,
            ActivityDelta::StockAdd(_) => ActivityType::StockAdd,
            ActivityDelta::StockReduce(_) => ActivityType::StockReduce,
            ActivityDelta::ProductCreate(_) => ActivityType::ProductCreate,
            ActivityDelta::ProductUpdate(_) => ActivityType::ProductUpdate,
            ActivityDelta::ExpenseAdd(_) => ActivityType::ExpenseAdd,
            ActivityDelta::Transfer(_) => ActivityType::Transfer,
            ActivityDelta::Refund(_) => ActivityType::Refund,
            ActivityDelta::Restore(_) => ActivityType::Restore,
            ActivityDelta::EditCorrection(_) => ActivityType::EditCorrection,
        }
    }

    /// Branches whose inventory this delta moved. Empty for deltas that touch
    /// no branch-owned rows.
    pub fn branches(&self) -> Vec<BranchId> {
        match self {
            ActivityDelta::Sell(d) => vec![d.branch_id],
            ActivityDelta::StockAdd(d) | ActivityDelta::StockReduce(d) => vec![d.branch_id],
            ActivityDelta::Transfer(d) => vec![d.from_branch, d.to_branch],
            _ => Vec::new(),
        }
    }

    /// Split into the `(type, delta)` column pair.
    pub fn to_parts(&self) -> DomainResult<(ActivityType, JsonValue)> {
        let mut tagged = serde_json::to_value(self)
            .map_err(|e| DomainError::validation(format!("delta serialization failed: {e}")))?;
        let payload = tagged
            .get_mut("delta")
            .map(JsonValue::take)
            .unwrap_or(JsonValue::Null);
        Ok((self.activity_type(), payload))
    }

    /// Rebuild from the `(type, delta)` column pair.
    pub fn from_parts(activity_type: ActivityType, payload: JsonValue) -> DomainResult<Self> {
        let tagged = serde_json::json!({
            "type": activity_type.as_str(),
            "delta": payload,
        });
        serde_json::from_value(tagged).map_err(|e| {
            DomainError::validation(format!("malformed {activity_type} delta: {e}"))
        })
    }

    pub fn validate(&self) -> DomainResult<()> {
        match self {
            ActivityDelta::Sell(d) => {
                require_items(d.items.len())?;
                for line in &d.items {
                    require_positive("quantity", line.quantity)?;
                    require_non_negative("unit_price", line.unit_price)?;
                }
                require_non_negative("total_amount", d.total_amount)
            }
            ActivityDelta::StockAdd(d) | ActivityDelta::StockReduce(d) => {
                require_positive("quantity", d.quantity)?;
                if let Some(prev) = d.previous_quantity {
                    require_non_negative("previous_quantity", prev)?;
                }
                Ok(())
            }
            ActivityDelta::ProductCreate(d) => validate_field_names(&d.fields),
            ActivityDelta::ProductUpdate(d) => {
                require_fields(&d.before)?;
                validate_field_names(&d.before)?;
                validate_field_names(&d.after)
            }
            ActivityDelta::ExpenseAdd(d) => {
                require_non_negative("amount", d.amount)?;
                if d.category.trim().is_empty() {
                    return Err(DomainError::validation("category cannot be empty"));
                }
                Ok(())
            }
            ActivityDelta::Transfer(d) => {
                if d.from_branch == d.to_branch {
                    return Err(DomainError::validation(
                        "transfer source and destination must differ",
                    ));
                }
                require_items(d.items.len())?;
                for (i, line) in d.items.iter().enumerate() {
                    require_positive("quantity", line.quantity)?;
                    if d.items[..i].iter().any(|prior| prior.product_id == line.product_id) {
                        return Err(DomainError::validation(format!(
                            "product {} appears on more than one transfer line",
                            line.product_id
                        )));
                    }
                }
                Ok(())
            }
            ActivityDelta::Refund(d) => {
                require_non_negative("amount", d.amount)?;
                for line in &d.items {
                    require_positive("quantity", line.quantity)?;
                }
                Ok(())
            }
            ActivityDelta::Restore(d) => {
                if d.reason.trim().is_empty() {
                    return Err(DomainError::validation("restore reason cannot be empty"));
                }
                Ok(())
            }
            ActivityDelta::EditCorrection(d) => {
                if d.key.is_empty() {
                    return Err(DomainError::validation("correction key cannot be empty"));
                }
                if is_ledger_table(&d.table) {
                    return Err(DomainError::validation(format!(
                        "table {} is append-only and cannot be corrected",
                        d.table
                    )));
                }
                require_fields(&d.before)?;
                validate_field_names(&d.before)?;
                validate_field_names(&d.after)?;
                if d.before.contains_key(d.primary_key.as_str()) {
                    return Err(DomainError::validation(
                        "correction cannot rewrite the primary key",
                    ));
                }
                Ok(())
            }
        }
    }
}

fn require_positive(field: &str, value: i64) -> DomainResult<()> {
    if value <= 0 {
        return Err(DomainError::validation(format!("{field} must be positive")));
    }
    Ok(())
}

fn require_non_negative(field: &str, value: i64) -> DomainResult<()> {
    if value < 0 {
        return Err(DomainError::validation(format!("{field} cannot be negative")));
    }
    Ok(())
}

fn require_items(count: usize) -> DomainResult<()> {
    if count == 0 {
        return Err(DomainError::validation("at least one item is required"));
    }
    Ok(())
}

fn require_fields(fields: &Fields) -> DomainResult<()> {
    if fields.is_empty() {
        return Err(DomainError::validation("prior field values are required"));
    }
    Ok(())
}

fn validate_field_names(fields: &Fields) -> DomainResult<()> {
    for name in fields.keys() {
        Identifier::parse(name)?;
    }
    Ok(())
}
