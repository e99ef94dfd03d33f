//! Compensation rules: the inverse mutation for each activity type.
//!
//! | type | compensation |
//! |------|--------------|
//! | `sell` | put each sold quantity back into the branch inventory |
//! | `stock_add` | remove the added quantity, floored at zero |
//! | `stock_reduce` | put the removed quantity back |
//! | `transfer` | move every line back from `to_branch` to `from_branch` (destination must still hold it) |
//! | `expense_add` | delete the expense row |
//! | `product_create` | deactivate the product (`is_active = false`) |
//! | `product_update` | write the captured `before` values back to `products` |
//! | `edit_correction` | write the captured `before` values back to the corrected row |
//! | `refund`, `restore` | terminal, rejected |
//!
//! Planning is pure. Executing a plan against a store is the restore
//! engine's job.

use shopledger_core::{BranchId, DomainError, DomainResult, Identifier, ProductId};

use crate::activity::Activity;
use crate::delta::{ActivityDelta, Fields};

pub const INVENTORY_TABLE: &str = "inventory";
pub const EXPENSES_TABLE: &str = "expenses";
pub const PRODUCTS_TABLE: &str = "products";
pub const ACTIVITIES_TABLE: &str = "activities";
pub const AUDIT_TABLE: &str = "admin_audit_log";

/// Append-only ledger tables. Nothing restorable may write to them.
pub const LEDGER_TABLES: &[&str] = &[ACTIVITIES_TABLE, AUDIT_TABLE];

pub fn is_ledger_table(table: &Identifier) -> bool {
    LEDGER_TABLES.contains(&table.as_str())
}

/// How a stock decrease behaves when the current quantity is too small.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StockRule {
    /// Clamp the result at zero.
    FloorAtZero,
    /// Fail unless the full quantity is available.
    RequireAvailable,
}

impl StockRule {
    /// Quantity after applying `change` to `current`.
    pub fn apply(self, current: i64, change: i64) -> DomainResult<i64> {
        let next = current
            .checked_add(change)
            .ok_or_else(|| DomainError::validation("stock quantity overflow"))?;
        if next >= 0 {
            return Ok(next);
        }
        match self {
            StockRule::FloorAtZero => Ok(0),
            StockRule::RequireAvailable => Err(DomainError::conflict(format!(
                "insufficient stock: {current} available, {} required",
                -change
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompensationStep {
    AdjustStock {
        product_id: ProductId,
        branch_id: BranchId,
        change: i64,
        rule: StockRule,
    },
    DeleteExpense {
        expense_key: String,
    },
    DeactivateProduct {
        product_id: ProductId,
    },
    RestoreFields {
        table: Identifier,
        primary_key: Identifier,
        key: String,
        fields: Fields,
    },
}

/// Ordered list of steps that together undo one activity.
#[derive(Debug, Clone, PartialEq)]
pub struct CompensationPlan {
    pub steps: Vec<CompensationStep>,
}

/// Compute the compensation for `activity`.
///
/// Fails with `Conflict` when the activity was already reversed and with
/// `InvariantViolation` for terminal types.
pub fn compensation_for(activity: &Activity) -> DomainResult<CompensationPlan> {
    activity.ensure_restorable()?;

    let steps = match &activity.delta {
        ActivityDelta::Sell(sale) => sale
            .items
            .iter()
            .map(|line| CompensationStep::AdjustStock {
                product_id: line.product_id,
                branch_id: sale.branch_id,
                change: line.quantity,
                rule: StockRule::RequireAvailable,
            })
            .collect(),
        ActivityDelta::StockAdd(m) => vec![CompensationStep::AdjustStock {
            product_id: m.product_id,
            branch_id: m.branch_id,
            change: -m.quantity,
            rule: StockRule::FloorAtZero,
        }],
        ActivityDelta::StockReduce(m) => vec![CompensationStep::AdjustStock {
            product_id: m.product_id,
            branch_id: m.branch_id,
            change: m.quantity,
            rule: StockRule::RequireAvailable,
        }],
        ActivityDelta::Transfer(t) => {
            let mut steps = Vec::with_capacity(t.items.len() * 2);
            for line in &t.items {
                steps.push(CompensationStep::AdjustStock {
                    product_id: line.product_id,
                    branch_id: t.to_branch,
                    change: -line.quantity,
                    rule: StockRule::RequireAvailable,
                });
                steps.push(CompensationStep::AdjustStock {
                    product_id: line.product_id,
                    branch_id: t.from_branch,
                    change: line.quantity,
                    rule: StockRule::RequireAvailable,
                });
            }
            steps
        }
        ActivityDelta::ExpenseAdd(e) => {
            let expense_key = e
                .expense_id
                .map(|id| id.to_string())
                .or_else(|| activity.related_entity.as_ref().map(|r| r.entity_id.clone()))
                .ok_or_else(|| {
                    DomainError::validation("expense activity carries no expense reference")
                })?;
            vec![CompensationStep::DeleteExpense { expense_key }]
        }
        ActivityDelta::ProductCreate(p) => vec![CompensationStep::DeactivateProduct {
            product_id: p.product_id,
        }],
        ActivityDelta::ProductUpdate(p) => vec![CompensationStep::RestoreFields {
            table: Identifier::parse(PRODUCTS_TABLE)?,
            primary_key: Identifier::primary_key(),
            key: p.product_id.to_string(),
            fields: p.before.clone(),
        }],
        ActivityDelta::EditCorrection(c) if is_ledger_table(&c.table) => {
            return Err(DomainError::invariant(format!(
                "correction targets ledger table {}",
                c.table
            )));
        }
        ActivityDelta::EditCorrection(c) => vec![CompensationStep::RestoreFields {
            table: c.table.clone(),
            primary_key: c.primary_key.clone(),
            key: c.key.clone(),
            fields: c.before.clone(),
        }],
        ActivityDelta::Refund(_) | ActivityDelta::Restore(_) => {
            // Unreachable after ensure_restorable, kept for exhaustiveness.
            return Err(DomainError::invariant(format!(
                "{} activities are terminal",
                activity.activity_type()
            )));
        }
    };

    Ok(CompensationPlan { steps })
}

impl CompensationPlan {
    /// Every branch whose inventory the plan changes, deduplicated.
    pub fn branches(&self) -> Vec<BranchId> {
        let mut branches = Vec::new();
        for step in &self.steps {
            if let CompensationStep::AdjustStock { branch_id, .. } = step {
                if !branches.contains(branch_id) {
                    branches.push(*branch_id);
                }
            }
        }
        branches
    }

    /// Whether the plan rewrites rows shared by all branches (products,
    /// arbitrary corrected rows).
    pub fn touches_shared_rows(&self) -> bool {
        self.steps.iter().any(|step| {
            matches!(
                step,
                CompensationStep::DeactivateProduct { .. } | CompensationStep::RestoreFields { .. }
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{ActivityStatus, NewActivity};
    use crate::delta::{
        ExpenseDelta, ProductChange, ProductCreated, RefundDelta, RowCorrection, SaleDelta,
        SaleLine, StockMovement, TransferDelta, TransferLine,
    };
    use chrono::Utc;
    use serde_json::json;
    use shopledger_core::{ActivityId, ExpenseId};

    fn record(new: NewActivity) -> Activity {
        new.into_activity(ActivityId::new(), None, Utc::now()).unwrap()
    }

    #[test]
    fn sale_puts_every_line_back() {
        let branch = BranchId::new();
        let (p1, p2) = (ProductId::new(), ProductId::new());
        let activity = record(NewActivity::new(ActivityDelta::Sell(SaleDelta {
            sale_id: None,
            branch_id: branch,
            items: vec![
                SaleLine { product_id: p1, quantity: 2, unit_price: 100 },
                SaleLine { product_id: p2, quantity: 5, unit_price: 40 },
            ],
            total_amount: 400,
        })));

        let plan = compensation_for(&activity).unwrap();
        assert_eq!(
            plan.steps,
            vec![
                CompensationStep::AdjustStock { product_id: p1, branch_id: branch, change: 2, rule: StockRule::RequireAvailable },
                CompensationStep::AdjustStock { product_id: p2, branch_id: branch, change: 5, rule: StockRule::RequireAvailable },
            ]
        );
    }

    #[test]
    fn stock_add_is_undone_with_floor() {
        let m = StockMovement {
            product_id: ProductId::new(),
            branch_id: BranchId::new(),
            quantity: 7,
            previous_quantity: Some(3),
        };
        let plan = compensation_for(&record(NewActivity::new(ActivityDelta::StockAdd(m.clone()))))
            .unwrap();
        assert_eq!(
            plan.steps,
            vec![CompensationStep::AdjustStock {
                product_id: m.product_id,
                branch_id: m.branch_id,
                change: -7,
                rule: StockRule::FloorAtZero,
            }]
        );
    }

    #[test]
    fn transfer_takes_back_from_destination_first() {
        let (from, to) = (BranchId::new(), BranchId::new());
        let product = ProductId::new();
        let activity = record(NewActivity::new(ActivityDelta::Transfer(TransferDelta {
            from_branch: from,
            to_branch: to,
            items: vec![TransferLine { product_id: product, quantity: 4 }],
        })));

        let plan = compensation_for(&activity).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(
            plan.steps[0],
            CompensationStep::AdjustStock { product_id: product, branch_id: to, change: -4, rule: StockRule::RequireAvailable }
        );
        assert_eq!(
            plan.steps[1],
            CompensationStep::AdjustStock { product_id: product, branch_id: from, change: 4, rule: StockRule::RequireAvailable }
        );
    }

    #[test]
    fn expense_key_falls_back_to_related_entity() {
        let expense = ExpenseId::new();
        let activity = record(
            NewActivity::new(ActivityDelta::ExpenseAdd(ExpenseDelta {
                expense_id: None,
                amount: 500,
                category: "utilities".to_string(),
            }))
            .related("expenses", expense),
        );

        let plan = compensation_for(&activity).unwrap();
        assert_eq!(
            plan.steps,
            vec![CompensationStep::DeleteExpense { expense_key: expense.to_string() }]
        );
    }

    #[test]
    fn expense_without_any_reference_is_rejected() {
        let activity = record(NewActivity::new(ActivityDelta::ExpenseAdd(ExpenseDelta {
            expense_id: None,
            amount: 500,
            category: "utilities".to_string(),
        })));
        assert!(matches!(compensation_for(&activity), Err(DomainError::Validation(_))));
    }

    #[test]
    fn product_update_restores_prior_values() {
        let product = ProductId::new();
        let mut before = Fields::new();
        before.insert("price".to_string(), json!(1200));
        let mut after = Fields::new();
        after.insert("price".to_string(), json!(1500));

        let activity = record(NewActivity::new(ActivityDelta::ProductUpdate(ProductChange {
            product_id: product,
            before: before.clone(),
            after,
        })));

        match &compensation_for(&activity).unwrap().steps[..] {
            [CompensationStep::RestoreFields { table, key, fields, .. }] => {
                assert_eq!(table, &"products");
                assert_eq!(key, &product.to_string());
                assert_eq!(fields, &before);
            }
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn refund_is_terminal() {
        let activity = record(NewActivity::new(ActivityDelta::Refund(RefundDelta {
            sale_id: None,
            amount: 100,
            items: vec![],
        })));
        assert!(matches!(
            compensation_for(&activity),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn reversed_activity_has_no_plan() {
        let mut activity = record(NewActivity::new(ActivityDelta::StockReduce(StockMovement {
            product_id: ProductId::new(),
            branch_id: BranchId::new(),
            quantity: 1,
            previous_quantity: None,
        })));
        activity.status = ActivityStatus::Reversed;
        assert!(matches!(compensation_for(&activity), Err(DomainError::Conflict(_))));
    }

    #[test]
    fn correction_of_a_ledger_row_has_no_plan() {
        let mut activity = record(NewActivity::new(ActivityDelta::EditCorrection(RowCorrection {
            table: Identifier::parse("customers").unwrap(),
            primary_key: Identifier::primary_key(),
            key: "42".to_string(),
            before: json!({"status": "completed"}).as_object().cloned().unwrap(),
            after: Fields::new(),
        })));
        // Rows written before ledger tables were refused at record time.
        if let ActivityDelta::EditCorrection(c) = &mut activity.delta {
            c.table = Identifier::parse(ACTIVITIES_TABLE).unwrap();
        }
        assert!(matches!(
            compensation_for(&activity),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn plan_reports_every_branch_it_touches() {
        let (from, to) = (BranchId::new(), BranchId::new());
        let transfer = record(NewActivity::new(ActivityDelta::Transfer(TransferDelta {
            from_branch: from,
            to_branch: to,
            items: vec![
                TransferLine { product_id: ProductId::new(), quantity: 1 },
                TransferLine { product_id: ProductId::new(), quantity: 2 },
            ],
        })));
        let plan = compensation_for(&transfer).unwrap();
        assert_eq!(plan.branches(), vec![to, from]);
        assert!(!plan.touches_shared_rows());

        let create = record(NewActivity::new(ActivityDelta::ProductCreate(ProductCreated {
            product_id: ProductId::new(),
            fields: Fields::new(),
        })));
        let plan = compensation_for(&create).unwrap();
        assert!(plan.branches().is_empty());
        assert!(plan.touches_shared_rows());
    }

    #[test]
    fn require_available_rejects_shortfall() {
        assert_eq!(StockRule::RequireAvailable.apply(10, -4), Ok(6));
        assert!(matches!(
            StockRule::RequireAvailable.apply(3, -4),
            Err(DomainError::Conflict(_))
        ));
        assert_eq!(StockRule::FloorAtZero.apply(3, -4), Ok(0));
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 1000,
                max_global_rejects: 10_000,
                ..ProptestConfig::default()
            })]

            /// Property: floored decreases never go negative and never remove more than asked.
            #[test]
            fn floor_never_negative(current in 0i64..1_000_000, qty in 1i64..1_000_000) {
                let next = StockRule::FloorAtZero.apply(current, -qty).unwrap();
                prop_assert!(next >= 0);
                prop_assert_eq!(next, (current - qty).max(0));
            }

            /// Property: increases are exact under both rules.
            #[test]
            fn increases_are_exact(current in 0i64..1_000_000, qty in 1i64..1_000_000) {
                prop_assert_eq!(StockRule::FloorAtZero.apply(current, qty).unwrap(), current + qty);
                prop_assert_eq!(StockRule::RequireAvailable.apply(current, qty).unwrap(), current + qty);
            }

            /// Property: reducing then restoring Q leaves the quantity unchanged when stock suffices.
            #[test]
            fn reduce_then_restore_is_identity(current in 0i64..1_000_000, qty in 1i64..1_000_000) {
                prop_assume!(qty <= current);
                let reduced = StockRule::RequireAvailable.apply(current, -qty).unwrap();
                let restored = StockRule::RequireAvailable.apply(reduced, qty).unwrap();
                prop_assert_eq!(restored, current);
            }
        }
    }
}
