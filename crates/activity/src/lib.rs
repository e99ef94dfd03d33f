//! Activity ledger domain module.
//!
//! This crate contains the business rules for recorded activities and their
//! compensations, implemented purely as deterministic domain logic (no IO, no
//! HTTP, no storage).

pub mod activity;
pub mod compensation;
pub mod delta;

pub use activity::{Activity, ActivityStatus, ActivityType, NewActivity, RelatedEntity};
pub use compensation::{CompensationPlan, CompensationStep, StockRule, compensation_for};
pub use delta::{
    ActivityDelta, ExpenseDelta, ProductChange, ProductCreated, RefundDelta, RestoreDelta,
    RowCorrection, SaleDelta, SaleLine, StockMovement, TransferDelta, TransferLine,
};
