//! Infrastructure layer: relational store adapters and the ledger engines
//! that run on them.
//!
//! Every engine takes an explicit [`RequestContext`](shopledger_auth::RequestContext)
//! and talks to the database only through the [`store::Store`] boundary.

pub mod activity_log;
pub mod audit_trail;
pub mod dependencies;
pub mod deletion;
pub mod error;
pub mod restore;
pub mod rows;
pub mod store;

pub use activity_log::ActivityRecorder;
pub use audit_trail::{AuditEntry, AuditOperation, AuditQuery, AuditRecord, AuditTrail};
pub use dependencies::{DependencyDescriptor, DependencyResolver};
pub use deletion::{
    BulkDeleteEngine, BulkDeleteOutcome, BulkDeleteRequest, CascadeDeleteEngine, CascadeDeleteOutcome,
    CascadeDeleteRequest, DependentRef,
};
pub use error::{EngineError, EngineResult};
pub use restore::{RestoreEngine, RestoreOutcome, RestorePreview};
pub use rows::RowEditor;
