//! Administrative deletion engines.
//!
//! - [`CascadeDeleteEngine`]: delete operator-reviewed dependents, then the target row
//! - [`BulkDeleteEngine`]: soft or hard delete of a whole table behind a typed confirmation
//!
//! Neither engine discovers dependents on its own. Callers obtain them from
//! [`DependencyResolver`](crate::dependencies::DependencyResolver) and pass
//! back what the operator approved.

pub mod bulk;
pub mod cascade;

pub use bulk::{BulkDeleteEngine, BulkDeleteOutcome, BulkDeleteRequest};
pub use cascade::{CascadeDeleteEngine, CascadeDeleteOutcome, CascadeDeleteRequest, DeletedSet, DependentRef};

use shopledger_activity::compensation::is_ledger_table;
use shopledger_core::Identifier;

use crate::error::{EngineError, EngineResult};

/// Refuse the ledger tables, which administrative tooling must never delete
/// from or edit.
pub fn ensure_unprotected(table: &Identifier) -> EngineResult<()> {
    if is_ledger_table(table) {
        return Err(EngineError::validation(format!(
            "table {table} is append-only and cannot be modified by administrative tooling"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_tables_are_protected() {
        assert!(ensure_unprotected(&Identifier::parse("activities").unwrap()).is_err());
        assert!(ensure_unprotected(&Identifier::parse("admin_audit_log").unwrap()).is_err());
        assert!(ensure_unprotected(&Identifier::parse("products").unwrap()).is_ok());
    }
}
