use thiserror::Error;

use shopledger_core::BranchId;

use crate::Actor;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: role '{0}' may not perform administrative operations")]
    OwnerRequired(String),

    #[error("forbidden: actor is not scoped to branch {0}")]
    BranchScope(String),

    #[error("forbidden: operation targets no branch and requires the owner role")]
    Unscoped,
}

/// Require the unrestricted owner role.
///
/// - No IO
/// - No panics
pub fn ensure_owner(actor: &Actor) -> Result<(), AuthzError> {
    if actor.role.is_owner() {
        Ok(())
    } else {
        Err(AuthzError::OwnerRequired(actor.role.to_string()))
    }
}

/// Require that the actor may act on rows belonging to `branch`.
///
/// Owners pass unconditionally. Everyone else must carry the same branch; a
/// target without a branch is owner-only.
pub fn ensure_branch_scope(actor: &Actor, branch: Option<BranchId>) -> Result<(), AuthzError> {
    if actor.role.is_owner() {
        return Ok(());
    }

    match branch {
        None => Err(AuthzError::Unscoped),
        Some(b) if actor.branch_id == Some(b) => Ok(()),
        Some(b) => Err(AuthzError::BranchScope(b.to_string())),
    }
}
