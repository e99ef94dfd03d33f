use serde::{Deserialize, Serialize};

use shopledger_core::{BranchId, UserId};

use crate::Role;

/// The acting identity, as supplied by the identity/session provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Option<UserId>,
    pub email: Option<String>,
    pub role: Role,
    pub branch_id: Option<BranchId>,
}

impl Actor {
    pub fn owner(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            email: None,
            role: Role::OWNER,
            branch_id: None,
        }
    }

    pub fn branch_user(user_id: UserId, role: Role, branch_id: BranchId) -> Self {
        Self {
            user_id: Some(user_id),
            email: None,
            role,
            branch_id: Some(branch_id),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Explicit per-request context threaded through every ledger call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    actor: Actor,
    ip: Option<String>,
}

impl RequestContext {
    pub fn new(actor: Actor) -> Self {
        Self { actor, ip: None }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.actor.user_id
    }

    pub fn ip(&self) -> Option<&str> {
        self.ip.as_deref()
    }
}
