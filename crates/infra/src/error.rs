//! Error surface shared by the ledger and deletion engines.

use serde::Serialize;
use thiserror::Error;

use shopledger_auth::AuthzError;
use shopledger_core::DomainError;

use crate::store::StoreError;

pub type EngineResult<T> = Result<T, EngineError>;

/// Failure of an engine operation.
///
/// Every variant carries a stable machine-readable [`code`](EngineError::code)
/// so callers can route a failed delete into the dependency-resolution flow.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed input, rejected before any store access.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The target exists but its state does not allow the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A delete was blocked by a row that still references the target.
    #[error("referential integrity violation: {message}")]
    ReferentialIntegrity {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    #[error("store failure: {0}")]
    Store(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::Unauthorized(_) => "forbidden",
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidState(_) => "invalid_state",
            EngineError::ReferentialIntegrity { .. } => "referential_integrity",
            EngineError::Store(_) => "store_error",
        }
    }

    /// Constraint/table details for referential-integrity failures.
    pub fn details(&self) -> Option<ReferentialIntegrityDetails> {
        match self {
            EngineError::ReferentialIntegrity { constraint, table, .. } => Some(ReferentialIntegrityDetails {
                constraint: constraint.clone(),
                table: table.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferentialIntegrityDetails {
    pub constraint: Option<String>,
    pub table: Option<String>,
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::ReferentialIntegrity {
                constraint,
                table,
                message,
            } => EngineError::ReferentialIntegrity {
                constraint,
                table,
                message,
            },
            StoreError::UnknownTable(t) => EngineError::NotFound(format!("table {t}")),
            StoreError::UnknownColumn { table, column } => {
                EngineError::Validation(format!("unknown column {table}.{column}"))
            }
            StoreError::Conflict(msg) => EngineError::InvalidState(msg),
            StoreError::Backend(msg) => EngineError::Store(msg),
        }
    }
}

impl From<DomainError> for EngineError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => EngineError::Validation(msg),
            DomainError::InvariantViolation(msg) | DomainError::Conflict(msg) => {
                EngineError::InvalidState(msg)
            }
            DomainError::NotFound => EngineError::NotFound("resource".to_string()),
        }
    }
}

impl From<AuthzError> for EngineError {
    fn from(value: AuthzError) -> Self {
        EngineError::Unauthorized(value.to_string())
    }
}
