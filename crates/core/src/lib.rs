//! `shopledger-core`: foundation building blocks shared by the ledger crates.
//!
//! This crate contains **pure** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod ident;

pub use error::{DomainError, DomainResult};
pub use id::{ActivityId, AuditEntryId, BranchId, ExpenseId, ProductId, SaleId, UserId};
pub use ident::Identifier;
