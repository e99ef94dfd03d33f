//! `shopledger-auth`: the consumed side of authentication.
//!
//! Token issuance lives elsewhere. This crate turns a verified token into an
//! [`Actor`] (id, role, branch scope) and answers the two scoping questions
//! the ledger asks: "is this the owner?" and "may this actor touch that branch?".
//!
//! This crate is intentionally decoupled from HTTP and storage.

pub mod authorize;
pub mod claims;
pub mod identity;
pub mod roles;

pub use authorize::{AuthzError, ensure_branch_scope, ensure_owner};
pub use claims::{Hs256JwtValidator, JwtClaims, JwtValidator, TokenValidationError, validate_claims};
pub use identity::{Actor, RequestContext};
pub use roles::Role;
