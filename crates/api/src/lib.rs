//! HTTP API: configuration, authentication, routing and response mapping
//! over the ledger engines.

pub mod app;
pub mod config;
pub mod context;
pub mod middleware;
