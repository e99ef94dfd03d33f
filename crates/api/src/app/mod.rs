//! HTTP API application wiring (Axum router + engine wiring).
//!
//! - `services.rs`: store selection and the engines sharing it
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use shopledger_infra::store::Store;

use crate::config::Config;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router from loaded configuration (used by `main.rs`).
pub async fn build_app(config: &Config) -> anyhow::Result<Router> {
    let services = services::build_services(config).await?;
    Ok(router(services, &config.jwt_secret))
}

/// Build the router over an already-open store.
pub fn build_app_with_store(store: Arc<dyn Store>, jwt_secret: &str, dependency_sample_limit: usize) -> Router {
    router(services::AppServices::new(store, dependency_sample_limit), jwt_secret)
}

fn router(services: services::AppServices, jwt_secret: &str) -> Router {
    let jwt = Arc::new(shopledger_auth::Hs256JwtValidator::new(jwt_secret.as_bytes()));
    let auth_state = middleware::AuthState { jwt };

    // Protected routes: require a verified bearer token.
    let protected = routes::router()
        .layer(Extension(Arc::new(services)))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new().layer(axum::middleware::from_fn(middleware::trace_requests)))
}
