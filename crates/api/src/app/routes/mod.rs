use axum::{routing::get, Router};

pub mod activities;
pub mod admin;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/activities", activities::router())
        .nest("/admin", admin::router())
}
