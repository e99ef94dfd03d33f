use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use shopledger_auth::RequestContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(ctx): Extension<RequestContext>) -> impl IntoResponse {
    let actor = ctx.actor();
    Json(serde_json::json!({
        "user_id": actor.user_id.map(|u| u.to_string()),
        "email": actor.email,
        "role": actor.role.as_str(),
        "branch_id": actor.branch_id.map(|b| b.to_string()),
        "ip": ctx.ip(),
    }))
}
