//! Activity ledger routes: record, preview a restore, commit a restore.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use shopledger_auth::RequestContext;
use shopledger_core::ActivityId;
use shopledger_infra::activity_log::ActivityRecorder;

use crate::app::dto::{self, PreviewResponse, RecordActivityRequest, RecordActivityResponse, RestoreRequest};
use crate::app::errors::{engine_error_to_response, json_error};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(record_activity))
        .route("/:id/restore/preview", post(preview_restore))
        .route("/:id/restore", post(commit_restore))
}

fn parse_activity_id(raw: &str) -> Result<ActivityId, axum::response::Response> {
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "validation_error", "invalid activity id"))
}

/// POST /activities - Record a business mutation
///
/// Recording never fails the caller once the payload is valid: a store
/// failure answers `202` with `recorded: false`.
pub async fn record_activity(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<RecordActivityRequest>, JsonRejection>,
) -> axum::response::Response {
    let request = match dto::body(payload) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let mut new = match request.into_new_activity() {
        Ok(n) => n,
        Err(e) => return engine_error_to_response(e.into()),
    };

    // Branch users record against their own branch.
    if new.branch_id.is_none() {
        new.branch_id = ctx.actor().branch_id;
    }
    if let Err(e) = ActivityRecorder::authorize(&ctx, &new) {
        return engine_error_to_response(e);
    }
    if let Err(e) = new.delta.validate() {
        return engine_error_to_response(e.into());
    }

    let id = services.recorder.record(&ctx, new).await;
    (
        StatusCode::ACCEPTED,
        Json(RecordActivityResponse {
            recorded: id.is_some(),
            id,
        }),
    )
        .into_response()
}

/// POST /activities/:id/restore/preview - Dry run, writes nothing
pub async fn preview_restore(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_activity_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.restore.preview_restore(&ctx, id).await {
        Ok(data) => (StatusCode::OK, Json(PreviewResponse { success: true, data })).into_response(),
        Err(e) => engine_error_to_response(e),
    }
}

/// POST /activities/:id/restore - Apply the compensation and mark reversed
pub async fn commit_restore(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    payload: Result<Json<RestoreRequest>, JsonRejection>,
) -> axum::response::Response {
    let id = match parse_activity_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let request = match dto::body(payload) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match services.restore.commit_restore(&ctx, id, &request.reason).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => engine_error_to_response(e),
    }
}
