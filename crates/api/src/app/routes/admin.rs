//! Owner-only administration: dependency lookup, cascade and bulk deletes,
//! single-row edits and the audit log.
//!
//! Role checks happen in the engines; these handlers only parse and map.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::json;

use shopledger_auth::RequestContext;
use shopledger_core::Identifier;
use shopledger_infra::store::Row;
use shopledger_infra::{AuditQuery, BulkDeleteRequest, CascadeDeleteRequest};

use crate::app::dto::{self, AuditLogQuery, DependentsQuery};
use crate::app::errors::{engine_error_to_response, parse_identifier};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/dependents", get(list_dependents))
        .route("/cascade-delete", post(cascade_delete))
        .route("/bulk-delete", post(bulk_delete))
        .route("/rows/:table", post(insert_row))
        .route("/rows/:table/:primary_key/:value", patch(update_row).delete(delete_row))
        .route("/audit-log", get(audit_log))
}

/// GET /admin/dependents?table=&primary_key=&value=
pub async fn list_dependents(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    params: Result<Query<DependentsQuery>, QueryRejection>,
) -> axum::response::Response {
    let params = match dto::query(params) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let table = match parse_identifier(&params.table) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let primary_key = match params.primary_key.as_deref().map(parse_identifier).transpose() {
        Ok(pk) => pk.unwrap_or_else(Identifier::primary_key),
        Err(resp) => return resp,
    };

    match services
        .resolver
        .list_dependents(&ctx, &table, &primary_key, &params.value)
        .await
    {
        Ok(dependents) => (
            StatusCode::OK,
            Json(json!({ "success": true, "dependents": dependents })),
        )
            .into_response(),
        Err(e) => engine_error_to_response(e),
    }
}

/// POST /admin/cascade-delete
pub async fn cascade_delete(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<CascadeDeleteRequest>, JsonRejection>,
) -> axum::response::Response {
    let request = match dto::body(payload) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match services.cascade.cascade_delete(&ctx, request).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => engine_error_to_response(e),
    }
}

/// POST /admin/bulk-delete
pub async fn bulk_delete(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<BulkDeleteRequest>, JsonRejection>,
) -> axum::response::Response {
    let request = match dto::body(payload) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match services.bulk.bulk_delete(&ctx, request).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => engine_error_to_response(e),
    }
}

/// POST /admin/rows/:table
pub async fn insert_row(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(table): Path<String>,
    payload: Result<Json<Row>, JsonRejection>,
) -> axum::response::Response {
    let table = match parse_identifier(&table) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let values = match dto::body(payload) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.rows.insert_row(&ctx, &table, values).await {
        Ok(row) => (StatusCode::CREATED, Json(json!({ "success": true, "row": row }))).into_response(),
        Err(e) => engine_error_to_response(e),
    }
}

/// PATCH /admin/rows/:table/:primary_key/:value
pub async fn update_row(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path((table, primary_key, value)): Path<(String, String, String)>,
    payload: Result<Json<Row>, JsonRejection>,
) -> axum::response::Response {
    let (table, primary_key) = match row_target(&table, &primary_key) {
        Ok(target) => target,
        Err(resp) => return resp,
    };
    let values = match dto::body(payload) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.rows.update_row(&ctx, &table, &primary_key, &value, values).await {
        Ok(row) => (StatusCode::OK, Json(json!({ "success": true, "row": row }))).into_response(),
        Err(e) => engine_error_to_response(e),
    }
}

/// DELETE /admin/rows/:table/:primary_key/:value
///
/// A `409 referential_integrity` answer names the blocking constraint; the
/// client is expected to follow up with `/admin/dependents`.
pub async fn delete_row(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path((table, primary_key, value)): Path<(String, String, String)>,
) -> axum::response::Response {
    let (table, primary_key) = match row_target(&table, &primary_key) {
        Ok(target) => target,
        Err(resp) => return resp,
    };

    match services.rows.delete_row(&ctx, &table, &primary_key, &value).await {
        Ok(row) => (StatusCode::OK, Json(json!({ "success": true, "row": row }))).into_response(),
        Err(e) => engine_error_to_response(e),
    }
}

/// GET /admin/audit-log?table=&limit=
pub async fn audit_log(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    params: Result<Query<AuditLogQuery>, QueryRejection>,
) -> axum::response::Response {
    let params = match dto::query(params) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let table = match params.table.as_deref().map(parse_identifier).transpose() {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match services
        .audit
        .list(&ctx, AuditQuery { table, limit: params.limit })
        .await
    {
        Ok(entries) => (StatusCode::OK, Json(json!({ "success": true, "entries": entries }))).into_response(),
        Err(e) => engine_error_to_response(e),
    }
}

fn row_target(table: &str, primary_key: &str) -> Result<(Identifier, Identifier), axum::response::Response> {
    Ok((parse_identifier(table)?, parse_identifier(primary_key)?))
}
