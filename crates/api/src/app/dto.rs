//! Request/response DTOs and their mapping onto engine types.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use shopledger_activity::{ActivityDelta, ActivityType, NewActivity, RelatedEntity};
use shopledger_core::{ActivityId, BranchId, DomainResult};
use shopledger_infra::RestorePreview;

use crate::app::errors::json_error;

#[derive(Debug, Deserialize)]
pub struct RecordActivityRequest {
    #[serde(rename = "type")]
    pub activity_type: String,
    pub delta: JsonValue,
    #[serde(default)]
    pub branch_id: Option<BranchId>,
    #[serde(default)]
    pub related_entity: Option<RelatedEntity>,
    #[serde(default)]
    pub metadata: JsonValue,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RecordActivityRequest {
    pub fn into_new_activity(self) -> DomainResult<NewActivity> {
        let kind: ActivityType = self.activity_type.parse()?;
        let mut new = NewActivity::new(ActivityDelta::from_parts(kind, self.delta)?).metadata(self.metadata);
        new.branch_id = self.branch_id;
        new.related_entity = self.related_entity;
        if let Some(title) = self.title {
            new = new.title(title);
        }
        if let Some(description) = self.description {
            new = new.description(description);
        }
        Ok(new)
    }
}

#[derive(Debug, Serialize)]
pub struct RecordActivityResponse {
    pub recorded: bool,
    pub id: Option<ActivityId>,
}

#[derive(Debug, Deserialize)]
pub struct RestoreRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub success: bool,
    pub data: RestorePreview,
}

#[derive(Debug, Deserialize)]
pub struct DependentsQuery {
    pub table: String,
    #[serde(default)]
    pub primary_key: Option<String>,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Map a JSON body rejection onto the API's `validation_error` shape.
pub fn body<T>(payload: Result<axum::Json<T>, JsonRejection>) -> Result<T, axum::response::Response> {
    payload
        .map(|axum::Json(v)| v)
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "validation_error", e.body_text()))
}

pub fn query<T>(params: Result<axum::extract::Query<T>, QueryRejection>) -> Result<T, axum::response::Response> {
    params
        .map(|axum::extract::Query(v)| v)
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "validation_error", e.body_text()))
}
