use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use shopledger_infra::EngineError;

pub fn engine_error_to_response(err: EngineError) -> axum::response::Response {
    let status = match &err {
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::Unauthorized(_) => StatusCode::FORBIDDEN,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::InvalidState(_) | EngineError::ReferentialIntegrity { .. } => StatusCode::CONFLICT,
        EngineError::Store(msg) => {
            tracing::error!(error = %msg, "store failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    match err.details() {
        Some(details) => (
            status,
            axum::Json(json!({
                "error": err.code(),
                "message": err.to_string(),
                "constraint": details.constraint,
                "table": details.table,
            })),
        )
            .into_response(),
        None => json_error(status, err.code(), err.to_string()),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path/query identifier, answering 400 when it is not one.
pub fn parse_identifier(raw: &str) -> Result<shopledger_core::Identifier, axum::response::Response> {
    shopledger_core::Identifier::parse(raw)
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_statuses() {
        let cases = [
            (EngineError::validation("x"), StatusCode::BAD_REQUEST),
            (EngineError::Unauthorized("x".into()), StatusCode::FORBIDDEN),
            (EngineError::not_found("x"), StatusCode::NOT_FOUND),
            (EngineError::invalid_state("x"), StatusCode::CONFLICT),
            (
                EngineError::ReferentialIntegrity { constraint: None, table: None, message: "x".into() },
                StatusCode::CONFLICT,
            ),
            (EngineError::Store("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(engine_error_to_response(err).status(), status);
        }
    }
}
