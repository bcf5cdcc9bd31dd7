use axum::{http::StatusCode, Json};
use serde_json::{json, Value};

use engine::ChatbotFlow;

/// Validate a flow document without storing it.
pub async fn validate(Json(flow): Json<ChatbotFlow>) -> (StatusCode, Json<Value>) {
    match engine::validate(&flow) {
        Ok(report) => {
            let warnings: Vec<String> = report.warnings.iter().map(ToString::to_string).collect();
            (StatusCode::OK, Json(json!({ "valid": true, "warnings": warnings })))
        }
        Err(errors) => {
            let errors: Vec<String> = errors.iter().map(ToString::to_string).collect();
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "valid": false, "errors": errors })),
            )
        }
    }
}
