pub mod conversations;
pub mod flows;
pub mod webhooks;

use axum::http::StatusCode;

use queue::QueueError;

pub async fn health() -> &'static str {
    "ok"
}

fn queue_status(err: &QueueError) -> StatusCode {
    match err {
        QueueError::Full | QueueError::Closed => StatusCode::SERVICE_UNAVAILABLE,
    }
}
