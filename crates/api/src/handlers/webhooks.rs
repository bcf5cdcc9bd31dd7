use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use engine::{EngineEvent, InboundEvent};

use crate::AppState;

/// Inbound message as posted by the messaging provider. Field aliases cover
/// the WAHA message shape (`from`, `body`, `id`).
#[derive(Debug, Deserialize)]
pub struct InboundMessageDto {
    #[serde(alias = "from")]
    pub prospect_num: String,
    #[serde(alias = "body")]
    pub message_text: String,
    #[serde(default, alias = "message_id", alias = "id")]
    pub event_id: Option<String>,
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "pushName")]
    pub prospect_name: Option<String>,
}

/// `60123456789@c.us` → `60123456789`.
fn normalize_number(raw: &str) -> &str {
    raw.split('@').next().unwrap_or(raw).trim()
}

pub async fn inbound(
    Path(device_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<InboundMessageDto>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let prospect_num = normalize_number(&payload.prospect_num);

    if prospect_num.is_empty() || prospect_num == device_id {
        debug!(%device_id, "ignoring message sent by the device itself");
        return Ok((StatusCode::ACCEPTED, Json(json!({ "status": "ignored" }))));
    }

    let event = EngineEvent::Inbound(InboundEvent {
        device_id,
        prospect_num: prospect_num.to_owned(),
        message_text: payload.message_text,
        received_at: payload.received_at.unwrap_or_else(Utc::now),
        event_id: payload.event_id,
        prospect_name: payload.prospect_name,
    });

    match state.jobs.enqueue(event).await {
        Ok(job_id) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "status": "queued", "job_id": job_id.to_string() })),
        )),
        Err(err) => {
            warn!(error = %err, "could not enqueue inbound message");
            Err(super::queue_status(&err))
        }
    }
}
