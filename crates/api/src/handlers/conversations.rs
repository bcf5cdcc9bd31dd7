use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, warn};

use engine::{ConversationKey, ConversationState, EngineError, EngineEvent};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StartFlowDto {
    pub flow_id: String,
}

pub async fn get(
    Path((device_id, prospect_num)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<ConversationState>, StatusCode> {
    let key = ConversationKey::new(device_id, prospect_num);
    match state.engine.get_conversation_state(&key).await {
        Ok(Some(conversation)) => Ok(Json(conversation)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(err) => {
            error!(conversation = %key, error = %err, "failed to load conversation");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn reset(
    Path((device_id, prospect_num)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<StatusCode, StatusCode> {
    let key = ConversationKey::new(device_id, prospect_num);
    match state.engine.reset(&key).await {
        Ok(_) => Ok(StatusCode::NO_CONTENT),
        Err(EngineError::LeaseConflict(_)) => Err(StatusCode::CONFLICT),
        Err(err) => {
            error!(conversation = %key, error = %err, "failed to reset conversation");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn start(
    Path((device_id, prospect_num)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(payload): Json<StartFlowDto>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let event = EngineEvent::Start {
        key: ConversationKey::new(device_id, prospect_num),
        flow_id: payload.flow_id,
        requested_at: Utc::now(),
    };

    match state.jobs.enqueue(event).await {
        Ok(job_id) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "status": "queued", "job_id": job_id.to_string() })),
        )),
        Err(err) => {
            warn!(error = %err, "could not enqueue flow start");
            Err(super::queue_status(&err))
        }
    }
}
