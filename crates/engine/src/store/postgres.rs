//! Postgres-backed store and flow source, on top of the `db` repositories.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use db::models::{ConversationRow, FlowRow};
use db::repository::{conversations, flows};
use db::DbPool;

use super::{ConversationStore, FlowSource, LeaseToken, StoreError};
use crate::models::ChatbotFlow;
use crate::state::{ConversationKey, ConversationState, ExecutionStatus};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn acquire_lease(
        &self,
        key: &ConversationKey,
        ttl: Duration,
    ) -> Result<LeaseToken, StoreError> {
        let token = LeaseToken::new();
        let claimed = conversations::acquire_lease(
            &self.pool,
            &key.device_id,
            &key.prospect_num,
            token.0,
            ttl.as_secs_f64(),
        )
        .await?;

        if claimed {
            debug!(conversation = %key, lease = %token.0, "lease acquired");
            Ok(token)
        } else {
            Err(StoreError::LeaseConflict(key.clone()))
        }
    }

    async fn renew_lease(
        &self,
        key: &ConversationKey,
        lease: LeaseToken,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let renewed = conversations::renew_lease(
            &self.pool,
            &key.device_id,
            &key.prospect_num,
            lease.0,
            ttl.as_secs_f64(),
        )
        .await?;

        if renewed {
            Ok(())
        } else {
            Err(StoreError::LeaseLost(key.clone()))
        }
    }

    async fn release_lease(&self, key: &ConversationKey, lease: LeaseToken) -> Result<(), StoreError> {
        conversations::release_lease(&self.pool, &key.device_id, &key.prospect_num, lease.0).await?;
        Ok(())
    }

    async fn load(&self, key: &ConversationKey) -> Result<Option<ConversationState>, StoreError> {
        conversations::get_conversation(&self.pool, &key.device_id, &key.prospect_num)
            .await?
            .map(state_from_row)
            .transpose()
    }

    async fn save(&self, state: &ConversationState, lease: LeaseToken) -> Result<(), StoreError> {
        let row = row_from_state(state)?;
        if conversations::save_conversation(&self.pool, &row, lease.0).await? {
            Ok(())
        } else {
            Err(StoreError::LeaseLost(state.key.clone()))
        }
    }

    async fn due_wakeups(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ConversationKey>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = conversations::due_wakeups(&self.pool, now, limit).await?;
        Ok(rows
            .into_iter()
            .map(|row| ConversationKey::new(row.id_device, row.prospect_num))
            .collect())
    }
}

#[async_trait]
impl FlowSource for PgStore {
    async fn load_flow(&self, flow_id: &str) -> Result<ChatbotFlow, StoreError> {
        let row = flows::get_flow(&self.pool, flow_id)
            .await?
            .ok_or_else(|| StoreError::FlowNotFound(flow_id.to_owned()))?;
        flow_from_row(row)
    }

    async fn flow_for_device(&self, device_id: &str) -> Result<Option<String>, StoreError> {
        Ok(flows::flow_id_for_device(&self.pool, device_id).await?)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn flow_from_row(row: FlowRow) -> Result<ChatbotFlow, StoreError> {
    let corrupt = |what: &str, err: serde_json::Error| {
        StoreError::Corrupt(format!("flow '{}' {what}: {err}", row.id))
    };
    let nodes = serde_json::from_value(row.nodes.clone()).map_err(|e| corrupt("nodes", e))?;
    let edges = serde_json::from_value(row.edges.clone()).map_err(|e| corrupt("edges", e))?;

    Ok(ChatbotFlow {
        id: row.id,
        name: row.name,
        description: row.description,
        niche: row.niche,
        id_device: row.id_device,
        user_id: row.user_id,
        nodes,
        edges,
        created_at: Some(row.created_at),
        updated_at: Some(row.updated_at),
    })
}

fn state_from_row(row: ConversationRow) -> Result<ConversationState, StoreError> {
    let execution_status = row
        .execution_status
        .as_deref()
        .map(str::parse::<ExecutionStatus>)
        .transpose()
        .map_err(StoreError::Corrupt)?;

    Ok(ConversationState {
        key: ConversationKey::new(row.id_device, row.prospect_num),
        user_id: row.user_id,
        flow_id: row.flow_id,
        flow_reference: row.flow_reference,
        execution_id: row.execution_id,
        execution_status,
        current_node_id: row.current_node_id,
        last_node_id: row.last_node_id,
        waiting_for_reply: row.waiting_for_reply,
        reply_expires_at: row.reply_expires_at,
        resume_at: row.resume_at,
        stage: row.stage,
        conv_last: row.conv_last,
        transcript: transcript_from_column(row.conv_current.as_deref()),
        prospect_name: row.prospect_name,
        niche: row.niche,
        human: row.human,
        last_event_id: row.last_event_id,
        error_message: row.error_message,
        version: row.version,
        updated_at: Some(row.updated_at),
    })
}

fn row_from_state(state: &ConversationState) -> Result<ConversationRow, StoreError> {
    let conv_current = serde_json::to_string(&state.transcript)
        .map_err(|e| StoreError::Corrupt(format!("transcript of {}: {e}", state.key)))?;

    Ok(ConversationRow {
        id_device: state.key.device_id.clone(),
        prospect_num: state.key.prospect_num.clone(),
        user_id: state.user_id.clone(),
        flow_id: state.flow_id.clone(),
        flow_reference: state.flow_reference.clone(),
        execution_id: state.execution_id,
        execution_status: state.execution_status.map(|s| s.as_str().to_owned()),
        current_node_id: state.current_node_id.clone(),
        last_node_id: state.last_node_id.clone(),
        waiting_for_reply: state.waiting_for_reply,
        reply_expires_at: state.reply_expires_at,
        resume_at: state.resume_at,
        stage: state.stage.clone(),
        conv_last: state.conv_last.clone(),
        conv_current: Some(conv_current),
        prospect_name: state.prospect_name.clone(),
        niche: state.niche.clone(),
        human: state.human,
        last_event_id: state.last_event_id.clone(),
        error_message: state.error_message.clone(),
        version: state.version,
        updated_at: state.updated_at.unwrap_or_else(Utc::now),
    })
}

/// `conv_current` holds a JSON array of lines; rows written by older tools
/// hold free text, which is kept as a single line.
fn transcript_from_column(column: Option<&str>) -> Vec<String> {
    match column.map(str::trim) {
        None | Some("") => Vec::new(),
        Some(text) => serde_json::from_str(text).unwrap_or_else(|_| vec![text.to_owned()]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_free_text_transcript_becomes_one_line() {
        assert!(transcript_from_column(None).is_empty());
        assert_eq!(transcript_from_column(Some("hello there")), vec!["hello there"]);
        assert_eq!(
            transcript_from_column(Some(r#"["user: hi","bot: Hi"]"#)),
            vec!["user: hi", "bot: Hi"]
        );
    }

    #[test]
    fn state_survives_the_row_mapping() {
        let mut state = ConversationState::idle(ConversationKey::new("dev-1", "60123"));
        state.execution_status = Some(ExecutionStatus::Active);
        state.waiting_for_reply = true;
        state.transcript = vec!["bot: Hi".into()];
        state.updated_at = Some(Utc::now());

        let row = row_from_state(&state).unwrap();
        assert_eq!(row.execution_status.as_deref(), Some("active"));
        assert_eq!(state_from_row(row).unwrap(), state);
    }

    #[test]
    fn unknown_status_is_corrupt() {
        let mut row = row_from_state(&ConversationState::idle(ConversationKey::new("d", "p"))).unwrap();
        row.execution_status = Some("paused".into());
        assert!(matches!(state_from_row(row), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn flow_rows_decode_editor_json() {
        let row = FlowRow {
            id: "flow-1".into(),
            name: "Welcome".into(),
            description: None,
            niche: Some("Property".into()),
            id_device: Some("dev-1".into()),
            user_id: None,
            nodes: json!([{ "id": "s", "type": "start", "data": {} }]),
            edges: json!([]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let flow = flow_from_row(row).unwrap();
        assert!(flow.start_node().is_some());

        let bad = FlowRow { nodes: json!({ "not": "a list" }), ..flow_row_stub() };
        assert!(matches!(flow_from_row(bad), Err(StoreError::Corrupt(_))));
    }

    fn flow_row_stub() -> FlowRow {
        FlowRow {
            id: "stub".into(),
            name: "stub".into(),
            description: None,
            niche: None,
            id_device: None,
            user_id: None,
            nodes: json!([]),
            edges: json!([]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
