//! Conversation repository functions.
//!
//! Mutual exclusion per conversation is a lease: a `(lease_holder,
//! lease_expires_at)` pair claimed by a conditional upsert. Saves are only
//! applied while the caller still holds the lease.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    DbError,
    models::{ConversationRow, DueWakeupRow},
};

const CONVERSATION_COLUMNS: &str = r#"
    id_device, prospect_num, user_id, flow_id, flow_reference, execution_id,
    execution_status, current_node_id, last_node_id, waiting_for_reply,
    reply_expires_at, resume_at, stage, conv_last, conv_current, prospect_name,
    niche, human, last_event_id, error_message, version, updated_at
"#;

/// Try to claim the lease on a conversation, creating an idle row if none
/// exists. Returns `false` while another holder's lease is still live.
pub async fn acquire_lease(
    pool: &PgPool,
    id_device: &str,
    prospect_num: &str,
    holder: Uuid,
    ttl_secs: f64,
) -> Result<bool, DbError> {
    let claimed = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO conversations (id_device, prospect_num, lease_holder, lease_expires_at)
        VALUES ($1, $2, $3, now() + make_interval(secs => $4))
        ON CONFLICT (id_device, prospect_num) DO UPDATE
        SET lease_holder = EXCLUDED.lease_holder,
            lease_expires_at = EXCLUDED.lease_expires_at
        WHERE conversations.lease_holder IS NULL
           OR conversations.lease_expires_at < now()
        RETURNING lease_holder
        "#,
    )
    .bind(id_device)
    .bind(prospect_num)
    .bind(holder)
    .bind(ttl_secs)
    .fetch_optional(pool)
    .await?;

    Ok(claimed == Some(holder))
}

/// Extend a lease still owned by `holder`. Returns `false` once it has been taken over.
pub async fn renew_lease(
    pool: &PgPool,
    id_device: &str,
    prospect_num: &str,
    holder: Uuid,
    ttl_secs: f64,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE conversations
        SET lease_expires_at = now() + make_interval(secs => $4)
        WHERE id_device = $1 AND prospect_num = $2 AND lease_holder = $3
        "#,
    )
    .bind(id_device)
    .bind(prospect_num)
    .bind(holder)
    .bind(ttl_secs)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Release a lease. Releasing a lease that has already been taken over is a no-op.
pub async fn release_lease(
    pool: &PgPool,
    id_device: &str,
    prospect_num: &str,
    holder: Uuid,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        UPDATE conversations
        SET lease_holder = NULL, lease_expires_at = NULL
        WHERE id_device = $1 AND prospect_num = $2 AND lease_holder = $3
        "#,
    )
    .bind(id_device)
    .bind(prospect_num)
    .bind(holder)
    .execute(pool)
    .await?;
    Ok(())
}

/// Fetch one conversation.
pub async fn get_conversation(
    pool: &PgPool,
    id_device: &str,
    prospect_num: &str,
) -> Result<Option<ConversationRow>, DbError> {
    let sql = format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id_device = $1 AND prospect_num = $2"
    );
    let row = sqlx::query_as::<_, ConversationRow>(&sql)
        .bind(id_device)
        .bind(prospect_num)
        .fetch_optional(pool)
        .await?;

    Ok(row)
}

/// Write back every engine-owned column of `row`, provided `holder` still
/// owns the lease. Returns `false` if the lease was lost.
pub async fn save_conversation(
    pool: &PgPool,
    row: &ConversationRow,
    holder: Uuid,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE conversations
        SET user_id = $3,
            flow_id = $4,
            flow_reference = $5,
            execution_id = $6,
            execution_status = $7,
            current_node_id = $8,
            last_node_id = $9,
            waiting_for_reply = $10,
            reply_expires_at = $11,
            resume_at = $12,
            stage = $13,
            conv_last = $14,
            conv_current = $15,
            prospect_name = $16,
            niche = $17,
            last_event_id = $18,
            error_message = $19,
            version = $20,
            updated_at = $21
        WHERE id_device = $1 AND prospect_num = $2 AND lease_holder = $22
        "#,
    )
    .bind(&row.id_device)
    .bind(&row.prospect_num)
    .bind(&row.user_id)
    .bind(&row.flow_id)
    .bind(&row.flow_reference)
    .bind(row.execution_id)
    .bind(&row.execution_status)
    .bind(&row.current_node_id)
    .bind(&row.last_node_id)
    .bind(row.waiting_for_reply)
    .bind(row.reply_expires_at)
    .bind(row.resume_at)
    .bind(&row.stage)
    .bind(&row.conv_last)
    .bind(&row.conv_current)
    .bind(&row.prospect_name)
    .bind(&row.niche)
    .bind(&row.last_event_id)
    .bind(&row.error_message)
    .bind(row.version)
    .bind(row.updated_at)
    .bind(holder)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Active conversations whose delay has elapsed or whose reply wait has
/// expired at `now`, oldest first. Conversations under human takeover are skipped.
pub async fn due_wakeups(
    pool: &PgPool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<DueWakeupRow>, DbError> {
    let rows = sqlx::query_as::<_, DueWakeupRow>(
        r#"
        SELECT id_device, prospect_num
        FROM conversations
        WHERE execution_status = 'active'
          AND human = 0
          AND (resume_at <= $1 OR (waiting_for_reply AND reply_expires_at <= $1))
        ORDER BY COALESCE(resume_at, reply_expires_at) ASC
        LIMIT $2
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
