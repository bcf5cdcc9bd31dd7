//! Flow document repository functions (read-only; the editor owns writes).

use sqlx::PgPool;

use crate::{DbError, models::FlowRow};

/// Fetch a flow by id.
pub async fn get_flow(pool: &PgPool, flow_id: &str) -> Result<Option<FlowRow>, DbError> {
    let row = sqlx::query_as::<_, FlowRow>(
        r#"
        SELECT id, name, description, niche, id_device, user_id, nodes, edges, created_at, updated_at
        FROM chatbot_flows
        WHERE id = $1
        "#,
    )
    .bind(flow_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// The flow most recently assigned to `device_id`, if any.
pub async fn flow_id_for_device(pool: &PgPool, device_id: &str) -> Result<Option<String>, DbError> {
    let id = sqlx::query_scalar::<_, String>(
        r#"
        SELECT id
        FROM chatbot_flows
        WHERE id_device = $1
        ORDER BY updated_at DESC
        LIMIT 1
        "#,
    )
    .bind(device_id)
    .fetch_optional(pool)
    .await?;

    Ok(id)
}
