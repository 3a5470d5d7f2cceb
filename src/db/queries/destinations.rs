use crate::db::models::{ChannelKind, DestinationRecord, MentionPolicy};
use crate::error::RelayResult;
use sqlx::PgPool;

pub async fn list_destinations(pool: &PgPool) -> RelayResult<Vec<DestinationRecord>> {
    let records = sqlx::query_as::<_, DestinationRecord>(
        r#"
        SELECT * FROM destinations ORDER BY created_at
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(records)
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_destination(
    pool: &PgPool,
    hook_id: &str,
    hook_token: &str,
    page_url: &str,
    guild_id: &str,
    channel_id: &str,
    channel_kind: ChannelKind,
    registered_by: &str,
    role_id: Option<&str>,
    mention_policy: MentionPolicy,
) -> RelayResult<DestinationRecord> {
    let record = sqlx::query_as::<_, DestinationRecord>(
        r#"
        INSERT INTO destinations
            (hook_id, hook_token, page_url, guild_id, channel_id, channel_kind,
             registered_by, role_id, mention_policy)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(hook_id)
    .bind(hook_token)
    .bind(page_url)
    .bind(guild_id)
    .bind(channel_id)
    .bind(channel_kind)
    .bind(registered_by)
    .bind(role_id)
    .bind(mention_policy)
    .fetch_one(pool)
    .await?;

    Ok(record)
}

pub async fn delete_destination(pool: &PgPool, hook_id: &str) -> RelayResult<bool> {
    let result = sqlx::query(
        r#"
        DELETE FROM destinations WHERE hook_id = $1
        "#,
    )
    .bind(hook_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
