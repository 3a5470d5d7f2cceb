use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub type DestinationRecordId = Uuid;

// ── Mention policy ──
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MentionPolicy {
    /// Mention the configured role only on an incident's first update.
    FirstUpdateOnly,
    /// Mention the configured role on every update.
    EveryUpdate,
}

// ── Channel kind ──
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Text,
    /// Announcement channels support republishing to followers.
    Announcement,
}

// ── Persisted destination record (DB row) ──
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DestinationRecord {
    pub id: DestinationRecordId,
    pub hook_id: String,
    #[serde(skip_serializing)]
    pub hook_token: String,
    pub page_url: String,
    pub guild_id: String,
    pub channel_id: String,
    pub channel_kind: ChannelKind,
    pub registered_by: String,
    pub role_id: Option<String>,
    pub mention_policy: MentionPolicy,
    pub created_at: DateTime<Utc>,
}
