use crate::error::{RelayError, RelayResult};
use crate::relay::render::Embed;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::debug;

// Platform error codes for "the thing you addressed no longer exists"
const CODE_UNKNOWN_MESSAGE: u64 = 10008;
const CODE_UNKNOWN_WEBHOOK: u64 = 10015;

/// Delivery target credentials: the id/secret pair addressing one webhook.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HookRef {
    pub id: String,
    pub token: String,
}

impl HookRef {
    pub fn parse(raw: &str) -> Option<Self> {
        let (id, token) = raw.split_once('/')?;
        if id.is_empty() || token.is_empty() {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            token: token.to_string(),
        })
    }

    pub fn path(&self) -> String {
        format!("{}/{}", self.id, self.token)
    }
}

// Token is a secret; never let it reach logs.
impl fmt::Display for HookRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.id, "*".repeat(self.token.len()))
    }
}

/// Reference to a message the relay delivered.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageRef {
    pub id: String,
}

/// One message from a destination's recent history, as fetched for backfill.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryMessage {
    pub id: String,
    #[serde(default)]
    pub webhook_id: Option<String>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationLiveness {
    Alive,
    Gone,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<u64>,
}

#[derive(Clone)]
pub struct DeliveryClient {
    http_client: Client,
    base_url: String,
    bot_token: String,
}

impl DeliveryClient {
    pub fn new(base_url: String, bot_token: String) -> Self {
        // 30-second timeout to prevent hanging requests to the delivery API
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http_client,
            base_url,
            bot_token,
        }
    }

    /// Create a message at the destination. The nonce is an idempotency token
    /// derived from the update id; with `enforce_nonce` the platform refuses
    /// to create a second message for a retried request.
    pub async fn create_message(
        &self,
        hook: &HookRef,
        embed: &Embed,
        content: Option<&str>,
        nonce: &str,
    ) -> RelayResult<MessageRef> {
        debug!("Creating message via webhook {}", hook);

        let mut payload = json!({
            "embeds": [embed],
            "nonce": nonce,
            "enforce_nonce": true,
        });
        if let Some(content) = content {
            payload["content"] = json!(content);
        }

        let response = self
            .http_client
            .post(format!(
                "{}/webhooks/{}?wait=true",
                self.base_url,
                hook.path()
            ))
            .json(&payload)
            .send()
            .await?;

        self.parse_response(response).await
    }

    /// Edit a previously delivered message in place, same idempotency token.
    pub async fn edit_message(
        &self,
        hook: &HookRef,
        message_id: &str,
        embed: &Embed,
        nonce: &str,
    ) -> RelayResult<MessageRef> {
        debug!("Editing message {} via webhook {}", message_id, hook);

        let response = self
            .http_client
            .patch(format!(
                "{}/webhooks/{}/messages/{}",
                self.base_url,
                hook.path(),
                message_id
            ))
            .json(&json!({ "embeds": [embed], "nonce": nonce }))
            .send()
            .await?;

        self.parse_response(response).await
    }

    /// Fetch the destination channel's recent history (newest first).
    pub async fn fetch_recent_messages(
        &self,
        channel_id: &str,
        limit: u8,
    ) -> RelayResult<Vec<HistoryMessage>> {
        let response = self
            .http_client
            .get(format!(
                "{}/channels/{}/messages?limit={}",
                self.base_url, channel_id, limit
            ))
            .header("Authorization", format!("Bot {}", self.bot_token))
            .send()
            .await?;

        self.parse_response(response).await
    }

    /// Probe whether the destination webhook still exists.
    pub async fn verify_destination(&self, hook: &HookRef) -> RelayResult<DestinationLiveness> {
        let response = self
            .http_client
            .get(format!("{}/webhooks/{}", self.base_url, hook.path()))
            .send()
            .await?;

        match response.status().as_u16() {
            200 => Ok(DestinationLiveness::Alive),
            401 | 404 => Ok(DestinationLiveness::Gone),
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(RelayError::DeliveryAPIError { status, message })
            }
        }
    }

    /// Broadcast a delivered message to a channel's followers.
    pub async fn republish(&self, channel_id: &str, message_id: &str) -> RelayResult<()> {
        let response = self
            .http_client
            .post(format!(
                "{}/channels/{}/messages/{}/crosspost",
                self.base_url, channel_id, message_id
            ))
            .header("Authorization", format!("Bot {}", self.bot_token))
            .send()
            .await?;

        let _: MessageRef = self.parse_response(response).await?;
        Ok(())
    }

    async fn parse_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> RelayResult<T> {
        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(response.json::<T>().await?);
        }

        let body: ApiErrorBody = response.json().await.unwrap_or(ApiErrorBody {
            message: None,
            code: None,
        });
        Err(classify_failure(status, body.code, body.message))
    }
}

/// Map a delivery API failure onto the relay's error taxonomy.
pub fn classify_failure(status: u16, api_code: Option<u64>, message: Option<String>) -> RelayError {
    match (status, api_code) {
        (404, Some(CODE_UNKNOWN_MESSAGE)) => RelayError::MessageGone,
        (404, Some(CODE_UNKNOWN_WEBHOOK)) | (401, _) | (404, None) => RelayError::DestinationGone,
        _ => RelayError::DeliveryAPIError {
            status,
            message: message.unwrap_or_else(|| "Unknown error".to_string()),
        },
    }
}
