//! Messaging provider backed by a WAHA (WhatsApp HTTP API) server.
//!
//! Each device id is used as the WAHA session name.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::providers::{ContentKind, MessagingProvider, OutboundMessage};
use crate::ProviderError;

pub struct WahaClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl WahaClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

fn endpoint(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Text => "sendText",
        ContentKind::Image => "sendImage",
        ContentKind::Audio => "sendVoice",
        ContentKind::Video => "sendVideo",
    }
}

/// WAHA addresses personal chats as `<digits>@c.us`.
fn chat_id(prospect_num: &str) -> String {
    if prospect_num.contains('@') {
        return prospect_num.to_string();
    }
    let digits: String = prospect_num.chars().filter(char::is_ascii_digit).collect();
    format!("{digits}@c.us")
}

fn request_body(message: &OutboundMessage) -> Value {
    let mut body = json!({
        "session": message.device_id,
        "chatId": chat_id(&message.prospect_num),
    });
    match message.content.kind {
        ContentKind::Text => {
            body["text"] = json!(message.content.payload);
        }
        _ => {
            body["file"] = json!({ "url": message.content.payload });
            if let Some(caption) = &message.content.caption {
                body["caption"] = json!(caption);
            }
        }
    }
    body
}

#[async_trait]
impl MessagingProvider for WahaClient {
    async fn send(&self, message: &OutboundMessage) -> Result<(), ProviderError> {
        let url = format!("{}/api/{}", self.base_url, endpoint(message.content.kind));
        debug!(%url, key = %message.idempotency_key, "sending message via WAHA");

        let mut request = self
            .http
            .post(&url)
            .header("Idempotency-Key", &message.idempotency_key)
            .json(&request_body(message));
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}
