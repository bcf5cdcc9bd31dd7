//! Contracts for the two external collaborators a flow talks to: the
//! messaging provider that delivers content to the prospect, and the AI
//! completion provider behind `ai_prompt` nodes.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{AiError, ProviderError};

// ---------------------------------------------------------------------------
// Messaging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Image,
    Audio,
    Video,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

/// A single piece of content: text, or a media URL with an optional caption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundContent {
    pub kind: ContentKind,
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl OutboundContent {
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::Text,
            payload: payload.into(),
            caption: None,
        }
    }

    pub fn media(kind: ContentKind, url: impl Into<String>, caption: Option<String>) -> Self {
        Self {
            kind,
            payload: url.into(),
            caption,
        }
    }

    /// How this content appears in the conversation transcript.
    pub fn transcript_line(&self) -> String {
        match self.kind {
            ContentKind::Text => format!("bot: {}", self.payload),
            kind => format!("bot: [{}] {}", kind.as_str(), self.payload),
        }
    }
}

/// Content addressed to one prospect through one device.
///
/// `idempotency_key` is stable for a given run, node and content index, so a
/// provider that de-duplicates can absorb the engine's at-least-once retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub device_id: String,
    pub prospect_num: String,
    pub content: OutboundContent,
    pub idempotency_key: String,
}

#[async_trait]
pub trait MessagingProvider: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), ProviderError>;
}

// ---------------------------------------------------------------------------
// AI completion
// ---------------------------------------------------------------------------

/// Models an `ai_prompt` node may name. Anything else is rejected when the
/// flow is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AiModel {
    Gpt5Chat,
    Gpt5Mini,
    ChatGpt4oLatest,
    Gpt41,
    Gemini25Pro,
    GeminiPro15,
}

impl AiModel {
    pub const ALL: [AiModel; 6] = [
        Self::Gpt5Chat,
        Self::Gpt5Mini,
        Self::ChatGpt4oLatest,
        Self::Gpt41,
        Self::Gemini25Pro,
        Self::GeminiPro15,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt5Chat => "openai/gpt-5-chat",
            Self::Gpt5Mini => "openai/gpt-5-mini",
            Self::ChatGpt4oLatest => "openai/chatgpt-4o-latest",
            Self::Gpt41 => "openai/gpt-4.1",
            Self::Gemini25Pro => "google/gemini-2.5-pro",
            Self::GeminiPro15 => "google/gemini-pro-1.5",
        }
    }
}

impl fmt::Display for AiModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AiModel {
    type Err = AiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|model| model.as_str() == s)
            .ok_or_else(|| AiError::UnsupportedModel(s.to_string()))
    }
}

/// Conversation facts handed to the AI provider alongside the prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AiContext {
    pub stage: Option<String>,
    pub user_input: String,
    pub previous_messages: Vec<String>,
    pub niche: Option<String>,
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn complete(
        &self,
        model: AiModel,
        prompt: &str,
        context: &AiContext,
    ) -> Result<String, AiError>;
}
