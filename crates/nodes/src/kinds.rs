//! Node kinds and their per-type configuration.
//!
//! The JSON shape mirrors what the flow editor emits for each node:
//! `{"id": "...", "type": "message", "data": {"message": "Hi"}}`. Editor-only
//! fields (`position`, `data.label`, ...) are accepted and ignored.

use serde::{Deserialize, Serialize};

/// The closed set of node types, each carrying its own `data` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NodeKind {
    Start(StartData),
    Message(MessageData),
    Image(MediaData),
    Audio(MediaData),
    Video(MediaData),
    Delay(DelayData),
    Condition(ConditionData),
    Stage(StageData),
    UserReply(UserReplyData),
    AiPrompt(AiPromptData),
}

impl NodeKind {
    /// The `type` tag as written in the flow document.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Message(_) => "message",
            Self::Image(_) => "image",
            Self::Audio(_) => "audio",
            Self::Video(_) => "video",
            Self::Delay(_) => "delay",
            Self::Condition(_) => "condition",
            Self::Stage(_) => "stage",
            Self::UserReply(_) => "user_reply",
            Self::AiPrompt(_) => "ai_prompt",
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start(_))
    }

    pub fn is_condition(&self) -> bool {
        matches!(self, Self::Condition(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
    #[serde(default)]
    pub message: String,
}

/// Shared by `image`, `audio` and `video` nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaData {
    #[serde(rename = "mediaUrl", default)]
    pub media_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayData {
    /// Milliseconds to wait before continuing.
    #[serde(default = "default_delay_ms")]
    pub delay: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionData {
    #[serde(default = "default_condition")]
    pub condition: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageData {
    #[serde(default)]
    pub stage: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserReplyData {
    /// Milliseconds to wait for the reply; `0` waits indefinitely.
    #[serde(default = "default_reply_timeout_ms")]
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiPromptData {
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_condition() -> String {
    r#"user_input contains "yes""#.to_string()
}

fn default_reply_timeout_ms() -> u64 {
    30_000
}

fn default_model() -> String {
    "openai/gpt-4.1".to_string()
}
