//! AI provider backed by the OpenRouter chat-completions API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::providers::{AiContext, AiModel, AiProvider};
use crate::AiError;

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

const SYSTEM_PROMPT: &str = r#"You are an AI assistant for a WhatsApp chatbot. You must respond in this exact JSON format:
{
  "Stage": "Current conversation stage",
  "Response": [
    {"type": "text", "content": "Your response message here"}
  ]
}

Available response types: text, image, audio, video
Keep responses conversational and helpful. Always include a Stage and Response array."#;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, AiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AiError::Request(e.to_string()))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            endpoint: OPENROUTER_URL.to_string(),
        })
    }

    /// Point the client at a different OpenAI-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Prefix the node's prompt with what is known about the conversation.
fn contextual_prompt(prompt: &str, context: &AiContext) -> String {
    let mut preamble = String::new();
    if let Some(stage) = context.stage.as_deref().filter(|s| !s.is_empty()) {
        preamble.push_str(&format!("Current Stage: {stage}\n"));
    }
    if !context.previous_messages.is_empty() {
        preamble.push_str(&format!(
            "Previous Context: {}\n",
            context.previous_messages.join("\n")
        ));
    }
    if let Some(niche) = context.niche.as_deref().filter(|s| !s.is_empty()) {
        preamble.push_str(&format!("Business Niche: {niche}\n"));
    }
    if !context.user_input.is_empty() {
        preamble.push_str(&format!("Latest Reply: {}\n", context.user_input));
    }

    if preamble.is_empty() {
        prompt.to_string()
    } else {
        format!("{preamble}\n\nUser Message: {prompt}")
    }
}

#[async_trait]
impl AiProvider for OpenRouterClient {
    async fn complete(
        &self,
        model: AiModel,
        prompt: &str,
        context: &AiContext,
    ) -> Result<String, AiError> {
        let user_prompt = contextual_prompt(prompt, context);
        let request = ChatRequest {
            model: model.as_str(),
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: &user_prompt },
            ],
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AiError::Timeout
                } else {
                    AiError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AiError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(AiError::Api(format!("status {}: {body}", status.as_u16())));
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| AiError::Api(e.to_string()))?;
        if let Some(err) = parsed.error {
            return Err(AiError::Api(err.message));
        }
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(AiError::EmptyResponse)
    }
}
