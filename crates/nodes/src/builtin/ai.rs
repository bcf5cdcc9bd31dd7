//! `ai_prompt` nodes.
//!
//! The reply is sent to the prospect as if it were a message node. A reply
//! shaped like `{"Stage": "...", "Response": [{"type": "text", "content": "..."}]}`
//! is unpacked item by item and may move the conversation stage; anything
//! else is sent verbatim as one text message.

use serde::Deserialize;
use tokio::time::timeout;
use tracing::debug;

use crate::builtin::send::deliver;
use crate::kinds::AiPromptData;
use crate::providers::{AiContext, AiModel, ContentKind, OutboundContent};
use crate::traits::{ExecutionContext, ExecutionResult};
use crate::{AiError, NodeError};

#[derive(Debug, Deserialize)]
struct StructuredReply {
    #[serde(rename = "Stage", default)]
    stage: String,
    #[serde(rename = "Response", default)]
    response: Vec<ReplyItem>,
}

#[derive(Debug, Deserialize)]
struct ReplyItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: String,
}

pub(crate) async fn prompt(
    data: &AiPromptData,
    ctx: &mut ExecutionContext<'_>,
) -> Result<ExecutionResult, NodeError> {
    let model: AiModel = data.model.parse()?;
    let context = AiContext {
        stage: ctx.stage.clone(),
        user_input: ctx.user_input.to_owned(),
        previous_messages: ctx.previous_messages.to_vec(),
        niche: ctx.niche.map(str::to_owned),
    };

    let collaborators = ctx.collaborators;
    let reply = match timeout(
        collaborators.call_timeout,
        collaborators.ai.complete(model, &data.prompt, &context),
    )
    .await
    {
        Ok(reply) => reply?,
        Err(_) => return Err(AiError::Timeout.into()),
    };

    let (stage, contents) = interpret(&reply);
    if contents.is_empty() {
        return Err(AiError::EmptyResponse.into());
    }

    for (index, content) in contents.into_iter().enumerate() {
        deliver(ctx, content, index).await?;
    }
    if let Some(stage) = stage {
        ctx.stage = Some(stage);
    }
    Ok(ctx.successors.advance_or_complete())
}

/// Split an AI reply into an optional stage and the content to send.
fn interpret(reply: &str) -> (Option<String>, Vec<OutboundContent>) {
    let trimmed = strip_code_fence(reply.trim());

    if let Ok(structured) = serde_json::from_str::<StructuredReply>(trimmed) {
        if !structured.response.is_empty() {
            let contents = structured
                .response
                .into_iter()
                .filter_map(|item| {
                    let kind = match item.kind.as_str() {
                        "text" => ContentKind::Text,
                        "image" => ContentKind::Image,
                        "audio" => ContentKind::Audio,
                        "video" => ContentKind::Video,
                        other => {
                            debug!(kind = other, "skipping unsupported AI response item");
                            return None;
                        }
                    };
                    let content = item.content.trim();
                    (!content.is_empty()).then(|| OutboundContent {
                        kind,
                        payload: content.to_owned(),
                        caption: None,
                    })
                })
                .collect();
            let stage = Some(structured.stage.trim().to_owned()).filter(|s| !s.is_empty());
            return (stage, contents);
        }
    }

    if trimmed.is_empty() {
        return (None, Vec::new());
    }
    (None, vec![OutboundContent::text(trimmed)])
}

fn strip_code_fence(text: &str) -> &str {
    text.strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(text)
}
