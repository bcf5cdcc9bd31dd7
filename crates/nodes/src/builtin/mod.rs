//! Built-in executors, one per [`NodeKind`] variant.
//!
//! Dispatch is an exhaustive `match`, so adding a node kind without an
//! executor is a compile error.

mod ai;
mod control;
mod send;

use async_trait::async_trait;

use crate::providers::ContentKind;
use crate::traits::{ExecutableNode, ExecutionContext, ExecutionResult};
use crate::{NodeError, NodeKind};

#[async_trait]
impl ExecutableNode for NodeKind {
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult, NodeError> {
        match self {
            NodeKind::Start(_) => Ok(ctx.successors.advance_or_complete()),
            NodeKind::Message(data) => send::message(data, ctx).await,
            NodeKind::Image(data) => send::media(ContentKind::Image, data, ctx).await,
            NodeKind::Audio(data) => send::media(ContentKind::Audio, data, ctx).await,
            NodeKind::Video(data) => send::media(ContentKind::Video, data, ctx).await,
            NodeKind::Delay(data) => control::delay(data, ctx),
            NodeKind::Condition(data) => control::condition(data, ctx),
            NodeKind::Stage(data) => Ok(control::stage(data, ctx)),
            NodeKind::UserReply(data) => control::user_reply(data, ctx),
            NodeKind::AiPrompt(data) => ai::prompt(data, ctx).await,
        }
    }
}
