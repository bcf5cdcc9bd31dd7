//! `message`, `image`, `audio` and `video` nodes.

use tokio::time::timeout;

use crate::kinds::{MediaData, MessageData};
use crate::providers::{ContentKind, OutboundContent, OutboundMessage};
use crate::traits::{ExecutionContext, ExecutionResult};
use crate::{NodeError, ProviderError};

pub(crate) async fn message(
    data: &MessageData,
    ctx: &mut ExecutionContext<'_>,
) -> Result<ExecutionResult, NodeError> {
    if data.message.trim().is_empty() {
        return Err(NodeError::Fatal("message node has no text".into()));
    }
    deliver(ctx, OutboundContent::text(data.message.clone()), 0).await?;
    Ok(ctx.successors.advance_or_complete())
}

pub(crate) async fn media(
    kind: ContentKind,
    data: &MediaData,
    ctx: &mut ExecutionContext<'_>,
) -> Result<ExecutionResult, NodeError> {
    if data.media_url.trim().is_empty() {
        return Err(NodeError::Fatal(format!("{} node has no media URL", kind.as_str())));
    }
    let content = OutboundContent::media(kind, data.media_url.clone(), data.caption.clone());
    deliver(ctx, content, 0).await?;
    Ok(ctx.successors.advance_or_complete())
}

/// Send one piece of content through the messaging provider, bounded by the
/// engine's call timeout. `index` distinguishes several sends from one node.
pub(crate) async fn deliver(
    ctx: &mut ExecutionContext<'_>,
    content: OutboundContent,
    index: usize,
) -> Result<(), NodeError> {
    let message = OutboundMessage {
        device_id: ctx.device_id.to_owned(),
        prospect_num: ctx.prospect_num.to_owned(),
        content,
        idempotency_key: format!("{}:{}:{}", ctx.execution_id, ctx.node_id, index),
    };

    let collaborators = ctx.collaborators;
    match timeout(collaborators.call_timeout, collaborators.messaging.send(&message)).await {
        Ok(Ok(())) => {
            ctx.sent.push(message.content);
            Ok(())
        }
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(ProviderError::Timeout.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::builtin::test_support::{collaborators, context, next};
    use crate::mock::{MockAi, MockMessenger};
    use crate::traits::{ExecutableNode, TerminalStatus, Successors};
    use crate::NodeKind;

    #[tokio::test]
    async fn message_sends_text_and_advances() {
        let messenger = Arc::new(MockMessenger::new());
        let ai = Arc::new(MockAi::replying("unused"));
        let collab = collaborators(&messenger, &ai);
        let mut ctx = context(&collab, "", &[], next("n2"));

        let node = NodeKind::Message(MessageData { message: "Hi".into() });
        let result = node.execute(&mut ctx).await.expect("send should succeed");

        assert_eq!(result, ExecutionResult::Advance("n2".into()));
        assert_eq!(messenger.sent_payloads(), vec!["Hi"]);
        let sent = messenger.sent();
        assert_eq!(sent[0].idempotency_key, format!("{}:node-1:0", uuid::Uuid::nil()));
        assert_eq!(ctx.sent, vec![OutboundContent::text("Hi")]);
    }

    #[tokio::test]
    async fn leaf_media_node_completes_the_run() {
        let messenger = Arc::new(MockMessenger::new());
        let ai = Arc::new(MockAi::replying("unused"));
        let collab = collaborators(&messenger, &ai);
        let mut ctx = context(&collab, "", &[], Successors::default());

        let node = NodeKind::Video(MediaData {
            media_url: "https://cdn.example/v.mp4".into(),
            caption: Some("demo".into()),
        });
        let result = node.execute(&mut ctx).await.unwrap();

        assert_eq!(result, ExecutionResult::Terminate(TerminalStatus::Completed));
        assert_eq!(messenger.sent()[0].content.kind, ContentKind::Video);
    }

    #[tokio::test]
    async fn provider_failure_is_retryable() {
        let messenger = Arc::new(MockMessenger::failing(1));
        let ai = Arc::new(MockAi::replying("unused"));
        let collab = collaborators(&messenger, &ai);
        let mut ctx = context(&collab, "", &[], next("n2"));

        let node = NodeKind::Message(MessageData { message: "Hi".into() });
        let err = node.execute(&mut ctx).await.unwrap_err();

        assert!(err.is_retryable());
        assert!(ctx.sent.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let messenger = Arc::new(MockMessenger::slow(Duration::from_secs(5)));
        let ai = Arc::new(MockAi::replying("unused"));
        let collab = collaborators(&messenger, &ai);
        let mut ctx = context(&collab, "", &[], next("n2"));

        let node = NodeKind::Message(MessageData { message: "Hi".into() });
        let err = node.execute(&mut ctx).await.unwrap_err();

        assert_eq!(err, NodeError::Retryable(ProviderError::Timeout.to_string()));
    }

    #[tokio::test]
    async fn empty_payload_is_fatal() {
        let messenger = Arc::new(MockMessenger::new());
        let ai = Arc::new(MockAi::replying("unused"));
        let collab = collaborators(&messenger, &ai);
        let mut ctx = context(&collab, "", &[], next("n2"));

        let node = NodeKind::Image(MediaData::default());
        let err = node.execute(&mut ctx).await.unwrap_err();

        assert!(matches!(err, NodeError::Fatal(_)));
        assert_eq!(messenger.call_count(), 0);
    }
}
