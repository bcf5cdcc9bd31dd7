//! Nodes that steer the traversal without talking to the prospect:
//! `delay`, `condition`, `stage` and `user_reply`.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::condition::{self, Variables};
use crate::kinds::{ConditionData, DelayData, StageData, UserReplyData};
use crate::traits::{ExecutionContext, ExecutionResult, SuspendReason};
use crate::NodeError;

pub(crate) fn delay(
    data: &DelayData,
    ctx: &mut ExecutionContext<'_>,
) -> Result<ExecutionResult, NodeError> {
    let resume_at = offset(ctx.now, data.delay)
        .ok_or_else(|| NodeError::Fatal(format!("delay of {}ms is out of range", data.delay)))?;
    Ok(ExecutionResult::Suspend(SuspendReason::DelayScheduled { resume_at }))
}

pub(crate) fn condition(
    data: &ConditionData,
    ctx: &mut ExecutionContext<'_>,
) -> Result<ExecutionResult, NodeError> {
    let vars = Variables {
        user_input: ctx.user_input,
        stage: ctx.stage.as_deref().unwrap_or_default(),
        previous_messages: ctx.previous_messages,
    };

    let outcome = match condition::evaluate(&data.condition, &vars) {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(
                node_id = ctx.node_id,
                expression = %data.condition,
                error = %err,
                "condition could not be evaluated, taking the false branch"
            );
            false
        }
    };

    let target = if outcome {
        &ctx.successors.on_true
    } else {
        &ctx.successors.on_false
    };
    target
        .clone()
        .map(ExecutionResult::Advance)
        .ok_or_else(|| NodeError::Fatal(format!("condition has no '{outcome}' branch")))
}

pub(crate) fn stage(data: &StageData, ctx: &mut ExecutionContext<'_>) -> ExecutionResult {
    ctx.stage = Some(data.stage.clone());
    ctx.successors.advance_or_complete()
}

pub(crate) fn user_reply(
    data: &UserReplyData,
    ctx: &mut ExecutionContext<'_>,
) -> Result<ExecutionResult, NodeError> {
    let expires_at = match data.timeout {
        0 => None,
        ms => Some(offset(ctx.now, ms).ok_or_else(|| {
            NodeError::Fatal(format!("reply timeout of {ms}ms is out of range"))
        })?),
    };
    Ok(ExecutionResult::Suspend(SuspendReason::AwaitingReply {
        timeout_ms: data.timeout,
        expires_at,
    }))
}

fn offset(now: DateTime<Utc>, millis: u64) -> Option<DateTime<Utc>> {
    let millis = i64::try_from(millis).ok()?;
    now.checked_add_signed(Duration::try_milliseconds(millis)?)
}
