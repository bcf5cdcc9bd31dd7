//! Test doubles for the messaging and AI collaborators.
//!
//! Useful in unit and engine tests where a real provider is either
//! unavailable or irrelevant. Both doubles record every call they receive.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::providers::{AiContext, AiModel, AiProvider, MessagingProvider, OutboundMessage};
use crate::{AiError, ProviderError};

// ---------------------------------------------------------------------------
// MockMessenger
// ---------------------------------------------------------------------------

/// A messaging provider that stores every delivered message in memory.
#[derive(Debug, Default)]
pub struct MockMessenger {
    /// Successfully delivered messages, in call order.
    pub delivered: Arc<Mutex<Vec<OutboundMessage>>>,
    attempts: Mutex<usize>,
    failures_remaining: Mutex<usize>,
    latency: Option<Duration>,
}

impl MockMessenger {
    /// A messenger that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// A messenger whose first `times` calls fail with a transport error.
    pub fn failing(times: usize) -> Self {
        Self {
            failures_remaining: Mutex::new(times),
            ..Self::default()
        }
    }

    /// A messenger that sleeps for `latency` before every delivery.
    pub fn slow(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.delivered.lock().unwrap().clone()
    }

    /// Payloads of the delivered messages, in order.
    pub fn sent_payloads(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.content.payload).collect()
    }

    /// Number of `send` calls, failed ones included.
    pub fn call_count(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl MessagingProvider for MockMessenger {
    async fn send(&self, message: &OutboundMessage) -> Result<(), ProviderError> {
        *self.attempts.lock().unwrap() += 1;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        {
            let mut remaining = self.failures_remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProviderError::Transport("connection reset".into()));
            }
        }

        self.delivered.lock().unwrap().push(message.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockAi
// ---------------------------------------------------------------------------

/// One recorded `complete` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiCall {
    pub model: AiModel,
    pub prompt: String,
    pub context: AiContext,
}

/// An AI provider that answers from a script, then repeats a fallback.
#[derive(Debug)]
pub struct MockAi {
    script: Mutex<VecDeque<Result<String, AiError>>>,
    fallback: Result<String, AiError>,
    calls: Mutex<Vec<AiCall>>,
}

impl MockAi {
    /// Always answer with `reply`.
    pub fn replying(reply: impl Into<String>) -> Self {
        Self::scripted(Vec::new(), Ok(reply.into()))
    }

    /// Always fail with `err`.
    pub fn failing(err: AiError) -> Self {
        Self::scripted(Vec::new(), Err(err))
    }

    /// Answer with `script` in order, then with `fallback` forever.
    pub fn scripted(script: Vec<Result<String, AiError>>, fallback: Result<String, AiError>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<AiCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AiProvider for MockAi {
    async fn complete(
        &self,
        model: AiModel,
        prompt: &str,
        context: &AiContext,
    ) -> Result<String, AiError> {
        self.calls.lock().unwrap().push(AiCall {
            model,
            prompt: prompt.to_owned(),
            context: context.clone(),
        });
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}
