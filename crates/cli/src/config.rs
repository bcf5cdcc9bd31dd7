//! Command-line and environment settings shared by the sub-commands.

use std::time::Duration;

use clap::Args;

use engine::EngineConfig;
use queue::QueueConfig;

#[derive(Debug, Clone, Args)]
pub struct DatabaseArgs {
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 10)]
    pub max_connections: u32,
}

/// Outbound collaborators: the WhatsApp gateway and the AI provider.
#[derive(Debug, Clone, Args)]
pub struct ProviderArgs {
    #[arg(long, env = "WAHA_BASE_URL", default_value = "http://localhost:3000")]
    pub waha_base_url: String,

    #[arg(long, env = "WAHA_API_KEY")]
    pub waha_api_key: Option<String>,

    #[arg(long, env = "OPENROUTER_API_KEY", default_value = "")]
    pub openrouter_api_key: String,

    /// Override the chat-completions endpoint (any OpenAI-compatible API).
    #[arg(long, env = "OPENROUTER_ENDPOINT")]
    pub openrouter_endpoint: Option<String>,
}

/// Engine knobs. Durations are in milliseconds.
#[derive(Debug, Clone, Args)]
pub struct EngineArgs {
    #[arg(long, env = "ENGINE_MAX_STEPS", default_value_t = 100)]
    pub max_steps_per_resume: usize,

    #[arg(long, env = "ENGINE_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    #[arg(long, env = "ENGINE_RETRY_BASE_DELAY_MS", default_value_t = 100)]
    pub retry_base_delay_ms: u64,

    #[arg(long, env = "ENGINE_CALL_TIMEOUT_MS", default_value_t = 15_000)]
    pub call_timeout_ms: u64,

    #[arg(long, env = "ENGINE_LEASE_TTL_MS", default_value_t = 30_000)]
    pub lease_ttl_ms: u64,

    #[arg(long, env = "ENGINE_LEASE_RETRY_ATTEMPTS", default_value_t = 5)]
    pub lease_retry_attempts: u32,

    #[arg(long, env = "ENGINE_LEASE_RETRY_DELAY_MS", default_value_t = 50)]
    pub lease_retry_delay_ms: u64,

    #[arg(long, env = "ENGINE_TRANSCRIPT_LIMIT", default_value_t = 50)]
    pub transcript_limit: usize,
}

impl EngineArgs {
    pub fn to_config(&self) -> EngineConfig {
        EngineConfig {
            max_steps_per_resume: self.max_steps_per_resume,
            max_retries: self.max_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            lease_ttl: Duration::from_millis(self.lease_ttl_ms),
            lease_retry_attempts: self.lease_retry_attempts,
            lease_retry_delay: Duration::from_millis(self.lease_retry_delay_ms),
            transcript_limit: self.transcript_limit,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct QueueArgs {
    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = 1024)]
    pub queue_capacity: usize,

    #[arg(long, env = "QUEUE_CONCURRENCY", default_value_t = 8)]
    pub queue_concurrency: usize,

    #[arg(long, env = "QUEUE_MAX_ATTEMPTS", default_value_t = 5)]
    pub queue_max_attempts: u32,

    #[arg(long, env = "QUEUE_RETRY_DELAY_MS", default_value_t = 250)]
    pub queue_retry_delay_ms: u64,
}

impl QueueArgs {
    pub fn to_config(&self) -> QueueConfig {
        QueueConfig {
            capacity: self.queue_capacity,
            concurrency: self.queue_concurrency,
            max_attempts: self.queue_max_attempts,
            retry_delay: Duration::from_millis(self.queue_retry_delay_ms),
        }
    }
}

/// Timer loop settings for the `worker` sub-command.
#[derive(Debug, Clone, Args)]
pub struct PollArgs {
    #[arg(long, env = "WORKER_POLL_INTERVAL_MS", default_value_t = 1_000)]
    pub poll_interval_ms: u64,

    /// Maximum wake-ups dispatched per poll.
    #[arg(long, env = "WORKER_BATCH_SIZE", default_value_t = 100)]
    pub batch_size: usize,
}

impl PollArgs {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        engine: EngineArgs,
        #[command(flatten)]
        queue: QueueArgs,
        #[command(flatten)]
        poll: PollArgs,
    }

    #[test]
    fn defaults_match_library_defaults() {
        let parsed = Harness::try_parse_from(["flowbot"]).unwrap();

        let engine = parsed.engine.to_config();
        let expected = EngineConfig::default();
        assert_eq!(engine.max_steps_per_resume, expected.max_steps_per_resume);
        assert_eq!(engine.max_retries, expected.max_retries);
        assert_eq!(engine.retry_base_delay, expected.retry_base_delay);
        assert_eq!(engine.call_timeout, expected.call_timeout);
        assert_eq!(engine.lease_ttl, expected.lease_ttl);
        assert_eq!(engine.lease_retry_attempts, expected.lease_retry_attempts);
        assert_eq!(engine.lease_retry_delay, expected.lease_retry_delay);
        assert_eq!(engine.transcript_limit, expected.transcript_limit);

        let queue = parsed.queue.to_config();
        let expected = QueueConfig::default();
        assert_eq!(queue.capacity, expected.capacity);
        assert_eq!(queue.concurrency, expected.concurrency);
        assert_eq!(queue.max_attempts, expected.max_attempts);
        assert_eq!(queue.retry_delay, expected.retry_delay);

        assert_eq!(parsed.poll.poll_interval(), Duration::from_secs(1));
        assert_eq!(parsed.poll.batch_size, 100);
    }

    #[test]
    fn flags_override_defaults() {
        let parsed = Harness::try_parse_from([
            "flowbot",
            "--max-retries",
            "7",
            "--call-timeout-ms",
            "2500",
            "--queue-concurrency",
            "2",
        ])
        .unwrap();

        let engine = parsed.engine.to_config();
        assert_eq!(engine.max_retries, 7);
        assert_eq!(engine.call_timeout, Duration::from_millis(2500));
        assert_eq!(parsed.queue.to_config().concurrency, 2);
    }
}
