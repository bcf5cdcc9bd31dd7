//! `flowbot` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`    start the webhook/API server and the engine job workers.
//! - `worker`   fire due delay and reply-timeout wake-ups.
//! - `migrate`  run pending database migrations.
//! - `validate` validate a chatbot flow JSON file.

mod config;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use api::{AppState, EngineJobs};
use engine::{ChatbotFlow, ConversationEngine, EngineEvent, PgStore};
use nodes::adapters::{OpenRouterClient, WahaClient};
use queue::JobQueue;

use config::{DatabaseArgs, EngineArgs, PollArgs, ProviderArgs, QueueArgs};

#[derive(Parser)]
#[command(
    name = "flowbot",
    about = "Durable execution engine for WhatsApp chatbot flows",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server and the engine job workers.
    Serve {
        #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
        bind: SocketAddr,
        #[command(flatten)]
        database: DatabaseArgs,
        #[command(flatten)]
        providers: ProviderArgs,
        #[command(flatten)]
        engine: EngineArgs,
        #[command(flatten)]
        queue: QueueArgs,
    },
    /// Poll for due wake-ups and feed them to the engine.
    Worker {
        #[command(flatten)]
        database: DatabaseArgs,
        #[command(flatten)]
        providers: ProviderArgs,
        #[command(flatten)]
        engine: EngineArgs,
        #[command(flatten)]
        queue: QueueArgs,
        #[command(flatten)]
        poll: PollArgs,
    },
    /// Run pending database migrations.
    Migrate {
        #[command(flatten)]
        database: DatabaseArgs,
    },
    /// Validate a chatbot flow JSON file.
    Validate {
        /// Path to the flow JSON file.
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind, database, providers, engine, queue } => {
            let engine = build_engine(&database, &providers, &engine).await?;
            let jobs = JobQueue::start(Arc::new(EngineJobs::new(engine.clone())), queue.to_config());

            let state = AppState { engine, jobs: jobs.handle() };
            api::serve(bind, state).await.context("HTTP server failed")?;

            report_dead_letters(jobs.shutdown().await.len());
        }
        Command::Worker { database, providers, engine, queue, poll } => {
            let engine = build_engine(&database, &providers, &engine).await?;
            let jobs = JobQueue::start(Arc::new(EngineJobs::new(engine.clone())), queue.to_config());

            run_timer(&engine, &jobs, &poll).await;

            report_dead_letters(jobs.shutdown().await.len());
        }
        Command::Migrate { database } => {
            info!("running migrations");
            let pool = db::pool::create_pool(&database.database_url, 2)
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool).await.context("migration failed")?;
            info!("migrations applied");
        }
        Command::Validate { path } => {
            if !validate_file(&path)? {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn build_engine(
    database: &DatabaseArgs,
    providers: &ProviderArgs,
    engine: &EngineArgs,
) -> anyhow::Result<Arc<ConversationEngine>> {
    let config = engine.to_config();

    let pool = db::pool::create_pool(&database.database_url, database.max_connections)
        .await
        .context("failed to connect to database")?;
    let store = Arc::new(PgStore::new(pool));

    let messaging = WahaClient::new(
        providers.waha_base_url.clone(),
        providers.waha_api_key.clone(),
        config.call_timeout,
    )
    .context("failed to build WAHA client")?;

    if providers.openrouter_api_key.is_empty() {
        warn!("OPENROUTER_API_KEY is not set; ai_prompt nodes will fail");
    }
    let mut ai = OpenRouterClient::new(providers.openrouter_api_key.clone(), config.call_timeout)
        .context("failed to build OpenRouter client")?;
    if let Some(endpoint) = &providers.openrouter_endpoint {
        ai = ai.with_endpoint(endpoint.clone());
    }

    Ok(Arc::new(ConversationEngine::new(
        store.clone(),
        store,
        Arc::new(messaging),
        Arc::new(ai),
        config,
    )))
}

/// Dispatch due wake-ups until Ctrl-C.
async fn run_timer(engine: &ConversationEngine, jobs: &JobQueue<EngineEvent>, poll: &PollArgs) {
    let handle = jobs.handle();
    let mut ticker = tokio::time::interval(poll.poll_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(interval_ms = poll.poll_interval_ms, "timer worker started");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                let now = Utc::now();
                let due = match engine.due_wakeups(now, poll.batch_size).await {
                    Ok(due) => due,
                    Err(err) => {
                        error!(error = %err, "failed to load due wake-ups");
                        continue;
                    }
                };

                for key in due {
                    let event = EngineEvent::Wake { key, fired_at: now };
                    if let Err(err) = handle.enqueue(event).await {
                        error!(error = %err, "failed to enqueue wake-up");
                    }
                }
            }
        }
    }
}

fn report_dead_letters(count: usize) {
    if count > 0 {
        warn!(count, "events dead-lettered during shutdown");
    }
}

/// Print the validation result for `path`; `Ok(false)` when the flow is invalid.
fn validate_file(path: &Path) -> anyhow::Result<bool> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    let flow: ChatbotFlow = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a chatbot flow document", path.display()))?;

    match engine::validate(&flow) {
        Ok(report) => {
            for warning in &report.warnings {
                println!("warning: {warning}");
            }
            println!("flow '{}' is valid ({} nodes)", flow.id, flow.nodes.len());
            Ok(true)
        }
        Err(errors) => {
            for err in &errors {
                eprintln!("error: {err}");
            }
            eprintln!("flow '{}' failed validation", flow.id);
            Ok(false)
        }
    }
}
