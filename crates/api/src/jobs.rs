//! Queue handler that feeds engine events into the conversation engine.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use engine::{ConversationEngine, EngineError, EngineEvent, StoreError};
use queue::{Job, JobError, JobHandler};

pub struct EngineJobs {
    engine: Arc<ConversationEngine>,
}

impl EngineJobs {
    pub fn new(engine: Arc<ConversationEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl JobHandler<EngineEvent> for EngineJobs {
    async fn handle(&self, job: &Job<EngineEvent>) -> Result<(), JobError> {
        match self.engine.handle(job.payload.clone()).await {
            Ok(outcome) => {
                debug!(
                    job_id = %job.id,
                    conversation = %outcome.key,
                    disposition = ?outcome.disposition,
                    phase = ?outcome.phase,
                    "event processed"
                );
                Ok(())
            }
            // Another step holds (or took over) the conversation; try again after it finishes.
            Err(EngineError::LeaseConflict(key))
            | Err(EngineError::Store(StoreError::LeaseLost(key))) => {
                Err(JobError::Retry(format!("conversation {key} is busy")))
            }
            Err(err) => {
                error!(job_id = %job.id, error = %err, "event could not be processed");
                Err(JobError::Discard(err.to_string()))
            }
        }
    }
}
