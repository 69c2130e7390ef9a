//! Check handler for checks that do not use transactions. Submissions go
//! straight to the non-transactional batcher.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use receptor_core::Submission;
use tracing::{debug, info};

use crate::context::{CheckConfig, HandlerContext};
use crate::error::{HandlerError, HandlerResult};

#[derive(Clone)]
pub struct NonTransactionalHandler {
    config: Arc<CheckConfig>,
    context: HandlerContext,
    stopped: Arc<AtomicBool>,
}

impl NonTransactionalHandler {
    pub fn new(config: CheckConfig, context: HandlerContext) -> Self {
        debug!(check_id = %config.check_id, "non-transactional check handler created");
        Self {
            config: Arc::new(config),
            context,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &CheckConfig {
        &self.config
    }

    pub async fn submit(&self, submission: Submission) -> HandlerResult<()> {
        self.ensure_running()?;
        self.context
            .simple_batcher
            .submit(&self.config.check_id, submission)
            .await
            .map_err(|_| HandlerError::Stopped)
    }

    pub async fn submit_complete(&self) -> HandlerResult<()> {
        self.ensure_running()?;
        self.context
            .simple_batcher
            .submit_complete(&self.config.check_id)
            .await
            .map_err(|_| HandlerError::Stopped)
    }

    pub fn set_state(&self, key: &str, value: &str) -> HandlerResult<()> {
        self.ensure_running()?;
        self.context.state.set(key, value)?;
        Ok(())
    }

    pub fn get_state(&self, key: &str) -> String {
        self.context.state.get_or_default(key)
    }

    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!(check_id = %self.config.check_id, "non-transactional check handler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> HandlerResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(HandlerError::Stopped)
        }
    }
}
