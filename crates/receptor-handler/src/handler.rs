//! The check-facing API, over either handler variant.

use receptor_core::{
    CheckData, Component, Event, Instance, RawMetric, Relation, Stream, Submission, TransactionId,
};

use crate::context::CheckConfig;
use crate::error::{HandlerError, HandlerResult};
use crate::non_transactional::NonTransactionalHandler;
use crate::transactional::TransactionalHandler;

/// Entry point for everything a check produces. Cheap to clone.
#[derive(Clone)]
pub enum CheckHandler {
    Transactional(TransactionalHandler),
    NonTransactional(NonTransactionalHandler),
}

impl CheckHandler {
    pub fn config(&self) -> &CheckConfig {
        match self {
            CheckHandler::Transactional(h) => h.config(),
            CheckHandler::NonTransactional(h) => h.config(),
        }
    }

    pub fn check_id(&self) -> &str {
        &self.config().check_id
    }

    pub fn is_transactional(&self) -> bool {
        matches!(self, CheckHandler::Transactional(_))
    }

    pub async fn start_transaction(&self) -> HandlerResult<TransactionId> {
        match self {
            CheckHandler::Transactional(h) => h.start_transaction().await,
            CheckHandler::NonTransactional(_) => Err(HandlerError::TransactionsUnsupported),
        }
    }

    pub async fn stop_transaction(&self) -> HandlerResult<()> {
        match self {
            CheckHandler::Transactional(h) => h.stop_transaction().await,
            CheckHandler::NonTransactional(_) => Err(HandlerError::TransactionsUnsupported),
        }
    }

    pub async fn discard_transaction(&self, reason: impl Into<String>) -> HandlerResult<()> {
        match self {
            CheckHandler::Transactional(h) => h.discard_transaction(reason).await,
            CheckHandler::NonTransactional(_) => Err(HandlerError::TransactionsUnsupported),
        }
    }

    pub async fn set_transaction_state(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> HandlerResult<()> {
        match self {
            CheckHandler::Transactional(h) => h.set_transaction_state(key, value).await,
            CheckHandler::NonTransactional(_) => Err(HandlerError::TransactionsUnsupported),
        }
    }

    pub fn current_transaction(&self) -> Option<TransactionId> {
        match self {
            CheckHandler::Transactional(h) => h.current_transaction(),
            CheckHandler::NonTransactional(_) => None,
        }
    }

    pub async fn submit(&self, submission: Submission) -> HandlerResult<()> {
        match self {
            CheckHandler::Transactional(h) => h.submit(submission).await,
            CheckHandler::NonTransactional(h) => h.submit(submission).await,
        }
    }

    /// Signal the end of a check run.
    pub async fn submit_complete(&self) -> HandlerResult<()> {
        match self {
            CheckHandler::Transactional(h) => h.submit_complete().await,
            CheckHandler::NonTransactional(h) => h.submit_complete().await,
        }
    }

    pub async fn set_state(&self, key: &str, value: &str) -> HandlerResult<()> {
        match self {
            CheckHandler::Transactional(h) => h.set_state(key, value).await,
            CheckHandler::NonTransactional(h) => h.set_state(key, value),
        }
    }

    pub fn get_state(&self, key: &str) -> String {
        match self {
            CheckHandler::Transactional(h) => h.get_state(key),
            CheckHandler::NonTransactional(h) => h.get_state(key),
        }
    }

    pub async fn stop(&self) -> HandlerResult<()> {
        match self {
            CheckHandler::Transactional(h) => h.stop().await,
            CheckHandler::NonTransactional(h) => {
                h.stop();
                Ok(())
            }
        }
    }

    pub fn is_running(&self) -> bool {
        match self {
            CheckHandler::Transactional(h) => h.is_running(),
            CheckHandler::NonTransactional(h) => h.is_running(),
        }
    }

    // Topology

    pub async fn submit_start_snapshot(&self, instance: Instance) -> HandlerResult<()> {
        self.submit(Submission::StartSnapshot { instance }).await
    }

    pub async fn submit_stop_snapshot(&self, instance: Instance) -> HandlerResult<()> {
        self.submit(Submission::StopSnapshot { instance }).await
    }

    pub async fn submit_component(
        &self,
        instance: Instance,
        component: Component,
    ) -> HandlerResult<()> {
        self.submit(Submission::Component {
            instance,
            component,
        })
        .await
    }

    pub async fn submit_relation(&self, instance: Instance, relation: Relation) -> HandlerResult<()> {
        self.submit(Submission::Relation { instance, relation })
            .await
    }

    pub async fn submit_delete(
        &self,
        instance: Instance,
        id: impl Into<String>,
    ) -> HandlerResult<()> {
        self.submit(Submission::Delete {
            instance,
            id: id.into(),
        })
        .await
    }

    // Health

    pub async fn submit_health_start_snapshot(
        &self,
        stream: Stream,
        repeat_interval_s: u32,
        expiry_interval_s: u32,
    ) -> HandlerResult<()> {
        self.submit(Submission::HealthStartSnapshot {
            stream,
            repeat_interval_s,
            expiry_interval_s,
        })
        .await
    }

    pub async fn submit_health_check_data(
        &self,
        stream: Stream,
        data: CheckData,
    ) -> HandlerResult<()> {
        self.submit(Submission::HealthCheckData { stream, data })
            .await
    }

    pub async fn submit_health_stop_snapshot(&self, stream: Stream) -> HandlerResult<()> {
        self.submit(Submission::HealthStopSnapshot { stream }).await
    }

    // Telemetry

    pub async fn submit_raw_metric(&self, metric: RawMetric) -> HandlerResult<()> {
        self.submit(Submission::RawMetric(metric)).await
    }

    pub async fn submit_event(&self, event: Event) -> HandlerResult<()> {
        self.submit(Submission::Event(event)).await
    }
}

impl From<TransactionalHandler> for CheckHandler {
    fn from(handler: TransactionalHandler) -> Self {
        CheckHandler::Transactional(handler)
    }
}

impl From<NonTransactionalHandler> for CheckHandler {
    fn from(handler: NonTransactionalHandler) -> Self {
        CheckHandler::NonTransactional(handler)
    }
}
