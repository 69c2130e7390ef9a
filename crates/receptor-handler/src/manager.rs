//! Check manager — registry of check handlers keyed by check id.

use std::collections::HashMap;
use std::sync::Arc;

use receptor_core::CheckId;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::context::{CheckConfig, HandlerContext};
use crate::handler::CheckHandler;
use crate::non_transactional::NonTransactionalHandler;
use crate::transactional::TransactionalHandler;

/// Hands out the handler for each check. Cheap to clone.
#[derive(Clone)]
pub struct CheckManager {
    handlers: Arc<RwLock<HashMap<CheckId, CheckHandler>>>,
    context: HandlerContext,
    transactional: bool,
}

impl CheckManager {
    /// With `transactional` false every handler is non-transactional.
    pub fn new(context: HandlerContext, transactional: bool) -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            context,
            transactional,
        }
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    /// Register a handler for a check, replacing (and stopping) any
    /// handler already registered under the same id.
    pub async fn register(
        &self,
        check_id: &str,
        config: impl Into<String>,
        init_config: impl Into<String>,
    ) -> CheckHandler {
        let config = CheckConfig::new(check_id).with_config(config, init_config);
        let handler = self.build(config, self.transactional);
        let previous = self
            .handlers
            .write()
            .await
            .insert(check_id.to_string(), handler.clone());
        if let Some(previous) = previous {
            stop_handler(&previous).await;
        }
        debug!(%check_id, transactional = handler.is_transactional(), "registered check handler");
        handler
    }

    /// Remove and stop a check's handler.
    pub async fn unregister(&self, check_id: &str) {
        let removed = self.handlers.write().await.remove(check_id);
        if let Some(handler) = removed {
            stop_handler(&handler).await;
            debug!(%check_id, "unregistered check handler");
        }
    }

    /// The handler for `check_id`. Unknown checks get a non-transactional
    /// handler, registered on first use.
    pub async fn get(&self, check_id: &str) -> CheckHandler {
        if let Some(handler) = self.handlers.read().await.get(check_id) {
            return handler.clone();
        }

        let mut handlers = self.handlers.write().await;
        handlers
            .entry(check_id.to_string())
            .or_insert_with(|| {
                debug!(%check_id, "no check handler registered, using a non-transactional one");
                self.build(CheckConfig::new(check_id), false)
            })
            .clone()
    }

    /// Replace a check's handler with a transactional one carrying the same
    /// configuration. Returns `None` when the check is not registered.
    pub async fn make_transactional(&self, check_id: &str) -> Option<CheckHandler> {
        let mut handlers = self.handlers.write().await;
        let Some(existing) = handlers.get(check_id).cloned() else {
            error!(%check_id, "no check handler to make transactional");
            return None;
        };
        if existing.is_transactional() {
            return Some(existing);
        }
        if !self.transactional {
            warn!(%check_id, "check transactionality is disabled, keeping non-transactional handler");
            return Some(existing);
        }

        let handler = self.build(existing.config().clone(), true);
        handlers.insert(check_id.to_string(), handler.clone());
        drop(handlers);

        stop_handler(&existing).await;
        info!(%check_id, "check handler made transactional");
        Some(handler)
    }

    pub async fn len(&self) -> usize {
        self.handlers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handlers.read().await.is_empty()
    }

    /// Stop and remove every handler.
    pub async fn stop(&self) {
        let handlers: Vec<CheckHandler> = self
            .handlers
            .write()
            .await
            .drain()
            .map(|(_, handler)| handler)
            .collect();
        info!(count = handlers.len(), "stopping check handlers");
        for handler in &handlers {
            stop_handler(handler).await;
        }
    }

    fn build(&self, config: CheckConfig, transactional: bool) -> CheckHandler {
        if transactional {
            TransactionalHandler::start(config, self.context.clone()).into()
        } else {
            NonTransactionalHandler::new(config, self.context.clone()).into()
        }
    }
}

async fn stop_handler(handler: &CheckHandler) {
    if let Err(e) = handler.stop().await {
        debug!(check_id = %handler.check_id(), error = %e, "check handler already stopped");
    }
}
