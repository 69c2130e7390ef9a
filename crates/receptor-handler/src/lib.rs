//! receptor-handler — check-facing side of Receptor.
//!
//! A [`CheckHandler`] is what a check talks to. The transactional variant
//! runs one loop per check that keeps at most one transaction in flight,
//! forwards the check's submissions to the batcher tagged with that
//! transaction, and commits staged state once the transaction manager
//! reports success. The non-transactional variant hands submissions
//! straight to the non-transactional batcher.
//!
//! [`CheckManager`] maps check ids to handlers, and [`Pipeline`] builds the
//! shared loops (state store, transaction manager, forwarder, batchers)
//! exactly once and hands them to the manager.

pub mod context;
pub mod error;
pub mod handler;
pub mod manager;
pub mod non_transactional;
pub mod pipeline;
pub mod transactional;

pub use context::{CheckConfig, HandlerContext};
pub use error::{HandlerError, HandlerResult};
pub use handler::CheckHandler;
pub use manager::CheckManager;
pub use non_transactional::NonTransactionalHandler;
pub use pipeline::Pipeline;
pub use transactional::{HANDLER_STOPPED_REASON, TransactionalHandler};
