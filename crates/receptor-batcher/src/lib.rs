//! receptor-batcher — submission batching for Receptor.
//!
//! Two single-writer loops share one [`BatchBuilder`]:
//!
//! - [`Batcher`] accumulates submissions per check *and transaction*. Every
//!   payload it emits registers one action per transaction with the
//!   transaction manager before it is handed to the forwarder, and
//!   `StopTransaction` marks the last one as completing the transaction.
//! - [`SimpleBatcher`] serves checks that do not use transactions. It
//!   flushes on size, capacity, snapshot boundaries and the ticker, and
//!   never talks to the transaction manager.

pub mod builder;
pub mod config;
pub mod error;
pub mod simple;
pub mod transactional;

pub use builder::{BatchBuilder, BatchState, BatchSummary, BatchTransaction, build_payload};
pub use config::BatcherConfig;
pub use error::{BatcherError, BatcherResult};
pub use simple::SimpleBatcher;
pub use transactional::Batcher;
