//! receptor-txn — transaction manager for Receptor.
//!
//! Owns the authoritative map of in-flight transactions. Every mutation is
//! a message on one bounded queue, applied serially by a single loop; a
//! periodic tick removes finished transactions and ages idle ones through
//! `Stale` to eviction. Outcomes are reported to the owning check handler
//! as [`TxNotification`]s on the channel it registered at start.
//!
//! ```text
//!  handler ──start/set_state/discard──┐
//!  batcher ──commit_action────────────┼──▶ [ TxMessage queue ] ──▶ loop ──▶ notify channel
//!  forwarder ──ack/reject/complete────┘                             │
//!                                                        tick ──────┘
//! ```

pub mod error;
pub mod manager;
pub mod types;

pub use error::{TxError, TxResult};
pub use manager::{TransactionManager, TransactionManagerConfig};
pub use types::{Action, Transaction, TransactionStatus, TxNotification};
