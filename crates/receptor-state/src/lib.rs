//! receptor-state — durable check state for Receptor.
//!
//! Checks persist small opaque strings (usually JSON) between runs. Values
//! live as plain files under a root directory, one directory per key
//! prefix, and reads are served from an in-memory cache whose entries
//! expire after a configurable TTL. The disk copy is authoritative: the
//! cache is only updated once a write has landed.

pub mod cache;
pub mod error;
pub mod store;

pub use cache::StateCache;
pub use error::{StateError, StateResult};
pub use store::{CheckStateStore, EMPTY_STATE, StateConfig};
