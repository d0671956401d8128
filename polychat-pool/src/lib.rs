//! Multi-server connection pool for polychat clients.
//!
//! A UI that can talk to several independent chat servers at once needs one
//! place that tracks which connections exist, which one the user is looking
//! at, and what to do when a connection dies. That place is [`ServerPool`]:
//! it owns the live clients, retries failed hosts on a fixed timer, and
//! re-emits client events on a single [`PoolEvent`] stream, but only for
//! the currently active server, so UI components subscribe once instead of
//! re-subscribing on every switch.
//!
//! The pool is an explicitly constructed value, not a global: build one with
//! [`ServerPool::new`] and either drive it from your own event loop (call
//! [`ServerPool::pump`]) or hand it to [`spawn`] to run it as a task behind
//! a cloneable [`PoolHandle`].

pub mod event;
pub mod handle;
pub mod pool;
pub mod storage;

pub use event::PoolEvent;
pub use handle::{spawn, PoolHandle, PoolSnapshot};
pub use pool::{
    AddOutcome, Connect, FailedServer, PoolError, ServerEntry, ServerId, ServerPool, UiState,
    WsConnector,
};
pub use storage::Storage;
