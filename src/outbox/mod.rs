//! Durable holding area for mutations that could not reach the network.
//!
//! Once `enqueue` returns, the write survives a process restart until the
//! replay succeeds. Insertion order is significant: the sync coordinator
//! replays each collection strictly in the order writes were created.

mod store;

pub use store::{OutboxError, OutboxStore, PendingMutation, ResourceKind, SqliteOutbox};
