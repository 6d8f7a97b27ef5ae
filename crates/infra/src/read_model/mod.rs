//! Disposable read models kept beside each store.
//!
//! The aggregate streams are the source of truth; read models hold the latest
//! known state of every aggregate for list, filter and conflict queries.

pub mod record_store;

pub use record_store::{InMemoryRecordStore, RecordStore};
