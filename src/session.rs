//! Session state
//!
//! One mutable record per journaling session, observed by the UI and
//! persisted to key-value storage after every change.

mod state;
mod storage;
mod store;

#[cfg(test)]
mod proptests;

pub use state::{ModeTransition, PersistedSession, SessionState, StateChange, StateUpdate, Turn};
pub use storage::{KeyValueStore, MemoryStorage, SqliteStorage, StorageError};
pub use store::{ObserverHandle, SessionStore, StateError, STORAGE_KEY};
