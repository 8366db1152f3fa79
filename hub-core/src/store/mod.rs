//! The three per-agent stores: reactive state, plain storage, and the
//! virtual DOM container.

pub mod dom_store;
pub mod state_store;
pub mod storage_store;

pub use dom_store::{DomError, DomStore};
pub use state_store::{Escalation, StateStore, StateStoreError};
pub use storage_store::StorageStore;
