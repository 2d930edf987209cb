//!
//! # JetStream stream model
//!
//! Desired-state objects for streams, the contract of the resource store that
//! holds them, an in-memory store implementation and the local cache fed by
//! the store's watch stream.
//!
pub mod core;
pub mod key;
pub mod stream;
pub mod event;
pub mod client;
pub mod memory;
pub mod store;

pub use self::core::{ObjectMeta, NameSpace};
pub use self::key::{ObjectKey, KeyError};
pub use self::stream::{StreamObject, StreamSpec, StreamStatus, Condition, ConditionStatus};
pub use self::event::{ObjectEvent, EventSeverity};
pub use self::client::{ResourceStore, SharedStore, StoreError, ObjectList, WatchEvent};
pub use self::memory::MemoryStore;
pub use self::store::{ResourceCache, CacheChange, SyncStatus};
