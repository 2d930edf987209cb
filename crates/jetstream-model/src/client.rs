use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::core::NameSpace;
use crate::event::ObjectEvent;
use crate::key::ObjectKey;
use crate::stream::{StreamObject, StreamStatus};

pub type SharedStore = Arc<dyn ResourceStore>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(ObjectKey),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("watch closed")]
    WatchClosed,
    /// requested version is older than retained history, caller must list again
    #[error("resource version {0} expired")]
    Expired(u64),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Full listing with version to start watching from
#[derive(Debug, Clone, Default)]
pub struct ObjectList {
    pub items: Vec<StreamObject>,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Added(StreamObject),
    Modified(StreamObject),
    Deleted(StreamObject),
}

impl WatchEvent {
    pub fn object(&self) -> &StreamObject {
        match self {
            Self::Added(obj) | Self::Modified(obj) | Self::Deleted(obj) => obj,
        }
    }

    pub fn resource_version(&self) -> u64 {
        self.object().resource_version()
    }
}

/// Declarative object store holding stream objects.
///
/// Finalizer operations are idempotent: adding a token already present or
/// removing an absent token succeeds without a write. Removing the last
/// finalizer from an object whose deletion was requested removes the object.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn list(&self, namespace: &NameSpace) -> Result<ObjectList, StoreError>;

    /// changes after `version`, batched.
    /// stream ends when the store closes the watch
    fn watch_since(
        &self,
        namespace: &NameSpace,
        version: Option<u64>,
    ) -> BoxStream<'static, Result<Vec<WatchEvent>, StoreError>>;

    async fn get(&self, key: &ObjectKey) -> Result<Option<StreamObject>, StoreError>;

    async fn update_status(
        &self,
        key: &ObjectKey,
        status: StreamStatus,
    ) -> Result<StreamObject, StoreError>;

    async fn add_finalizer(&self, key: &ObjectKey, token: &str) -> Result<(), StoreError>;

    async fn remove_finalizer(&self, key: &ObjectKey, token: &str) -> Result<(), StoreError>;

    async fn record_event(&self, event: ObjectEvent) -> Result<(), StoreError>;
}
