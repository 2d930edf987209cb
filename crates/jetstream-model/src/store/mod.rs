mod cache;

pub use cache::ResourceCache;

use crate::stream::StreamObject;

pub type Epoch = i64;

/// Change announced by the cache to its subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheChange {
    Add(StreamObject),
    Update {
        old: Box<StreamObject>,
        new: Box<StreamObject>,
    },
    Delete(StreamObject),
}

impl CacheChange {
    /// object as it is after the change, or last known for delete
    pub fn object(&self) -> &StreamObject {
        match self {
            Self::Add(obj) | Self::Delete(obj) => obj,
            Self::Update { new, .. } => new.as_ref(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub epoch: Epoch,
    pub add: i32,
    pub update_spec: i32,
    pub update_status: i32,
    pub update_meta: i32,
    pub delete: i32,
}

impl SyncStatus {
    pub fn has_spec_changes(&self) -> bool {
        self.add > 0 || self.update_spec > 0 || self.delete > 0
    }

    pub fn has_status_changes(&self) -> bool {
        self.update_status > 0
    }

    pub fn is_empty(&self) -> bool {
        !self.has_spec_changes() && !self.has_status_changes() && self.update_meta == 0
    }
}
