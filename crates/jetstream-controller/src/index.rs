use std::collections::HashMap;

use jetstream_model::ObjectKey;

use crate::backend::StreamHandle;

/// Last known actual stream per desired object. Owned by the reconciler.
#[derive(Debug, Default)]
pub struct StreamIndex {
    handles: HashMap<ObjectKey, StreamHandle>,
}

impl StreamIndex {
    pub fn get(&self, key: &ObjectKey) -> Option<&StreamHandle> {
        self.handles.get(key)
    }

    /// returns replaced handle
    pub fn insert(&mut self, key: ObjectKey, handle: StreamHandle) -> Option<StreamHandle> {
        self.handles.insert(key, handle)
    }

    pub fn remove(&mut self, key: &ObjectKey) -> Option<StreamHandle> {
        self.handles.remove(key)
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.handles.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ObjectKey> {
        self.handles.keys()
    }
}
