use std::collections::HashMap;
use std::sync::Arc;

use async_channel::{Receiver, Sender, unbounded};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use jetstream_types::event::StickyEvent;

use crate::client::WatchEvent;
use crate::key::ObjectKey;
use crate::stream::StreamObject;

use super::{CacheChange, Epoch, SyncStatus};

#[derive(Debug, Default)]
struct CacheState {
    objects: HashMap<ObjectKey, StreamObject>,
    epoch: Epoch,
}

#[derive(Default)]
struct Diff {
    spec: bool,
    status: bool,
    meta: bool,
}

impl Diff {
    fn between(old: &StreamObject, new: &StreamObject) -> Self {
        let mut old_meta = old.metadata.clone();
        old_meta.resource_version = new.metadata.resource_version;
        Self {
            spec: old.spec != new.spec,
            status: old.status != new.status,
            meta: old_meta != new.metadata,
        }
    }

    fn is_change(&self) -> bool {
        self.spec || self.status || self.meta
    }
}

/// Local, eventually consistent copy of desired state objects.
///
/// Filled by the watch feed, read synchronously by the reconciler. Every
/// effective change is announced to subscribers.
#[derive(Debug, Default)]
pub struct ResourceCache {
    state: RwLock<CacheState>,
    synced: StickyEvent,
    subscribers: Mutex<Vec<Sender<CacheChange>>>,
}

impl ResourceCache {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, key: &ObjectKey) -> Option<StreamObject> {
        self.state.read().objects.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<ObjectKey> {
        self.state.read().objects.keys().cloned().collect()
    }

    pub fn epoch(&self) -> Epoch {
        self.state.read().epoch
    }

    /// true once first full listing has been applied
    pub fn has_synced(&self) -> bool {
        self.synced.is_set()
    }

    pub async fn wait_for_sync(&self) {
        self.synced.listen().await
    }

    /// receiver of every subsequent change
    pub fn subscribe(&self) -> Receiver<CacheChange> {
        let (sender, receiver) = unbounded();
        self.subscribers.lock().push(sender);
        receiver
    }

    fn publish(&self, changes: Vec<CacheChange>) {
        if changes.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sender| {
            changes
                .iter()
                .all(|change| sender.try_send(change.clone()).is_ok())
        });
    }

    /// stores object, returns change if any
    fn upsert(
        objects: &mut HashMap<ObjectKey, StreamObject>,
        status: &mut SyncStatus,
        object: StreamObject,
    ) -> Option<CacheChange> {
        let key = ObjectKey::from(&object.metadata);
        match objects.get(&key) {
            None => {
                status.add += 1;
                objects.insert(key, object.clone());
                Some(CacheChange::Add(object))
            }
            Some(old) if old.resource_version() > object.resource_version() => {
                trace!(%key, "stale object ignored");
                None
            }
            Some(old) => {
                let diff = Diff::between(old, &object);
                if !diff.is_change() {
                    return None;
                }
                if diff.spec {
                    status.update_spec += 1;
                }
                if diff.status {
                    status.update_status += 1;
                }
                if diff.meta {
                    status.update_meta += 1;
                }
                let old = objects.insert(key, object.clone())?;
                Some(CacheChange::Update {
                    old: Box::new(old),
                    new: Box::new(object),
                })
            }
        }
    }

    /// replace content with full listing.
    /// objects missing from listing are deleted, cache is marked synced
    pub fn sync_all(&self, incoming: Vec<StreamObject>) -> SyncStatus {
        let mut status = SyncStatus::default();
        let mut changes = vec![];

        let mut guard = self.state.write();
        debug!(epoch = guard.epoch, incoming = incoming.len(), "sync all");
        guard.epoch += 1;

        let mut missing: Vec<ObjectKey> = guard.objects.keys().cloned().collect();
        for object in incoming {
            let key = ObjectKey::from(&object.metadata);
            missing.retain(|k| k != &key);
            if let Some(change) = Self::upsert(&mut guard.objects, &mut status, object) {
                changes.push(change);
            }
        }

        for key in missing {
            if let Some(removed) = guard.objects.remove(&key) {
                status.delete += 1;
                changes.push(CacheChange::Delete(removed));
            }
        }

        status.epoch = guard.epoch;
        drop(guard);

        self.publish(changes);
        if !self.synced.is_set() {
            debug!("cache synced");
            self.synced.notify();
        }

        debug!(
            "sync all: [add:{}, mod_spec:{}, mod_status: {}, mod_meta: {}, del:{}], epoch: {}",
            status.add,
            status.update_spec,
            status.update_status,
            status.update_meta,
            status.delete,
            status.epoch
        );
        status
    }

    /// apply watch events. returns None if nothing changed
    pub fn apply_changes(&self, events: Vec<WatchEvent>) -> Option<SyncStatus> {
        let mut status = SyncStatus::default();
        let mut changes = vec![];

        let mut guard = self.state.write();
        for event in events {
            match event {
                WatchEvent::Added(object) | WatchEvent::Modified(object) => {
                    if let Some(change) = Self::upsert(&mut guard.objects, &mut status, object) {
                        changes.push(change);
                    }
                }
                WatchEvent::Deleted(object) => {
                    let key = ObjectKey::from(&object.metadata);
                    let stale = guard
                        .objects
                        .get(&key)
                        .is_some_and(|old| old.resource_version() > object.resource_version());
                    if stale {
                        trace!(%key, "stale delete ignored");
                        continue;
                    }
                    if let Some(removed) = guard.objects.remove(&key) {
                        status.delete += 1;
                        changes.push(CacheChange::Delete(removed));
                    }
                }
            }
        }

        if status.is_empty() {
            trace!(epoch = guard.epoch, "apply changes: no changes");
            return None;
        }

        guard.epoch += 1;
        status.epoch = guard.epoch;
        drop(guard);

        self.publish(changes);
        debug!(
            "apply changes: [add:{}, mod_spec:{}, mod_status: {}, mod_meta: {}, del:{}], epoch: {}",
            status.add,
            status.update_spec,
            status.update_status,
            status.update_meta,
            status.delete,
            status.epoch
        );
        Some(status)
    }

    /// announce every cached object again as update
    pub fn resync(&self) -> usize {
        let changes: Vec<CacheChange> = self
            .state
            .read()
            .objects
            .values()
            .map(|object| CacheChange::Update {
                old: Box::new(object.clone()),
                new: Box::new(object.clone()),
            })
            .collect();
        let count = changes.len();
        trace!(count, "resync");
        self.publish(changes);
        count
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::select;

    use fluvio_future::timer::sleep;

    use crate::client::WatchEvent;
    use crate::core::ObjectMeta;
    use crate::key::ObjectKey;
    use crate::store::CacheChange;
    use crate::stream::{StreamObject, StreamSpec};

    use super::ResourceCache;

    fn stream(name: &str, version: u64) -> StreamObject {
        let mut object = StreamObject::new(
            ObjectMeta::new(name, "default"),
            StreamSpec::new(name.to_uppercase(), "file".to_owned()),
        );
        object.metadata.resource_version = version;
        object
    }

    #[fluvio_future::test]
    async fn test_sync_all_marks_synced() {
        let cache = ResourceCache::default();
        assert!(!cache.has_synced());

        let changes = cache.subscribe();
        let status = cache.sync_all(vec![stream("a", 1), stream("b", 2)]);
        assert_eq!(status.add, 2);
        assert!(cache.has_synced());

        select! {
            _ = cache.wait_for_sync() => {},
            _ = sleep(Duration::from_millis(100)) => panic!("already synced"),
        }

        assert_eq!(changes.len(), 2);
        assert!(cache.get(&ObjectKey::new("default", "a")).is_some());

        // b missing from second listing
        let status = cache.sync_all(vec![stream("a", 1)]);
        assert_eq!(status.add, 0);
        assert_eq!(status.delete, 1);
        assert_eq!(cache.len(), 1);
    }

    #[fluvio_future::test]
    async fn test_apply_changes_idempotent() {
        let cache = ResourceCache::default();
        let changes = cache.subscribe();

        let status = cache
            .apply_changes(vec![WatchEvent::Added(stream("a", 1))])
            .expect("changed");
        assert_eq!(status.add, 1);

        // same object again
        assert!(
            cache
                .apply_changes(vec![WatchEvent::Modified(stream("a", 1))])
                .is_none()
        );

        // stale version
        let mut stale = stream("a", 0);
        stale.spec.storage = "memory".to_owned();
        assert!(cache.apply_changes(vec![WatchEvent::Modified(stale)]).is_none());

        let mut newer = stream("a", 2);
        newer.spec.storage = "memory".to_owned();
        let status = cache
            .apply_changes(vec![WatchEvent::Modified(newer)])
            .expect("changed");
        assert_eq!(status.update_spec, 1);

        let status = cache
            .apply_changes(vec![WatchEvent::Deleted(stream("a", 3))])
            .expect("changed");
        assert_eq!(status.delete, 1);
        assert!(
            cache
                .apply_changes(vec![WatchEvent::Deleted(stream("a", 3))])
                .is_none()
        );

        let received: Vec<CacheChange> = std::iter::from_fn(|| changes.try_recv().ok()).collect();
        assert_eq!(received.len(), 3);
        assert!(matches!(received[0], CacheChange::Add(_)));
        assert!(matches!(received[1], CacheChange::Update { .. }));
        assert!(matches!(received[2], CacheChange::Delete(_)));
    }

    #[fluvio_future::test]
    async fn test_resync_announces_all() {
        let cache = ResourceCache::default();
        cache.sync_all(vec![stream("a", 1), stream("b", 2)]);
        let changes = cache.subscribe();
        assert_eq!(cache.resync(), 2);
        assert_eq!(changes.len(), 2);
    }
}
