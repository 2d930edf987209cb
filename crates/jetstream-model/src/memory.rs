//!
//! # In memory resource store
//!
//! Keeps stream objects in a map with store assigned resource versions and
//! fans changes out to watchers. Besides the [`ResourceStore`] contract it
//! exposes the operations an external actor performs (apply, delete) and
//! scripted failures for tests and local runs.
//!
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_channel::{Sender, unbounded};
use async_lock::RwLock;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::client::{ObjectList, ResourceStore, StoreError, WatchEvent};
use crate::core::NameSpace;
use crate::event::ObjectEvent;
use crate::key::ObjectKey;
use crate::stream::{StreamObject, StreamStatus};

/// number of watch events retained for replay
const HISTORY_LIMIT: usize = 1000;

type WatchBatch = Result<Vec<WatchEvent>, StoreError>;

/// Store operation that can be scripted to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreFault {
    List,
    Finalizer,
    Status,
    Event,
}

#[derive(Debug, Default)]
struct StoreState {
    objects: BTreeMap<ObjectKey, StreamObject>,
    version: u64,
    next_uid: u64,
}

impl StoreState {
    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}

#[derive(Debug)]
struct Watcher {
    namespace: NameSpace,
    sender: Sender<WatchBatch>,
}

#[derive(Debug, Default)]
struct WatchLog {
    history: VecDeque<WatchEvent>,
    /// highest version dropped from history
    compacted: u64,
    watchers: Vec<Watcher>,
}

impl WatchLog {
    fn publish(&mut self, event: WatchEvent) {
        if self.history.len() >= HISTORY_LIMIT {
            if let Some(dropped) = self.history.pop_front() {
                self.compacted = dropped.resource_version();
            }
        }
        self.history.push_back(event.clone());

        self.watchers.retain(|watcher| {
            if !watcher.namespace.matches(&event.object().metadata.namespace) {
                return !watcher.sender.is_closed();
            }
            watcher.sender.try_send(Ok(vec![event.clone()])).is_ok()
        });
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    watch: Mutex<WatchLog>,
    events: Mutex<Vec<ObjectEvent>>,
    faults: Mutex<HashMap<StoreFault, (u32, StoreError)>>,
    status_writes: Mutex<u32>,
}

impl MemoryStore {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// create or replace object as an external actor would.
    /// spec changes bump generation, status and finalizers of existing object are kept
    pub async fn apply(&self, object: StreamObject) -> Result<StreamObject, StoreError> {
        let key = object
            .key()
            .map_err(|err| StoreError::Conflict(err.to_string()))?;
        let mut state = self.state.write().await;
        let version = state.version + 1;

        let (stored, event) = if let Some(existing) = state.objects.get(&key) {
            if existing.is_being_deleted() {
                return Err(StoreError::Conflict(format!("{key} is being deleted")));
            }
            let mut updated = existing.clone();
            if updated.spec != object.spec {
                updated.metadata.generation += 1;
                updated.spec = object.spec;
            }
            updated.metadata.resource_version = version;
            (updated.clone(), WatchEvent::Modified(updated))
        } else {
            state.next_uid += 1;
            let mut created = object;
            created.metadata.uid = format!("uid-{}", state.next_uid);
            created.metadata.generation = 1;
            created.metadata.resource_version = version;
            created.metadata.deletion_timestamp = None;
            (created.clone(), WatchEvent::Added(created))
        };

        state.version = version;
        state.objects.insert(key.clone(), stored.clone());
        debug!(%key, version, "applied");
        self.watch.lock().publish(event);
        Ok(stored)
    }

    /// request deletion. objects holding finalizers only get deletion marker
    pub async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let Some(existing) = state.objects.get(key) else {
            return Err(StoreError::NotFound(key.clone()));
        };

        if existing.metadata.finalizers.is_empty() {
            return self.remove_locked(&mut state, key);
        }

        if existing.is_being_deleted() {
            trace!(%key, "deletion already requested");
            return Ok(());
        }

        let version = state.next_version();
        if let Some(object) = state.objects.get_mut(key) {
            object.metadata.deletion_timestamp = Some(Utc::now());
            object.metadata.resource_version = version;
            let marked = object.clone();
            debug!(%key, version, "deletion marker set");
            self.watch.lock().publish(WatchEvent::Modified(marked));
        }
        Ok(())
    }

    /// remove object ignoring its finalizers
    pub async fn force_delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        self.remove_locked(&mut state, key)
    }

    fn remove_locked(&self, state: &mut StoreState, key: &ObjectKey) -> Result<(), StoreError> {
        let version = state.next_version();
        let Some(mut removed) = state.objects.remove(key) else {
            return Err(StoreError::NotFound(key.clone()));
        };
        removed.metadata.resource_version = version;
        debug!(%key, version, "removed");
        self.watch.lock().publish(WatchEvent::Deleted(removed));
        Ok(())
    }

    /// events recorded so far
    pub fn events(&self) -> Vec<ObjectEvent> {
        self.events.lock().clone()
    }

    /// number of successful status writes
    pub fn status_writes(&self) -> u32 {
        *self.status_writes.lock()
    }

    /// fail next `count` calls of `fault` with `error`
    pub fn fail_next(&self, fault: StoreFault, count: u32, error: StoreError) {
        self.faults.lock().insert(fault, (count, error));
    }

    /// end every open watch stream
    pub fn close_watches(&self) {
        self.watch.lock().watchers.clear();
    }

    fn check_fault(&self, fault: StoreFault) -> Result<(), StoreError> {
        let mut faults = self.faults.lock();
        if let Some((remaining, error)) = faults.get_mut(&fault) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(error.clone());
            }
        }
        Ok(())
    }

    async fn modify<F>(&self, key: &ObjectKey, update: F) -> Result<StreamObject, StoreError>
    where
        F: FnOnce(&mut StreamObject) -> Result<bool, StoreError>,
    {
        let mut state = self.state.write().await;
        let version = state.version + 1;
        let Some(object) = state.objects.get_mut(key) else {
            return Err(StoreError::NotFound(key.clone()));
        };

        if !update(&mut *object)? {
            return Ok(object.clone());
        }

        object.metadata.resource_version = version;
        let modified = object.clone();
        state.version = version;
        self.watch
            .lock()
            .publish(WatchEvent::Modified(modified.clone()));
        Ok(modified)
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn list(&self, namespace: &NameSpace) -> Result<ObjectList, StoreError> {
        self.check_fault(StoreFault::List)?;
        let state = self.state.read().await;
        let items: Vec<StreamObject> = state
            .objects
            .values()
            .filter(|obj| namespace.matches(&obj.metadata.namespace))
            .cloned()
            .collect();
        trace!(%namespace, items = items.len(), version = state.version, "list");
        Ok(ObjectList {
            items,
            version: state.version,
        })
    }

    fn watch_since(
        &self,
        namespace: &NameSpace,
        version: Option<u64>,
    ) -> BoxStream<'static, WatchBatch> {
        let mut log = self.watch.lock();
        let version = version.unwrap_or(0);

        if version < log.compacted {
            debug!(version, compacted = log.compacted, "watch version expired");
            return stream::once(async move { Err(StoreError::Expired(version)) }).boxed();
        }

        let (sender, receiver) = unbounded();
        let replay: Vec<WatchEvent> = log
            .history
            .iter()
            .filter(|event| {
                event.resource_version() > version
                    && namespace.matches(&event.object().metadata.namespace)
            })
            .cloned()
            .collect();
        if !replay.is_empty() {
            let _ = sender.try_send(Ok(replay));
        }

        log.watchers.push(Watcher {
            namespace: namespace.clone(),
            sender,
        });

        receiver.boxed()
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<StreamObject>, StoreError> {
        Ok(self.state.read().await.objects.get(key).cloned())
    }

    async fn update_status(
        &self,
        key: &ObjectKey,
        status: StreamStatus,
    ) -> Result<StreamObject, StoreError> {
        self.check_fault(StoreFault::Status)?;
        let object = self
            .modify(key, |object| {
                object.status = status;
                Ok(true)
            })
            .await?;
        *self.status_writes.lock() += 1;
        Ok(object)
    }

    async fn add_finalizer(&self, key: &ObjectKey, token: &str) -> Result<(), StoreError> {
        self.check_fault(StoreFault::Finalizer)?;
        self.modify(key, |object| {
            if object.has_finalizer(token) {
                return Ok(false);
            }
            if object.is_being_deleted() {
                return Err(StoreError::Conflict(format!(
                    "cannot add finalizer to {key} while being deleted"
                )));
            }
            object.metadata.finalizers.push(token.to_owned());
            Ok(true)
        })
        .await?;
        Ok(())
    }

    async fn remove_finalizer(&self, key: &ObjectKey, token: &str) -> Result<(), StoreError> {
        self.check_fault(StoreFault::Finalizer)?;
        let mut state = self.state.write().await;
        let Some(object) = state.objects.get(key) else {
            return Err(StoreError::NotFound(key.clone()));
        };

        if !object.has_finalizer(token) {
            return Ok(());
        }

        let remaining: Vec<String> = object
            .metadata
            .finalizers
            .iter()
            .filter(|f| *f != token)
            .cloned()
            .collect();

        if remaining.is_empty() && object.is_being_deleted() {
            debug!(%key, "last finalizer removed");
            return self.remove_locked(&mut state, key);
        }

        let version = state.next_version();
        if let Some(object) = state.objects.get_mut(key) {
            object.metadata.finalizers = remaining;
            object.metadata.resource_version = version;
            let modified = object.clone();
            self.watch.lock().publish(WatchEvent::Modified(modified));
        }
        Ok(())
    }

    async fn record_event(&self, event: ObjectEvent) -> Result<(), StoreError> {
        self.check_fault(StoreFault::Event)?;
        self.events.lock().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use futures_util::StreamExt;
    use tokio::select;

    use fluvio_future::timer::sleep;

    use crate::client::{ResourceStore, StoreError, WatchEvent};
    use crate::core::{NameSpace, ObjectMeta};
    use crate::key::ObjectKey;
    use crate::stream::{StreamObject, StreamSpec};

    use super::{MemoryStore, StoreFault};

    fn orders() -> StreamObject {
        StreamObject::new(
            ObjectMeta::new("orders", "default"),
            StreamSpec::new("ORDERS", "file"),
        )
    }

    fn key() -> ObjectKey {
        ObjectKey::new("default", "orders")
    }

    #[fluvio_future::test]
    async fn test_apply_assigns_versions() {
        let store = MemoryStore::default();
        let created = store.apply(orders()).await.expect("apply");
        assert_eq!(created.metadata.generation, 1);
        assert_eq!(created.metadata.resource_version, 1);
        assert!(!created.metadata.uid.is_empty());

        // same spec does not bump generation
        let same = store.apply(orders()).await.expect("apply");
        assert_eq!(same.metadata.generation, 1);
        assert_eq!(same.metadata.resource_version, 2);

        let mut changed = orders();
        changed.spec.storage = "memory".to_owned();
        let changed = store.apply(changed).await.expect("apply");
        assert_eq!(changed.metadata.generation, 2);
        assert_eq!(changed.metadata.uid, created.metadata.uid);
    }

    #[fluvio_future::test]
    async fn test_delete_with_finalizer_sets_marker() {
        let store = MemoryStore::default();
        store.apply(orders()).await.expect("apply");
        store.add_finalizer(&key(), "f1").await.expect("add");
        // idempotent
        store.add_finalizer(&key(), "f1").await.expect("add");

        store.delete(&key()).await.expect("delete");
        let marked = store.get(&key()).await.expect("get").expect("exists");
        assert!(marked.is_being_deleted());
        assert_eq!(marked.metadata.finalizers, vec!["f1".to_owned()]);

        // new spec is rejected while deleting
        assert!(matches!(
            store.apply(orders()).await,
            Err(StoreError::Conflict(_))
        ));

        store.remove_finalizer(&key(), "other").await.expect("noop");
        store.remove_finalizer(&key(), "f1").await.expect("remove");
        assert!(store.get(&key()).await.expect("get").is_none());
        assert!(matches!(
            store.remove_finalizer(&key(), "f1").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[fluvio_future::test]
    async fn test_delete_without_finalizer_removes() {
        let store = MemoryStore::default();
        store.apply(orders()).await.expect("apply");
        store.delete(&key()).await.expect("delete");
        assert!(store.get(&key()).await.expect("get").is_none());
        assert!(matches!(
            store.delete(&key()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[fluvio_future::test]
    async fn test_watch_replays_after_version() {
        let store = MemoryStore::default();
        store.apply(orders()).await.expect("apply");
        let list = store.list(&NameSpace::All).await.expect("list");
        assert_eq!(list.items.len(), 1);

        store.add_finalizer(&key(), "f1").await.expect("add");

        let mut watch = store.watch_since(&NameSpace::All, Some(list.version));
        let batch = watch.next().await.expect("batch").expect("ok");
        assert_eq!(batch.len(), 1);
        assert!(matches!(&batch[0], WatchEvent::Modified(obj) if obj.has_finalizer("f1")));

        store.force_delete(&key()).await.expect("delete");
        let batch = watch.next().await.expect("batch").expect("ok");
        assert!(matches!(&batch[0], WatchEvent::Deleted(_)));

        store.close_watches();
        select! {
            next = watch.next() => assert!(next.is_none()),
            _ = sleep(Duration::from_millis(100)) => panic!("watch should end"),
        }
    }

    #[fluvio_future::test]
    async fn test_watch_filters_namespace() {
        let store = MemoryStore::default();
        let mut watch = store.watch_since(&NameSpace::from("other"), None);
        store.apply(orders()).await.expect("apply");

        let mut other = orders();
        other.metadata.namespace = "other".to_owned();
        store.apply(other).await.expect("apply");

        let batch = watch.next().await.expect("batch").expect("ok");
        assert_eq!(batch[0].object().metadata.namespace, "other");
    }

    #[fluvio_future::test]
    async fn test_scripted_list_failure() {
        let store = MemoryStore::default();
        store.fail_next(
            StoreFault::List,
            2,
            StoreError::Unavailable("down".to_owned()),
        );
        assert!(store.list(&NameSpace::All).await.is_err());
        assert!(store.list(&NameSpace::All).await.is_err());
        assert!(store.list(&NameSpace::All).await.is_ok());
    }
}
