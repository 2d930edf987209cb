//!
//! # Cache dispatcher
//!
//! Feeds the resource cache from the resource store: full listing first,
//! then the watch stream. The store is listed again whenever the watch ends
//! and on every resync period.
//!
use std::sync::Arc;
use std::time::{Duration, Instant};

use adaptive_backoff::prelude::{
    Backoff, BackoffBuilder, ExponentialBackoff, ExponentialBackoffBuilder,
};
use futures_util::StreamExt;
use tracing::{debug, error, info, instrument, trace, warn};

use fluvio_future::task::spawn;
use fluvio_future::timer::sleep;
use jetstream_model::{NameSpace, ResourceCache, SharedStore, StoreError};
use jetstream_types::defaults::{
    RELIST_BACKOFF_FACTOR, RELIST_BACKOFF_MAX_DURATION, RELIST_BACKOFF_MIN_DURATION,
};
use jetstream_types::event::StickyEvent;

use crate::error::ControllerError;

/// exponential backoff used between failed listings
pub(crate) fn create_backoff() -> Result<ExponentialBackoff, ControllerError> {
    ExponentialBackoffBuilder::default()
        .factor(RELIST_BACKOFF_FACTOR)
        .min(RELIST_BACKOFF_MIN_DURATION)
        .max(RELIST_BACKOFF_MAX_DURATION)
        .build()
        .map_err(|err| ControllerError::Backoff(err.to_string()))
}

enum WatchEnd {
    Relist,
    Resync,
    Shutdown,
}

pub struct CacheDispatcher {
    namespace: NameSpace,
    store: SharedStore,
    cache: Arc<ResourceCache>,
    resync_period: Duration,
    shutdown: Arc<StickyEvent>,
    backoff: ExponentialBackoff,
}

impl CacheDispatcher {
    pub fn start(
        namespace: NameSpace,
        store: SharedStore,
        cache: Arc<ResourceCache>,
        resync_period: Duration,
        shutdown: Arc<StickyEvent>,
    ) -> Result<(), ControllerError> {
        let dispatcher = Self {
            namespace,
            store,
            cache,
            resync_period,
            shutdown,
            backoff: create_backoff()?,
        };

        spawn(dispatcher.outer_loop());
        Ok(())
    }

    #[instrument(skip(self), name = "CacheDispatcher", fields(namespace = %self.namespace))]
    async fn outer_loop(mut self) {
        info!("starting cache dispatcher loop");
        let mut resync = false;
        loop {
            let Some(version) = self.list_until_success().await else {
                break;
            };

            if resync {
                let count = self.cache.resync();
                debug!(count, "resync announced");
            }

            match self.watch(version).await {
                WatchEnd::Relist => {
                    resync = false;
                }
                WatchEnd::Resync => {
                    resync = true;
                }
                WatchEnd::Shutdown => break,
            }
        }
        info!("cache dispatcher stopped");
    }

    /// list store into cache, backing off on failures.
    /// None on shutdown
    async fn list_until_success(&mut self) -> Option<u64> {
        use tokio::select;

        loop {
            if self.shutdown.is_set() {
                return None;
            }

            match self.store.list(&self.namespace).await {
                Ok(list) => {
                    self.backoff.reset();
                    let version = list.version;
                    let status = self.cache.sync_all(list.items);
                    debug!(version, epoch = status.epoch, "listed store");
                    return Some(version);
                }
                Err(err) => {
                    let wait = self.backoff.wait();
                    error!(%err, wait_ms = wait.as_millis() as u64, "cannot list store objects");
                    select! {
                        _ = self.shutdown.listen() => return None,
                        _ = sleep(wait) => {}
                    }
                }
            }
        }
    }

    async fn watch(&mut self, version: u64) -> WatchEnd {
        use tokio::select;

        let mut stream = self.store.watch_since(&self.namespace, Some(version));
        let mut resync_left = self.resync_period;

        loop {
            let mark = Instant::now();
            trace!(resync_ms = resync_left.as_millis() as u64, "waiting for watch events");

            select! {
                _ = self.shutdown.listen() => {
                    info!("shutdown, stopping watch");
                    return WatchEnd::Shutdown;
                },
                _ = sleep(resync_left) => {
                    debug!("resync period elapsed, listing again");
                    return WatchEnd::Resync;
                },
                next = stream.next() => {
                    match next {
                        Some(Ok(events)) => {
                            if let Some(status) = self.cache.apply_changes(events) {
                                trace!(epoch = status.epoch, "applied watch events");
                            }
                        }
                        Some(Err(StoreError::Expired(version))) => {
                            warn!(version, "watch version expired, listing again");
                            return WatchEnd::Relist;
                        }
                        Some(Err(err)) => error!(%err, "watch error"),
                        None => {
                            debug!("watch stream ended, listing again");
                            return WatchEnd::Relist;
                        }
                    }
                    resync_left = resync_left.saturating_sub(mark.elapsed());
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::time::Duration;

    use adaptive_backoff::prelude::Backoff;
    use tokio::select;

    use fluvio_future::timer::sleep;
    use jetstream_model::memory::StoreFault;
    use jetstream_model::{
        CacheChange, MemoryStore, NameSpace, ObjectKey, ObjectMeta, ResourceCache, StoreError,
        StreamObject, StreamSpec,
    };
    use jetstream_types::event::StickyEvent;

    use super::{CacheDispatcher, create_backoff};

    fn orders() -> StreamObject {
        StreamObject::new(
            ObjectMeta::new("orders", "default"),
            StreamSpec::new("ORDERS", "file"),
        )
    }

    async fn wait_until<F: Fn() -> bool>(check: F) {
        select! {
            _ = async {
                while !check() {
                    sleep(Duration::from_millis(5)).await;
                }
            } => {},
            _ = sleep(Duration::from_secs(5)) => panic!("condition not reached"),
        }
    }

    #[test]
    fn test_relist_backoff_bounds() {
        let mut backoff = create_backoff().expect("backoff");
        let first = backoff.wait();
        assert!(first >= Duration::from_secs(1), "first wait {first:?}");
        assert!(first < Duration::from_secs(2), "first wait {first:?}");

        let last = (0..100).map(|_| backoff.wait()).last().expect("wait");
        assert_eq!(last, Duration::from_secs(30));

        backoff.reset();
        assert!(backoff.wait() < Duration::from_secs(2));
    }

    #[fluvio_future::test]
    async fn test_initial_sync_then_watch() {
        let store = MemoryStore::shared();
        store.apply(orders()).await.expect("apply");
        store.fail_next(
            StoreFault::List,
            2,
            StoreError::Unavailable("starting".to_owned()),
        );

        let cache = ResourceCache::shared();
        let shutdown = StickyEvent::shared();
        CacheDispatcher::start(
            NameSpace::All,
            store.clone(),
            cache.clone(),
            Duration::from_secs(30),
            shutdown.clone(),
        )
        .expect("start");

        // two failed listings wait about one second each
        select! {
            _ = cache.wait_for_sync() => {},
            _ = sleep(Duration::from_secs(10)) => panic!("cache not synced"),
        }
        let key = ObjectKey::new("default", "orders");
        assert!(cache.get(&key).is_some());

        store.delete(&key).await.expect("delete");
        wait_until(|| cache.get(&key).is_none()).await;
        shutdown.notify();
    }

    #[fluvio_future::test]
    async fn test_relist_after_watch_end() {
        let store = MemoryStore::shared();
        let cache = ResourceCache::shared();
        let shutdown = StickyEvent::shared();
        CacheDispatcher::start(
            NameSpace::All,
            store.clone(),
            cache.clone(),
            Duration::from_secs(30),
            shutdown.clone(),
        )
        .expect("start");
        cache.wait_for_sync().await;

        store.close_watches();
        store.apply(orders()).await.expect("apply");

        let key = ObjectKey::new("default", "orders");
        wait_until(|| cache.get(&key).is_some()).await;
        shutdown.notify();
    }

    #[fluvio_future::test]
    async fn test_periodic_resync_announces_objects() {
        let store = MemoryStore::shared();
        store.apply(orders()).await.expect("apply");
        let cache = Arc::new(ResourceCache::default());
        let changes = cache.subscribe();
        let shutdown = StickyEvent::shared();
        CacheDispatcher::start(
            NameSpace::All,
            store.clone(),
            cache.clone(),
            Duration::from_millis(50),
            shutdown.clone(),
        )
        .expect("start");

        let first = changes.recv().await.expect("add");
        assert!(matches!(first, CacheChange::Add(_)));

        select! {
            change = changes.recv() => {
                assert!(matches!(change, Ok(CacheChange::Update { .. })));
            },
            _ = sleep(Duration::from_secs(5)) => panic!("no resync"),
        }
        shutdown.notify();
    }
}
