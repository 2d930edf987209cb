//!
//! # Event router
//!
//! Turns cache changes into work item keys on the retry queue.
//!
use std::sync::Arc;

use async_channel::Receiver;
use tracing::{debug, info, instrument, trace, warn};

use fluvio_future::task::spawn;
use jetstream_model::CacheChange;
use jetstream_types::event::StickyEvent;

use crate::queue::RateLimitingQueue;

pub struct EventRouter {
    changes: Receiver<CacheChange>,
    queue: RateLimitingQueue<String>,
    shutdown: Arc<StickyEvent>,
}

impl EventRouter {
    pub fn start(
        changes: Receiver<CacheChange>,
        queue: RateLimitingQueue<String>,
        shutdown: Arc<StickyEvent>,
    ) {
        let router = Self {
            changes,
            queue,
            shutdown,
        };

        debug!("starting event router");
        spawn(router.dispatch_loop());
    }

    #[instrument(skip(self), name = "EventRouter")]
    async fn dispatch_loop(self) {
        use tokio::select;

        loop {
            select! {
                _ = self.shutdown.listen() => {
                    info!("shutdown, stopping router");
                    break;
                },
                change = self.changes.recv() => {
                    match change {
                        Ok(change) => self.route(change),
                        Err(_) => {
                            info!("cache change channel closed, stopping router");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn route(&self, change: CacheChange) {
        let action = match &change {
            CacheChange::Add(_) => "add",
            CacheChange::Update { .. } => "update",
            CacheChange::Delete(_) => "delete",
        };

        match change.object().key() {
            Ok(key) => {
                trace!(%key, action, "enqueue");
                self.queue.add(key.to_string());
            }
            Err(err) => {
                warn!(
                    object = %change.object().metadata.name,
                    namespace = %change.object().metadata.namespace,
                    action,
                    %err,
                    "unable to compute work item key, dropped"
                );
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use async_channel::unbounded;
    use tokio::select;

    use fluvio_future::timer::sleep;
    use jetstream_model::{CacheChange, ObjectMeta, StreamObject, StreamSpec};
    use jetstream_types::event::StickyEvent;

    use crate::queue::{ItemExponentialFailureRateLimiter, RateLimitingQueue};

    use super::EventRouter;

    fn object(name: &str) -> StreamObject {
        StreamObject::new(
            ObjectMeta::new(name, "default"),
            StreamSpec::new("ORDERS", "file"),
        )
    }

    #[fluvio_future::test]
    async fn test_routes_changes_to_queue() {
        let (sender, receiver) = unbounded();
        let queue = RateLimitingQueue::new(ItemExponentialFailureRateLimiter::default());
        let shutdown = StickyEvent::shared();
        EventRouter::start(receiver, queue.clone(), shutdown.clone());

        sender
            .send(CacheChange::Add(object("orders")))
            .await
            .expect("send");
        sender
            .send(CacheChange::Add(object("bad/name")))
            .await
            .expect("send");

        select! {
            key = queue.get() => {
                let key = key.expect("key");
                assert_eq!(key, "default/orders");
                queue.done(&key);
            },
            _ = sleep(Duration::from_millis(500)) => panic!("no key routed"),
        }

        sender
            .send(CacheChange::Delete(object("orders")))
            .await
            .expect("send");
        select! {
            key = queue.get() => assert_eq!(key.as_deref(), Some("default/orders")),
            _ = sleep(Duration::from_millis(500)) => panic!("delete not routed"),
        }

        // malformed key never reaches the queue
        assert!(queue.is_empty());
        shutdown.notify();
    }
}
