//!
//! # Controller
//!
//! Hooks the watch feed, router, retry queue and reconciler together and
//! runs them until shutdown.
//!
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{debug, error, info, instrument, warn};

use fluvio_future::task::spawn;
use fluvio_future::timer::sleep;
use jetstream_model::{ResourceCache, SharedStore};
use jetstream_types::defaults::CONTROLLER_NAME;
use jetstream_types::event::StickyEvent;

use crate::backend::SharedBackend;
use crate::config::ControllerConfig;
use crate::dispatcher::CacheDispatcher;
use crate::error::ControllerError;
use crate::queue::{RateLimitingQueue, controller_rate_limiter};
use crate::reconciler::Reconciler;
use crate::recorder::StoreEventRecorder;
use crate::router::EventRouter;

pub struct ControllerOptions {
    pub store: SharedStore,
    pub backend: SharedBackend,
    /// name presented to the messaging cluster, defaults to `jetstream-controller`
    pub client_name: String,
    pub config: ControllerConfig,
}

pub struct Controller {
    store: SharedStore,
    backend: SharedBackend,
    client_name: String,
    config: ControllerConfig,
    cache: Arc<ResourceCache>,
}

impl Controller {
    pub fn new(options: ControllerOptions) -> Self {
        let ControllerOptions {
            store,
            backend,
            client_name,
            config,
        } = options;

        let client_name = if client_name.is_empty() {
            CONTROLLER_NAME.to_owned()
        } else {
            client_name
        };

        Self {
            store,
            backend,
            client_name,
            config,
            cache: ResourceCache::shared(),
        }
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// local cache of stream objects
    pub fn cache(&self) -> Arc<ResourceCache> {
        self.cache.clone()
    }

    /// run until `shutdown` fires.
    /// fails if cache cannot be synced before timeout or shutdown
    #[instrument(skip(self, shutdown), fields(client = %self.client_name))]
    pub async fn run(self, shutdown: Arc<StickyEvent>) -> Result<(), ControllerError> {
        use tokio::select;

        let config = &self.config;
        let changes = self.cache.subscribe();
        let queue: RateLimitingQueue<String> = RateLimitingQueue::new(controller_rate_limiter(
            config.base_delay,
            config.max_delay,
            config.qps,
            config.burst,
        ));

        // components stop on external shutdown or on failed startup
        let stop = StickyEvent::named("controller-stop");
        {
            let shutdown = shutdown.clone();
            let stop = stop.clone();
            spawn(async move {
                select! {
                    _ = shutdown.listen() => stop.notify(),
                    _ = stop.listen() => {}
                }
            });
        }

        info!(namespace = %config.namespace, "starting controller");
        self.backend.set_client_name(&self.client_name);
        if let Err(err) = CacheDispatcher::start(
            config.namespace.clone(),
            self.store.clone(),
            self.cache.clone(),
            config.resync_period,
            stop.clone(),
        ) {
            stop.notify();
            return Err(err);
        }
        EventRouter::start(changes, queue.clone(), stop.clone());

        debug!("waiting for cache sync");
        let synced = select! {
            _ = self.cache.wait_for_sync() => Ok(()),
            _ = shutdown.listen() => Err("shutdown before sync"),
            _ = sleep(config.cache_sync_timeout) => Err("timed out"),
        };
        if let Err(reason) = synced {
            error!(reason, "failed to wait for cache sync");
            stop.notify();
            queue.shut_down();
            return Err(ControllerError::CacheSync(reason.to_owned()));
        }
        info!(objects = self.cache.len(), "cache synced, starting worker");

        let worker_done = StickyEvent::named("worker-done");
        let recorder = Arc::new(StoreEventRecorder::new(self.store.clone(), CONTROLLER_NAME));
        let mut reconciler = Reconciler::new(
            self.cache.clone(),
            self.store.clone(),
            self.backend.clone(),
            recorder,
            queue.clone(),
            config.finalizer.clone(),
            config.max_retries,
        );
        {
            let queue = queue.clone();
            let done = worker_done.clone();
            let restart_delay = config.worker_restart_delay;
            spawn(async move {
                loop {
                    if AssertUnwindSafe(reconciler.run_worker())
                        .catch_unwind()
                        .await
                        .is_err()
                    {
                        error!("reconcile worker panicked");
                    }
                    if queue.shutting_down() {
                        break;
                    }
                    warn!(
                        delay_ms = restart_delay.as_millis() as u64,
                        "worker exited, restarting"
                    );
                    sleep(restart_delay).await;
                }
                done.notify();
            });
        }

        shutdown.listen().await;
        info!("shutting down controller");
        stop.notify();
        queue.shut_down();
        worker_done.listen().await;
        info!("controller stopped");
        Ok(())
    }
}
