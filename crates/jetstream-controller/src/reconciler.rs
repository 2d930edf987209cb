//!
//! # Stream reconciler
//!
//! Single worker pulling keys from the retry queue and driving the actual
//! stream toward the desired stream object.
//!
//! Deletion is gated by a finalizer: the finalizer is attached before any
//! stream is created and only removed once the stream is gone.
//!
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{debug, error, info, instrument, trace, warn};

use jetstream_model::{
    Condition, ConditionStatus, EventSeverity, ObjectKey, ResourceCache, SharedStore, StoreError,
    StreamObject, StreamStatus,
};

use crate::backend::{BackendError, SharedBackend, StreamConfig, StreamHandle};
use crate::error::ReconcileError;
use crate::index::StreamIndex;
use crate::queue::RateLimitingQueue;
use crate::recorder::{EventRecorder, reasons};

const SYNCED_REASON: &str = "Synced";

/// What a successful create-or-update did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAction {
    Created,
    Updated,
    Adopted,
    Unchanged,
}

pub struct Reconciler {
    cache: Arc<ResourceCache>,
    store: SharedStore,
    backend: SharedBackend,
    recorder: Arc<dyn EventRecorder>,
    queue: RateLimitingQueue<String>,
    index: StreamIndex,
    /// status last written per key, covers writes not yet seen by cache
    reported: HashMap<ObjectKey, StreamStatus>,
    /// keys dropped at the retry ceiling, with resource version at drop
    dropped: HashMap<ObjectKey, u64>,
    finalizer: String,
    max_retries: u32,
}

impl Reconciler {
    pub fn new(
        cache: Arc<ResourceCache>,
        store: SharedStore,
        backend: SharedBackend,
        recorder: Arc<dyn EventRecorder>,
        queue: RateLimitingQueue<String>,
        finalizer: String,
        max_retries: u32,
    ) -> Self {
        Self {
            cache,
            store,
            backend,
            recorder,
            queue,
            index: StreamIndex::default(),
            reported: HashMap::new(),
            dropped: HashMap::new(),
            finalizer,
            max_retries,
        }
    }

    pub fn index(&self) -> &StreamIndex {
        &self.index
    }

    /// process keys until queue is shut down
    #[instrument(skip(self), name = "Reconciler")]
    pub async fn run_worker(&mut self) {
        info!("worker started");
        while self.process_next_item().await {}
        info!("worker stopped, queue shut down");
    }

    /// false once queue is shut down and drained
    pub async fn process_next_item(&mut self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let handled = AssertUnwindSafe(async {
            let result = match AssertUnwindSafe(self.reconcile(&key)).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    error!(%key, "panic while reconciling");
                    Err(ReconcileError::Transient("reconcile panicked".to_owned()))
                }
            };
            self.handle_result(&key, result).await;
        })
        .catch_unwind()
        .await;
        if handled.is_err() {
            error!(%key, "panic while handling reconcile result");
        }

        self.queue.done(&key);
        true
    }

    async fn handle_result(&mut self, key: &String, result: Result<(), ReconcileError>) {
        let err = match result {
            Ok(()) => {
                trace!(%key, "reconciled");
                self.queue.forget(key);
                return;
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            warn!(%key, %err, "dropping item, not retryable");
            self.queue.forget(key);
            return;
        }

        let retries = self.queue.num_requeues(key);
        if retries < self.max_retries {
            warn!(%key, retries, %err, "error syncing, requeue");
            self.queue.add_rate_limited(key.clone());
            return;
        }

        self.queue.forget(key);
        error!(%key, retries, %err, "dropping item out of the queue");

        let Ok(object_key) = key.parse::<ObjectKey>() else {
            return;
        };
        if let Some(object) = self.cache.get(&object_key) {
            self.dropped.insert(object_key, object.resource_version());
            self.recorder
                .record(
                    &object,
                    EventSeverity::Warning,
                    reasons::RETRIES_EXHAUSTED,
                    format!("giving up after {retries} retries: {err}"),
                )
                .await;
        }
    }

    #[instrument(skip(self))]
    async fn reconcile(&mut self, key: &str) -> Result<(), ReconcileError> {
        let key: ObjectKey = key.parse()?;

        let Some(object) = self.cache.get(&key) else {
            self.dropped.remove(&key);
            return self.purge(&key).await;
        };

        // a resync alone does not revive an item dropped at the ceiling
        if let Some(version) = self.dropped.get(&key).copied() {
            if version == object.resource_version() {
                trace!(%key, version, "dropped after retries, waiting for a change");
                return Ok(());
            }
            debug!(%key, version, "object changed since drop, retrying");
            self.dropped.remove(&key);
        }

        if object.is_being_deleted() {
            return self.finalize(&key, &object).await;
        }

        if !object.has_finalizer(&self.finalizer) {
            debug!(%key, "adding finalizer");
            self.store.add_finalizer(&key, &self.finalizer).await?;
        }

        let config = match StreamConfig::try_from(&object.spec) {
            Ok(config) => config,
            Err(err) => {
                self.reject(&key, &object, &err).await;
                return Err(err);
            }
        };

        let action = self.ensure_stream(&key, &config).await?;
        let reason = match action {
            StreamAction::Created => Some(reasons::CREATED),
            StreamAction::Updated => Some(reasons::UPDATED),
            StreamAction::Adopted => Some(reasons::ADOPTED),
            StreamAction::Unchanged => None,
        };
        if let Some(reason) = reason {
            info!(%key, stream = %config.name, ?action, "stream reconciled");
            self.recorder
                .record(
                    &object,
                    EventSeverity::Normal,
                    reason,
                    format!("stream {} {}", config.name, reason.to_lowercase()),
                )
                .await;
        }

        let ready = Condition::ready(
            ConditionStatus::True,
            SYNCED_REASON,
            format!("stream {} is in sync", config.name),
        );
        self.report(&key, &object, ready).await;
        Ok(())
    }

    /// object is gone from cache, remove stream left behind
    async fn purge(&mut self, key: &ObjectKey) -> Result<(), ReconcileError> {
        self.reported.remove(key);
        let Some(handle) = self.index.get(key) else {
            trace!(%key, "object and stream absent, nothing to do");
            return Ok(());
        };

        let name = handle.name.clone();
        info!(%key, stream = %name, "object removed, deleting stream");
        self.delete_stream(&name).await?;
        self.index.remove(key);
        Ok(())
    }

    /// deletion requested, delete stream then release finalizer
    async fn finalize(
        &mut self,
        key: &ObjectKey,
        object: &StreamObject,
    ) -> Result<(), ReconcileError> {
        if !object.has_finalizer(&self.finalizer) {
            debug!(%key, "being deleted without finalizer");
            self.index.remove(key);
            self.reported.remove(key);
            return Ok(());
        }

        let name = self
            .index
            .get(key)
            .map(|handle| handle.name.clone())
            .unwrap_or_else(|| object.spec.name.clone());

        if !name.is_empty() {
            info!(%key, stream = %name, "deleting stream");
            self.delete_stream(&name).await?;
        }
        self.index.remove(key);
        self.reported.remove(key);

        match self.store.remove_finalizer(key, &self.finalizer).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }

        self.recorder
            .record(
                object,
                EventSeverity::Normal,
                reasons::DELETED,
                format!("stream {name} deleted"),
            )
            .await;
        Ok(())
    }

    async fn delete_stream(&self, name: &str) -> Result<(), ReconcileError> {
        match self.backend.delete_stream(name).await {
            Ok(()) => Ok(()),
            Err(BackendError::NotFound(_)) => {
                debug!(stream = %name, "stream already gone");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// invalid spec: report once per distinct problem, never retried
    async fn reject(&mut self, key: &ObjectKey, object: &StreamObject, err: &ReconcileError) {
        let message = err.to_string();
        let condition = Condition::ready(ConditionStatus::False, reasons::INVALID_SPEC, &message);
        if self.report(key, object, condition).await {
            self.recorder
                .record(
                    object,
                    EventSeverity::Warning,
                    reasons::INVALID_SPEC,
                    message,
                )
                .await;
        }
    }

    /// write ready condition if it differs from last known status.
    /// returns true if a write was issued
    async fn report(&mut self, key: &ObjectKey, object: &StreamObject, ready: Condition) -> bool {
        // cache caught up with our last write
        if self
            .reported
            .get(key)
            .is_some_and(|reported| reported.is_same(&object.status))
        {
            self.reported.remove(key);
        }

        let mut status = object.status.clone();
        status.observed_generation = object.metadata.generation;
        status.set_condition(ready);

        if status.is_same(&object.status) {
            trace!(%key, "status unchanged");
            return false;
        }
        if self
            .reported
            .get(key)
            .is_some_and(|reported| reported.is_same(&status))
        {
            trace!(%key, "status already written");
            return false;
        }

        match self.store.update_status(key, status.clone()).await {
            Ok(_) => {
                self.reported.insert(key.clone(), status);
            }
            Err(err) => warn!(%key, %err, "failed to update status"),
        }
        true
    }

    async fn ensure_stream(
        &mut self,
        key: &ObjectKey,
        config: &StreamConfig,
    ) -> Result<StreamAction, ReconcileError> {
        let Some(handle) = self.index.get(key) else {
            return self.create_or_adopt(key, config).await;
        };

        if handle.config == *config {
            trace!(%key, stream = %config.name, "stream in sync");
            return Ok(StreamAction::Unchanged);
        }

        if handle.name != config.name {
            let previous = handle.name.clone();
            info!(%key, from = %previous, to = %config.name, "stream renamed, deleting previous");
            self.delete_stream(&previous).await?;
            self.index.remove(key);
            return self.create_or_adopt(key, config).await;
        }

        debug!(%key, stream = %config.name, "stream config drifted, updating");
        match self.backend.update_stream(config).await {
            Ok(updated) => {
                self.index.insert(key.clone(), updated);
                Ok(StreamAction::Updated)
            }
            Err(BackendError::NotFound(_)) => {
                warn!(%key, stream = %config.name, "stream removed out of band, creating");
                self.index.remove(key);
                self.create_or_adopt(key, config).await
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn create_or_adopt(
        &mut self,
        key: &ObjectKey,
        config: &StreamConfig,
    ) -> Result<StreamAction, ReconcileError> {
        match self.backend.create_stream(config).await {
            Ok(handle) => {
                self.index.insert(key.clone(), handle);
                Ok(StreamAction::Created)
            }
            Err(BackendError::AlreadyExists(_)) => {
                let existing = self.backend.stream_info(&config.name).await?;
                let handle = self.adopt(existing, config).await?;
                self.index.insert(key.clone(), handle);
                Ok(StreamAction::Adopted)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn adopt(
        &self,
        existing: StreamHandle,
        config: &StreamConfig,
    ) -> Result<StreamHandle, ReconcileError> {
        if existing.config == *config {
            debug!(stream = %config.name, "adopting existing stream");
            return Ok(existing);
        }
        debug!(stream = %config.name, "adopting drifted stream, updating");
        Ok(self.backend.update_stream(config).await?)
    }
}
