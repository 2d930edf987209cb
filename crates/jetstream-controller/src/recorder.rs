//!
//! # Event recorder
//!
//! Status events attached to stream objects. Recording is fire and forget:
//! a failed write is logged and never fails a reconcile.
//!
use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use jetstream_model::{EventSeverity, ObjectEvent, ObjectKey, SharedStore, StreamObject};

/// Reasons attached to recorded events
pub mod reasons {
    pub const CREATED: &str = "Created";
    pub const UPDATED: &str = "Updated";
    pub const ADOPTED: &str = "Adopted";
    pub const DELETED: &str = "Deleted";
    pub const INVALID_SPEC: &str = "InvalidSpec";
    pub const RETRIES_EXHAUSTED: &str = "RetriesExhausted";
}

#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(
        &self,
        object: &StreamObject,
        severity: EventSeverity,
        reason: &str,
        message: String,
    );
}

/// Writes events through the resource store
pub struct StoreEventRecorder {
    store: SharedStore,
    component: String,
}

impl StoreEventRecorder {
    pub fn new(store: SharedStore, component: impl Into<String>) -> Self {
        Self {
            store,
            component: component.into(),
        }
    }
}

#[async_trait]
impl EventRecorder for StoreEventRecorder {
    async fn record(
        &self,
        object: &StreamObject,
        severity: EventSeverity,
        reason: &str,
        message: String,
    ) {
        let key = ObjectKey::from(&object.metadata);
        match severity {
            EventSeverity::Normal => info!(%key, reason, %message, "event"),
            EventSeverity::Warning => warn!(%key, reason, %message, "event"),
        }

        let event = ObjectEvent {
            key: key.clone(),
            uid: object.metadata.uid.clone(),
            severity,
            reason: reason.to_owned(),
            message,
            source: self.component.clone(),
            timestamp: Utc::now(),
        };

        if let Err(err) = self.store.record_event(event).await {
            warn!(%key, reason, %err, "failed to record event");
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use jetstream_model::{EventSeverity, MemoryStore, ObjectMeta, StreamObject, StreamSpec};

    use super::{EventRecorder, StoreEventRecorder, reasons};

    #[fluvio_future::test]
    async fn test_records_with_component() {
        let store = Arc::new(MemoryStore::default());
        let recorder = StoreEventRecorder::new(store.clone(), "test-controller");
        let object = StreamObject::new(
            ObjectMeta::new("orders", "default"),
            StreamSpec::new("ORDERS", "file"),
        );

        recorder
            .record(
                &object,
                EventSeverity::Warning,
                reasons::INVALID_SPEC,
                "bad storage".to_owned(),
            )
            .await;

        let events = store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, "test-controller");
        assert_eq!(events[0].reason, "InvalidSpec");
        assert_eq!(events[0].key.to_string(), "default/orders");
    }
}
