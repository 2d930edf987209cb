use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, trace};

use fluvio_future::timer::sleep;

use super::{BackendError, StreamBackend, StreamConfig, StreamHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    Create,
    Update,
    Delete,
    Info,
}

#[derive(Debug, Default)]
struct BackendState {
    streams: HashMap<String, StreamHandle>,
    calls: HashMap<BackendOp, u32>,
    faults: HashMap<BackendOp, (u32, BackendError)>,
    in_flight: HashMap<String, u32>,
    max_in_flight: u32,
}

/// Stream backend keeping streams in memory.
///
/// Counts calls per operation, can fail scripted calls and delay every call
/// to expose overlapping operations on the same stream.
#[derive(Debug, Default)]
pub struct MemoryStreamBackend {
    state: Mutex<BackendState>,
    latency: Mutex<Option<Duration>>,
    client_name: Mutex<Option<String>>,
}

impl MemoryStreamBackend {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// fail next `count` calls of `op` with `error`
    pub fn fail_next(&self, op: BackendOp, count: u32, error: BackendError) {
        self.state.lock().faults.insert(op, (count, error));
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    pub fn client_name(&self) -> Option<String> {
        self.client_name.lock().clone()
    }

    pub fn calls(&self, op: BackendOp) -> u32 {
        self.state.lock().calls.get(&op).copied().unwrap_or_default()
    }

    /// calls of every operation that changes a stream
    pub fn mutating_calls(&self) -> u32 {
        self.calls(BackendOp::Create) + self.calls(BackendOp::Update) + self.calls(BackendOp::Delete)
    }

    pub fn total_calls(&self) -> u32 {
        self.state.lock().calls.values().sum()
    }

    /// highest number of concurrent calls seen for one stream
    pub fn max_in_flight(&self) -> u32 {
        self.state.lock().max_in_flight
    }

    pub fn stream(&self, name: &str) -> Option<StreamHandle> {
        self.state.lock().streams.get(name).cloned()
    }

    pub fn stream_count(&self) -> usize {
        self.state.lock().streams.len()
    }

    /// create stream out of band, without counting a call
    pub fn insert_stream(&self, config: StreamConfig) {
        let handle = StreamHandle {
            name: config.name.clone(),
            config,
            created: Utc::now(),
        };
        self.state
            .lock()
            .streams
            .insert(handle.name.clone(), handle);
    }

    /// remove stream out of band, without counting a call
    pub fn remove_stream(&self, name: &str) -> Option<StreamHandle> {
        self.state.lock().streams.remove(name)
    }

    async fn call<F, T>(&self, op: BackendOp, name: &str, action: F) -> Result<T, BackendError>
    where
        F: FnOnce(&mut HashMap<String, StreamHandle>) -> Result<T, BackendError>,
    {
        {
            let mut state = self.state.lock();
            *state.calls.entry(op).or_default() += 1;
            let in_flight = state.in_flight.entry(name.to_owned()).or_default();
            *in_flight += 1;
            let current = *in_flight;
            state.max_in_flight = state.max_in_flight.max(current);
        }

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            sleep(latency).await;
        }

        let mut state = self.state.lock();
        if let Some(in_flight) = state.in_flight.get_mut(name) {
            *in_flight = in_flight.saturating_sub(1);
        }

        if let Some((remaining, error)) = state.faults.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                debug!(?op, stream = name, %error, "scripted failure");
                return Err(error.clone());
            }
        }

        trace!(?op, stream = name, "backend call");
        action(&mut state.streams)
    }
}

#[async_trait]
impl StreamBackend for MemoryStreamBackend {
    async fn create_stream(&self, config: &StreamConfig) -> Result<StreamHandle, BackendError> {
        self.call(BackendOp::Create, &config.name, |streams| {
            if streams.contains_key(&config.name) {
                return Err(BackendError::AlreadyExists(config.name.clone()));
            }
            let handle = StreamHandle {
                name: config.name.clone(),
                config: config.clone(),
                created: Utc::now(),
            };
            streams.insert(config.name.clone(), handle.clone());
            Ok(handle)
        })
        .await
    }

    async fn update_stream(&self, config: &StreamConfig) -> Result<StreamHandle, BackendError> {
        self.call(BackendOp::Update, &config.name, |streams| {
            let Some(existing) = streams.get_mut(&config.name) else {
                return Err(BackendError::NotFound(config.name.clone()));
            };
            existing.config = config.clone();
            Ok(existing.clone())
        })
        .await
    }

    async fn delete_stream(&self, name: &str) -> Result<(), BackendError> {
        self.call(BackendOp::Delete, name, |streams| {
            streams
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| BackendError::NotFound(name.to_owned()))
        })
        .await
    }

    async fn stream_info(&self, name: &str) -> Result<StreamHandle, BackendError> {
        self.call(BackendOp::Info, name, |streams| {
            streams
                .get(name)
                .cloned()
                .ok_or_else(|| BackendError::NotFound(name.to_owned()))
        })
        .await
    }

    fn set_client_name(&self, name: &str) {
        debug!(client = name, "backend client name");
        *self.client_name.lock() = Some(name.to_owned());
    }
}

#[cfg(test)]
mod test {
    use jetstream_model::StreamSpec;

    use crate::backend::{BackendError, StreamBackend, StreamConfig};

    use super::{BackendOp, MemoryStreamBackend};

    fn orders() -> StreamConfig {
        StreamConfig::try_from(&StreamSpec::new("ORDERS", "file")).expect("config")
    }

    #[fluvio_future::test]
    async fn test_stream_lifecycle() {
        let backend = MemoryStreamBackend::default();
        backend.create_stream(&orders()).await.expect("create");
        assert!(matches!(
            backend.create_stream(&orders()).await,
            Err(BackendError::AlreadyExists(_))
        ));

        let info = backend.stream_info("ORDERS").await.expect("info");
        assert_eq!(info.config, orders());

        backend.delete_stream("ORDERS").await.expect("delete");
        assert!(matches!(
            backend.update_stream(&orders()).await,
            Err(BackendError::NotFound(_))
        ));
        assert_eq!(backend.calls(BackendOp::Create), 2);
        assert_eq!(backend.total_calls(), 5);
    }

    #[fluvio_future::test]
    async fn test_scripted_failures() {
        let backend = MemoryStreamBackend::default();
        backend.fail_next(
            BackendOp::Create,
            1,
            BackendError::Transient("timeout".to_owned()),
        );
        assert!(matches!(
            backend.create_stream(&orders()).await,
            Err(BackendError::Transient(_))
        ));
        backend.create_stream(&orders()).await.expect("create");
        assert_eq!(backend.stream_count(), 1);
    }
}
