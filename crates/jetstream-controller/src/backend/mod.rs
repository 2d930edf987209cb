//!
//! # Stream backend
//!
//! Contract of the messaging cluster holding the actual streams, and the
//! backend config derived from a desired stream spec.
//!
mod memory;

pub use memory::{BackendOp, MemoryStreamBackend};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use jetstream_model::StreamSpec;

use crate::error::ReconcileError;

pub type SharedBackend = Arc<dyn StreamBackend>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("stream already exists: {0}")]
    AlreadyExists(String),
    #[error("stream not found: {0}")]
    NotFound(String),
    #[error("invalid stream config: {0}")]
    InvalidConfig(String),
    #[error("transient backend error: {0}")]
    Transient(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    File,
    Memory,
}

impl StorageType {
    /// only exact lowercase names are accepted
    pub fn parse(storage: &str) -> Option<Self> {
        match storage {
            "file" => Some(Self::File),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Stream configuration as understood by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub name: String,
    pub subjects: Vec<String>,
    pub storage: StorageType,
    pub replicas: u32,
    /// zero means unlimited
    pub max_age: Duration,
    pub max_msgs: Option<i64>,
    pub max_bytes: Option<i64>,
    pub description: Option<String>,
}

impl TryFrom<&StreamSpec> for StreamConfig {
    type Error = ReconcileError;

    fn try_from(spec: &StreamSpec) -> Result<Self, Self::Error> {
        if spec.name.is_empty() {
            return Err(ReconcileError::Validation("stream name is empty".to_owned()));
        }

        let storage = StorageType::parse(&spec.storage).ok_or_else(|| {
            ReconcileError::Validation(format!("invalid storage type {:?}", spec.storage))
        })?;

        let max_age = match spec.max_age.as_deref() {
            None | Some("") => Duration::ZERO,
            Some(age) => humantime::parse_duration(age).map_err(|err| {
                ReconcileError::Validation(format!("invalid max age {age:?}: {err}"))
            })?,
        };

        Ok(Self {
            name: spec.name.clone(),
            subjects: spec.subjects.clone(),
            storage,
            replicas: spec.replicas,
            max_age,
            max_msgs: spec.max_msgs,
            max_bytes: spec.max_bytes,
            description: spec.description.clone(),
        })
    }
}

/// Actual stream as last seen in backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHandle {
    pub name: String,
    pub config: StreamConfig,
    pub created: DateTime<Utc>,
}

#[async_trait]
pub trait StreamBackend: Send + Sync {
    async fn create_stream(&self, config: &StreamConfig) -> Result<StreamHandle, BackendError>;

    async fn update_stream(&self, config: &StreamConfig) -> Result<StreamHandle, BackendError>;

    async fn delete_stream(&self, name: &str) -> Result<(), BackendError>;

    /// describe existing stream
    async fn stream_info(&self, name: &str) -> Result<StreamHandle, BackendError>;

    /// name the controller presents to the messaging cluster
    fn set_client_name(&self, _name: &str) {}
}
