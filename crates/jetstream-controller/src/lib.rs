//!
//! # JetStream stream controller
//!
//! Keeps streams of a JetStream cluster in sync with declarative stream
//! objects held by a resource store.
//!
//! Changes flow from the store watch into the [`ResourceCache`], through the
//! [`router::EventRouter`] onto the [`queue::RateLimitingQueue`] and finally to
//! the [`reconciler::Reconciler`], which calls the [`backend::StreamBackend`].
//!
//! [`ResourceCache`]: jetstream_model::ResourceCache
//!
pub mod backend;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod index;
pub mod queue;
pub mod reconciler;
pub mod recorder;
pub mod router;

pub use self::backend::{
    BackendError, BackendOp, MemoryStreamBackend, SharedBackend, StorageType, StreamBackend,
    StreamConfig, StreamHandle,
};
pub use self::config::{ConfigError, ControllerConfig, ControllerConfigBuilder};
pub use self::controller::{Controller, ControllerOptions};
pub use self::error::{ControllerError, ReconcileError};
