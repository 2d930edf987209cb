pub mod defaults;

#[cfg(feature = "events")]
pub mod event;

/// Finalizer token the controller places on every stream object it manages.
pub const STREAM_FINALIZER: &str = "streamfinalizer.jetstream.nats.io";
