use std::time::Duration;

/// Name reported as event source when none is configured.
pub const CONTROLLER_NAME: &str = "jetstream-controller";

/// Max times a failing item is re-queued. An item is pulled at most
/// `MAX_QUEUE_RETRIES + 1` times; if the last pull fails it is dropped.
pub const MAX_QUEUE_RETRIES: u32 = 10;

/// Period after which the watch feed re-lists and re-announces every object.
pub const RESYNC_PERIOD: Duration = Duration::from_secs(30);

/// Upper bound on waiting for the first full cache sync at startup.
pub const CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

/// Per item backoff: first retry delay, doubled on each failure.
pub const QUEUE_BASE_DELAY: Duration = Duration::from_millis(5);

/// Per item backoff ceiling.
pub const QUEUE_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Overall re-queue rate (items per second) and burst.
pub const QUEUE_QPS: f64 = 10.0;
pub const QUEUE_BURST: u32 = 100;

/// Delay before a stopped reconcile worker is started again.
pub const WORKER_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Backoff used by the watch feed when listing the store fails.
/// Wait is `factor^failures` seconds, clamped to min and max.
pub const RELIST_BACKOFF_FACTOR: f64 = 1.1;
pub const RELIST_BACKOFF_MIN_DURATION: Duration = Duration::from_secs(1);
pub const RELIST_BACKOFF_MAX_DURATION: Duration = Duration::from_secs(30);

/// Environment overrides read by `ControllerConfig::from_env`.
pub const ENV_NAMESPACE: &str = "JSC_NAMESPACE";
pub const ENV_MAX_RETRIES: &str = "JSC_MAX_RETRIES";
pub const ENV_RESYNC_PERIOD: &str = "JSC_RESYNC_PERIOD";
