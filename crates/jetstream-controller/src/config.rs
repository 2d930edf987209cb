use std::env;
use std::time::Duration;

use derive_builder::Builder;

use jetstream_model::NameSpace;
use jetstream_types::STREAM_FINALIZER;
use jetstream_types::defaults::{
    CACHE_SYNC_TIMEOUT, ENV_MAX_RETRIES, ENV_NAMESPACE, ENV_RESYNC_PERIOD, MAX_QUEUE_RETRIES,
    QUEUE_BASE_DELAY, QUEUE_BURST, QUEUE_MAX_DELAY, QUEUE_QPS, RESYNC_PERIOD,
    WORKER_RESTART_DELAY,
};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{name}: invalid number {value:?}")]
    InvalidNumber { name: String, value: String },
    #[error("{name}: invalid duration {value:?}: {source}")]
    InvalidDuration {
        name: String,
        value: String,
        source: humantime::DurationError,
    },
    #[error("builder: {0}")]
    Builder(#[from] ControllerConfigBuilderError),
}

fn default_namespace() -> NameSpace {
    NameSpace::All
}

fn default_finalizer() -> String {
    STREAM_FINALIZER.to_owned()
}

/// Runtime knobs of the controller.
/// Create this struct with [`ControllerConfigBuilder`] or [`ControllerConfig::from_env`].
#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", build_fn(validate = "Self::validate"))]
pub struct ControllerConfig {
    /// namespace watched, all by default
    #[builder(default = "default_namespace()")]
    pub namespace: NameSpace,
    /// times a failing key is re-queued before it is dropped
    #[builder(default = "MAX_QUEUE_RETRIES")]
    pub max_retries: u32,
    #[builder(default = "RESYNC_PERIOD")]
    pub resync_period: Duration,
    #[builder(default = "CACHE_SYNC_TIMEOUT")]
    pub cache_sync_timeout: Duration,
    #[builder(default = "QUEUE_BASE_DELAY")]
    pub base_delay: Duration,
    #[builder(default = "QUEUE_MAX_DELAY")]
    pub max_delay: Duration,
    #[builder(default = "QUEUE_QPS")]
    pub qps: f64,
    #[builder(default = "QUEUE_BURST")]
    pub burst: u32,
    #[builder(default = "WORKER_RESTART_DELAY")]
    pub worker_restart_delay: Duration,
    #[builder(default = "default_finalizer()")]
    pub finalizer: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            max_retries: MAX_QUEUE_RETRIES,
            resync_period: RESYNC_PERIOD,
            cache_sync_timeout: CACHE_SYNC_TIMEOUT,
            base_delay: QUEUE_BASE_DELAY,
            max_delay: QUEUE_MAX_DELAY,
            qps: QUEUE_QPS,
            burst: QUEUE_BURST,
            worker_restart_delay: WORKER_RESTART_DELAY,
            finalizer: default_finalizer(),
        }
    }
}

impl ControllerConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(qps) = self.qps {
            if !qps.is_finite() || qps <= 0.0 {
                return Err(format!("qps must be a positive number, got {qps}"));
            }
        }
        if let (Some(base), Some(max)) = (self.base_delay, self.max_delay) {
            if base > max {
                return Err(format!("base delay {base:?} exceeds max delay {max:?}"));
            }
        }
        Ok(())
    }
}

impl ControllerConfig {
    pub fn builder() -> ControllerConfigBuilder {
        ControllerConfigBuilder::default()
    }

    /// defaults overridden by `JSC_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(namespace) = lookup(ENV_NAMESPACE) {
            config.namespace = NameSpace::from(namespace.trim());
        }

        if let Some(value) = lookup(ENV_MAX_RETRIES) {
            config.max_retries =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber {
                        name: ENV_MAX_RETRIES.to_owned(),
                        value: value.clone(),
                    })?;
        }

        if let Some(value) = lookup(ENV_RESYNC_PERIOD) {
            config.resync_period =
                humantime::parse_duration(value.trim()).map_err(|source| {
                    ConfigError::InvalidDuration {
                        name: ENV_RESYNC_PERIOD.to_owned(),
                        value: value.clone(),
                        source,
                    }
                })?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::time::Duration;

    use jetstream_model::NameSpace;
    use jetstream_types::defaults::{ENV_MAX_RETRIES, ENV_NAMESPACE, ENV_RESYNC_PERIOD};

    use super::{ConfigError, ControllerConfig};

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_builder_defaults() {
        let config = ControllerConfig::builder()
            .max_retries(3)
            .build()
            .expect("build");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.resync_period, Duration::from_secs(30));
        assert_eq!(config.finalizer, "streamfinalizer.jetstream.nats.io");
        assert!(config.namespace.is_all());
    }

    #[test]
    fn test_builder_rejects_bad_rates() {
        for qps in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(ControllerConfig::builder().qps(qps).build().is_err());
        }
        assert!(
            ControllerConfig::builder()
                .base_delay(Duration::from_secs(2))
                .max_delay(Duration::from_secs(1))
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_env_overrides() {
        let config = ControllerConfig::from_lookup(lookup(&[
            (ENV_NAMESPACE, "prod"),
            (ENV_MAX_RETRIES, "4"),
            (ENV_RESYNC_PERIOD, "2m"),
        ]))
        .expect("config");
        assert_eq!(config.namespace, NameSpace::Named("prod".to_owned()));
        assert_eq!(config.max_retries, 4);
        assert_eq!(config.resync_period, Duration::from_secs(120));
    }

    #[test]
    fn test_env_invalid_values() {
        assert!(matches!(
            ControllerConfig::from_lookup(lookup(&[(ENV_MAX_RETRIES, "many")])),
            Err(ConfigError::InvalidNumber { .. })
        ));
        assert!(matches!(
            ControllerConfig::from_lookup(lookup(&[(ENV_RESYNC_PERIOD, "soon")])),
            Err(ConfigError::InvalidDuration { .. })
        ));
    }
}
