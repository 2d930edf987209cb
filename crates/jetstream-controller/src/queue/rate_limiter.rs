use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use jetstream_types::defaults::{QUEUE_BASE_DELAY, QUEUE_BURST, QUEUE_MAX_DELAY, QUEUE_QPS};

/// Decides how long an item waits before it is re-queued
pub trait RateLimiter<K>: Send + Sync {
    /// delay for next attempt of key, counts as one failure
    fn when(&self, key: &K) -> Duration;

    /// stop tracking key, typically after success or when giving up
    fn forget(&self, key: &K);

    fn num_requeues(&self, key: &K) -> u32;
}

/// Per item exponential backoff: `base * 2^failures`, capped at `max`
#[derive(Debug)]
pub struct ItemExponentialFailureRateLimiter<K> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K> ItemExponentialFailureRateLimiter<K> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> Default for ItemExponentialFailureRateLimiter<K> {
    fn default() -> Self {
        Self::new(QUEUE_BASE_DELAY, QUEUE_MAX_DELAY)
    }
}

impl<K> RateLimiter<K> for ItemExponentialFailureRateLimiter<K>
where
    K: Clone + Eq + Hash + Send,
{
    fn when(&self, key: &K) -> Duration {
        let exp = {
            let mut failures = self.failures.lock();
            let count = failures.entry(key.clone()).or_default();
            let exp = *count;
            *count = count.saturating_add(1);
            exp
        };

        2u32.checked_pow(exp)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    fn forget(&self, key: &K) {
        self.failures.lock().remove(key);
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or_default()
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Overall token bucket shared by all items.
///
/// Tokens are reserved ahead, so a burst beyond capacity spreads out at `qps`.
#[derive(Debug)]
pub struct BucketRateLimiter {
    qps: f64,
    burst: u32,
    bucket: Mutex<Bucket>,
}

impl BucketRateLimiter {
    pub fn new(qps: f64, burst: u32) -> Self {
        Self {
            qps,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(burst),
                last: Instant::now(),
            }),
        }
    }

    fn reserve(&self) -> Duration {
        if !self.qps.is_finite() || self.qps <= 0.0 {
            return Duration::ZERO;
        }

        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last).as_secs_f64();
        bucket.last = now;
        bucket.tokens = (bucket.tokens + elapsed * self.qps).min(f64::from(self.burst));
        bucket.tokens -= 1.0;

        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(-bucket.tokens / self.qps).unwrap_or(Duration::MAX)
        }
    }
}

impl Default for BucketRateLimiter {
    fn default() -> Self {
        Self::new(QUEUE_QPS, QUEUE_BURST)
    }
}

impl<K> RateLimiter<K> for BucketRateLimiter {
    fn when(&self, _key: &K) -> Duration {
        self.reserve()
    }

    fn forget(&self, _key: &K) {}

    fn num_requeues(&self, _key: &K) -> u32 {
        0
    }
}

/// Longest delay among its limiters
pub struct MaxOfRateLimiter<K> {
    limiters: Vec<Box<dyn RateLimiter<K>>>,
}

impl<K> MaxOfRateLimiter<K> {
    pub fn new(limiters: Vec<Box<dyn RateLimiter<K>>>) -> Self {
        Self { limiters }
    }
}

impl<K> RateLimiter<K> for MaxOfRateLimiter<K>
where
    K: Send,
{
    fn when(&self, key: &K) -> Duration {
        self.limiters
            .iter()
            .map(|limiter| limiter.when(key))
            .max()
            .unwrap_or_default()
    }

    fn forget(&self, key: &K) {
        for limiter in &self.limiters {
            limiter.forget(key);
        }
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.limiters
            .iter()
            .map(|limiter| limiter.num_requeues(key))
            .max()
            .unwrap_or_default()
    }
}

/// per item exponential backoff combined with overall bucket
pub fn controller_rate_limiter<K>(
    base: Duration,
    max: Duration,
    qps: f64,
    burst: u32,
) -> MaxOfRateLimiter<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    MaxOfRateLimiter::new(vec![
        Box::new(ItemExponentialFailureRateLimiter::new(base, max)),
        Box::new(BucketRateLimiter::new(qps, burst)),
    ])
}

pub fn default_controller_rate_limiter<K>() -> MaxOfRateLimiter<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    controller_rate_limiter(QUEUE_BASE_DELAY, QUEUE_MAX_DELAY, QUEUE_QPS, QUEUE_BURST)
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::{
        BucketRateLimiter, ItemExponentialFailureRateLimiter, RateLimiter,
        default_controller_rate_limiter,
    };

    #[test]
    fn test_exponential_backoff() {
        let limiter =
            ItemExponentialFailureRateLimiter::new(Duration::from_millis(5), Duration::from_secs(1));
        let key = "default/orders".to_owned();

        assert_eq!(limiter.when(&key), Duration::from_millis(5));
        assert_eq!(limiter.when(&key), Duration::from_millis(10));
        assert_eq!(limiter.when(&key), Duration::from_millis(20));
        assert_eq!(limiter.num_requeues(&key), 3);

        // other keys are independent
        assert_eq!(limiter.when(&"other".to_owned()), Duration::from_millis(5));

        for _ in 0..20 {
            limiter.when(&key);
        }
        assert_eq!(limiter.when(&key), Duration::from_secs(1));

        limiter.forget(&key);
        assert_eq!(limiter.num_requeues(&key), 0);
        assert_eq!(limiter.when(&key), Duration::from_millis(5));
    }

    #[test]
    fn test_exponent_overflow_is_capped() {
        let limiter: ItemExponentialFailureRateLimiter<u32> = ItemExponentialFailureRateLimiter::default();
        for _ in 0..100 {
            assert!(limiter.when(&1) <= Duration::from_secs(1000));
        }
        assert_eq!(limiter.when(&1), Duration::from_secs(1000));
    }

    #[test]
    fn test_bucket_burst() {
        let limiter = BucketRateLimiter::new(10.0, 2);
        assert_eq!(RateLimiter::<u32>::when(&limiter, &1), Duration::ZERO);
        assert_eq!(RateLimiter::<u32>::when(&limiter, &2), Duration::ZERO);
        let delay = RateLimiter::<u32>::when(&limiter, &3);
        assert!(delay > Duration::ZERO);
        assert!(delay <= Duration::from_millis(100));
    }

    #[test]
    fn test_bucket_extreme_rates() {
        let tiny = BucketRateLimiter::new(1e-300, 0);
        assert_eq!(RateLimiter::<u32>::when(&tiny, &1), Duration::MAX);

        let invalid = BucketRateLimiter::new(f64::NAN, 0);
        assert_eq!(RateLimiter::<u32>::when(&invalid, &1), Duration::ZERO);
    }

    #[test]
    fn test_max_of_tracks_requeues() {
        let limiter = default_controller_rate_limiter::<String>();
        let key = "default/orders".to_owned();
        assert_eq!(limiter.when(&key), Duration::from_millis(5));
        assert_eq!(limiter.num_requeues(&key), 1);
        limiter.forget(&key);
        assert_eq!(limiter.num_requeues(&key), 0);
    }
}
