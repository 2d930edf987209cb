//!
//! # Retry queue
//!
//! Deduplicating work queue with delayed and rate limited re-queue.
//!
//! A key is never handed out twice at the same time: a key added while it is
//! being processed is marked dirty and queued again once `done` is called.
//!
mod rate_limiter;

pub use rate_limiter::{
    BucketRateLimiter, ItemExponentialFailureRateLimiter, MaxOfRateLimiter, RateLimiter,
    controller_rate_limiter, default_controller_rate_limiter,
};

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use event_listener::Event;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use fluvio_future::task::spawn;
use fluvio_future::timer::sleep;

struct QueueState<K> {
    queue: VecDeque<K>,
    /// keys that need processing
    dirty: HashSet<K>,
    processing: HashSet<K>,
    /// keys with pending delayed add and their ready time
    waiting: HashMap<K, Instant>,
    shutting_down: bool,
}

impl<K> Default for QueueState<K> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            waiting: HashMap::new(),
            shutting_down: false,
        }
    }
}

struct QueueInner<K> {
    state: Mutex<QueueState<K>>,
    available: Event,
    limiter: Box<dyn RateLimiter<K>>,
}

impl<K> QueueInner<K>
where
    K: Clone + Eq + Hash + Debug,
{
    fn add(&self, key: K) {
        let mut state = self.state.lock();
        if state.shutting_down {
            trace!(?key, "shutting down, ignored");
            return;
        }
        if !state.dirty.insert(key.clone()) {
            trace!(?key, "already queued");
            return;
        }
        if state.processing.contains(&key) {
            trace!(?key, "in process, marked dirty");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.available.notify(1);
    }

    /// Some(None) signals drained queue after shut down
    fn try_get(&self) -> Option<Option<K>> {
        let mut state = self.state.lock();
        if let Some(key) = state.queue.pop_front() {
            state.dirty.remove(&key);
            state.processing.insert(key.clone());
            return Some(Some(key));
        }
        if state.shutting_down {
            return Some(None);
        }
        None
    }
}

pub struct RateLimitingQueue<K> {
    inner: Arc<QueueInner<K>>,
}

impl<K> Clone for RateLimitingQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K> RateLimitingQueue<K>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    pub fn new(limiter: impl RateLimiter<K> + 'static) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                available: Event::new(),
                limiter: Box::new(limiter),
            }),
        }
    }

    pub fn add(&self, key: K) {
        self.inner.add(key)
    }

    /// wait for next key. None once queue is shut down and drained
    pub async fn get(&self) -> Option<K> {
        loop {
            if let Some(next) = self.inner.try_get() {
                return next;
            }

            let listener = self.inner.available.listen();

            // key may have been added before listener was registered
            if let Some(next) = self.inner.try_get() {
                return next;
            }

            listener.await;
        }
    }

    /// mark key as processed, must follow every `get`
    pub fn done(&self, key: &K) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            trace!(?key, "dirty, queued again");
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.available.notify(1);
        }
    }

    /// add key once `delay` has passed.
    /// a key already waiting keeps its earlier ready time
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let Some(ready) = Instant::now().checked_add(delay) else {
            warn!(?key, delay_s = delay.as_secs(), "delay out of range, not queued");
            return;
        };
        {
            let mut state = self.inner.state.lock();
            if state.shutting_down {
                return;
            }
            if let Some(existing) = state.waiting.get(&key) {
                if *existing <= ready {
                    trace!(?key, "already waiting with earlier deadline");
                    return;
                }
            }
            state.waiting.insert(key.clone(), ready);
        }

        trace!(?key, delay_ms = delay.as_millis() as u64, "delayed add");
        let inner = self.inner.clone();
        spawn(async move {
            sleep(delay).await;
            let due = {
                let mut state = inner.state.lock();
                if state.waiting.get(&key) == Some(&ready) {
                    state.waiting.remove(&key);
                    true
                } else {
                    false
                }
            };
            if due {
                inner.add(key);
            }
        });
    }

    /// add key after rate limiter delay, counting one more retry
    pub fn add_rate_limited(&self, key: K) {
        let delay = self.inner.limiter.when(&key);
        debug!(?key, delay_ms = delay.as_millis() as u64, "rate limited re-queue");
        self.add_after(key, delay);
    }

    /// clear retry history of key
    pub fn forget(&self, key: &K) {
        self.inner.limiter.forget(key);
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.inner.limiter.num_requeues(key)
    }

    /// stop accepting keys; waiters get None once queued keys are drained
    pub fn shut_down(&self) {
        {
            let mut state = self.inner.state.lock();
            state.shutting_down = true;
            state.waiting.clear();
        }
        debug!("queue shut down");
        self.inner.available.notify(usize::MAX);
    }

    pub fn shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    /// keys ready to be handed out
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
