use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use event_listener::Event;
use tracing::{debug, trace};

/// Signal that stays raised once fired.
///
/// The controller uses it for shutdown, for the cache synced gate and for
/// worker completion. Waiters arriving after the signal fired return at once.
#[derive(Debug)]
pub struct StickyEvent {
    label: &'static str,
    fired: AtomicBool,
    event: Event,
}

impl Default for StickyEvent {
    fn default() -> Self {
        Self::with_label("signal")
    }
}

impl StickyEvent {
    fn with_label(label: &'static str) -> Self {
        Self {
            label,
            fired: AtomicBool::new(false),
            event: Event::new(),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// shared signal whose label shows up in logs
    pub fn named(label: &'static str) -> Arc<Self> {
        Arc::new(Self::with_label(label))
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn is_set(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    pub async fn listen(&self) {
        if self.is_set() {
            return;
        }

        let listener = self.event.listen();

        // fired between check and registration
        if self.is_set() {
            trace!(signal = self.label, "fired while registering");
            return;
        }

        listener.await
    }

    /// raise the signal, waking every waiter. Later calls do nothing
    pub fn notify(&self) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(signal = self.label, "fired");
        self.event.notify(usize::MAX);
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use tokio::select;

    use fluvio_future::task::spawn;
    use fluvio_future::timer::sleep;

    use super::StickyEvent;

    #[fluvio_future::test]
    async fn test_listen_after_notify_returns() {
        let event = StickyEvent::shared();
        event.notify();
        assert!(event.is_set());

        select! {
            _ = event.listen() => {},
            _ = sleep(Duration::from_millis(100)) => panic!("listener should not block once set"),
        }
    }

    #[fluvio_future::test]
    async fn test_listen_blocks_until_notify() {
        let event = StickyEvent::shared();

        select! {
            _ = event.listen() => panic!("nothing notified yet"),
            _ = sleep(Duration::from_millis(10)) => {}
        }
        assert!(!event.is_set());
    }

    #[test]
    fn test_named_signal() {
        let event = StickyEvent::named("shutdown");
        assert_eq!(event.label(), "shutdown");
        event.notify();
        event.notify();
        assert!(event.is_set());
    }

    #[fluvio_future::test]
    async fn test_all_waiters_released() {
        let event = StickyEvent::shared();
        let released = Arc::new(AtomicU32::new(0));

        for _ in 0..5 {
            let event = event.clone();
            let released = released.clone();
            spawn(async move {
                event.listen().await;
                released.fetch_add(1, Ordering::SeqCst);
            });
        }

        sleep(Duration::from_millis(10)).await;
        event.notify();
        sleep(Duration::from_millis(50)).await;

        assert_eq!(released.load(Ordering::SeqCst), 5);
    }
}
