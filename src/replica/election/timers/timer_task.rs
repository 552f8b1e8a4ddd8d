//! The task half of a timer. The role state owns the handle, which holds the shared wake time
//! strongly. The task only holds it weakly, so it stops once the handle is dropped.
use crate::replica::election::timers::Clock;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::time::{Duration, Instant};

pub(super) struct WakeTime<C> {
    clock: C,
    next: Mutex<Option<Instant>>,
}

impl<C: Clock> WakeTime<C> {
    pub(super) fn new(clock: C) -> Arc<Self> {
        Arc::new(WakeTime {
            clock,
            next: Mutex::new(None),
        })
    }

    /// Moves the next wake to `delay` from now, earlier or later than before.
    pub(super) fn push_back(&self, delay: Duration) {
        *self.lock() = Some(self.clock.now() + delay);
    }

    fn rearm(&self, delay: Duration) {
        let mut next = self.lock();
        if next.is_none() {
            *next = Some(self.clock.now() + delay);
        }
    }

    fn take(&self) -> Option<Instant> {
        self.lock().take()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Instant>> {
        self.next.lock().expect("WakeTime lock is poisoned")
    }
}

/// Sleeps until the latest wake time. If nothing pushed it back in the meantime, fires, and
/// fires again every `refire_after` until pushed back. With no wake time set at start, fires
/// right away.
pub(super) async fn run<C, F, Fut>(wake_time: Weak<WakeTime<C>>, mut clock: C, refire_after: Duration, mut fire: F)
where
    C: Clock,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    loop {
        let next = match wake_time.upgrade() {
            Some(wake_time) => wake_time.take(),
            None => return,
        };

        match next {
            Some(deadline) => clock.sleep_until(deadline).await,
            None => {
                fire().await;
                match wake_time.upgrade() {
                    Some(wake_time) => wake_time.rearm(refire_after),
                    None => return,
                }
            }
        }
    }
}
