use std::convert::TryFrom;
use tokio::time::Instant;

#[cfg(test)]
use tokio::{sync::watch, time::Duration};

/// Clock is the time source of the replica and its timers. Tests swap in a `ManualClock`.
#[async_trait::async_trait]
pub(crate) trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;

    /// Milliseconds since the unix epoch. Used to timestamp log entries, never to measure elapsed
    /// time.
    fn wall_clock_millis(&self) -> u64;

    async fn sleep_until(&mut self, deadline: Instant);
}

#[derive(Copy, Clone)]
pub(crate) struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_clock_millis(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

/// ManualClock stands still until its TimeMachine moves it forward.
#[cfg(test)]
#[derive(Clone)]
pub(super) struct ManualClock {
    now: watch::Receiver<Instant>,
    epoch: Instant,
}

#[cfg(test)]
pub(super) struct TimeMachine {
    now: Instant,
    epoch: Instant,
    sender: watch::Sender<Instant>,
}

#[cfg(test)]
pub(super) fn manual_clock() -> (ManualClock, TimeMachine) {
    let epoch = Instant::now();
    let (sender, receiver) = watch::channel(epoch);

    let clock = ManualClock { now: receiver, epoch };
    let time_machine = TimeMachine {
        now: epoch,
        epoch,
        sender,
    };
    (clock, time_machine)
}

#[cfg(test)]
#[async_trait::async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.borrow()
    }

    /// Zero at creation.
    fn wall_clock_millis(&self) -> u64 {
        (self.now() - self.epoch).as_millis() as u64
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        loop {
            let reached = *self.now.borrow() >= deadline;
            if reached {
                return;
            }
            if self.now.changed().await.is_err() {
                // Time stopped for good.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
impl TimeMachine {
    pub(super) fn elapsed(&self) -> Duration {
        self.now - self.epoch
    }

    /// Sleepers only promise to wake at or after their deadline, so tests should move in steps
    /// smaller than the timings they observe.
    pub(super) fn forward(&mut self, by: Duration) {
        self.now += by;
        let _ = self.sender.send(self.now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleepers_wake_once_time_passes_their_deadline() {
        let (clock, mut time_machine) = manual_clock();
        let deadline = clock.now() + Duration::from_secs(60);

        let mut sleeper = clock.clone();
        let (woke_tx, mut woke_rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            sleeper.sleep_until(deadline).await;
            let _ = woke_tx.send(());
        });

        time_machine.forward(Duration::from_secs(59));
        tokio::time::timeout(Duration::from_millis(10), woke_rx.recv())
            .await
            .expect_err("Woke too early");

        time_machine.forward(Duration::from_secs(1));
        tokio::time::timeout(Duration::from_secs(5), woke_rx.recv())
            .await
            .expect("Sleeper didn't wake");
        assert_eq!(time_machine.elapsed(), Duration::from_secs(60));
        assert_eq!(clock.wall_clock_millis(), 60_000);
    }

    #[test]
    fn real_wall_clock_is_after_2020() {
        assert!(RealClock.wall_clock_millis() > 1_577_836_800_000);
    }
}
