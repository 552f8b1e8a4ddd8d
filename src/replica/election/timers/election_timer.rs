use crate::actor::WeakActorClient;
use crate::replica::election::timers::timer_task::{self, WakeTime};
use crate::replica::election::timers::{Clock, RealClock};
use rand::Rng;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// FollowerTimerHandle is the election timeout of a follower or candidate. Unless `reset_timeout()`
/// keeps pushing it back, the actor gets a FollowerTimeout after a random timeout between the
/// minimum and maximum, and another one every minimum timeout after that. Dropping the handle
/// stops the timer.
pub(crate) struct FollowerTimerHandle<C: Clock = RealClock> {
    wake_time: Arc<WakeTime<C>>,
    min_timeout: Duration,
    max_timeout: Duration,
}

impl FollowerTimerHandle {
    pub(crate) fn spawn_timer_task(min_timeout: Duration, max_timeout: Duration, actor_client: WeakActorClient) -> Self {
        let (handle, _) = Self::spawn_with_clock(min_timeout, max_timeout, actor_client, RealClock);
        handle
    }
}

impl<C: Clock> FollowerTimerHandle<C> {
    fn spawn_with_clock(
        min_timeout: Duration,
        max_timeout: Duration,
        actor_client: WeakActorClient,
        clock: C,
    ) -> (Self, JoinHandle<()>) {
        let handle = FollowerTimerHandle {
            wake_time: WakeTime::new(clock.clone()),
            min_timeout,
            max_timeout,
        };
        // Armed before the task starts, so a new follower doesn't time out right away.
        handle.reset_timeout();

        let fire = move || {
            let actor_client = actor_client.clone();
            async move {
                let _ = actor_client.follower_timeout().await;
            }
        };
        let task = tokio::spawn(timer_task::run(Arc::downgrade(&handle.wake_time), clock, min_timeout, fire));

        (handle, task)
    }

    /// We heard from the leader, or granted a vote.
    pub(crate) fn reset_timeout(&self) {
        let timeout = rand::thread_rng().gen_range(self.min_timeout..=self.max_timeout);
        self.wake_time.push_back(timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::replica::election::timers::actor_queue::ActorQueue;
    use crate::replica::election::timers::clock::manual_clock;

    const TIMEOUT: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn times_out_only_without_resets() {
        let (actor_client, receiver) = ActorClient::new(10);
        let mut actor = ActorQueue::new(receiver);
        let (clock, mut time_machine) = manual_clock();

        // No jitter.
        let (timer, _task) = FollowerTimerHandle::spawn_with_clock(TIMEOUT, TIMEOUT, actor_client.weak(), clock);
        actor.expect_quiet().await;

        for _ in 0..4 {
            time_machine.forward(TIMEOUT * 3 / 5);
            timer.reset_timeout();
        }
        actor.expect_quiet().await;
        assert_eq!(time_machine.elapsed(), TIMEOUT * 12 / 5);

        // Last reset was at 2.4, so the timeout is due at 3.4.
        time_machine.forward(TIMEOUT - Duration::from_nanos(1));
        actor.expect_quiet().await;
        time_machine.forward(Duration::from_nanos(1));
        actor.expect_follower_timeout().await;

        // Keeps going while no leader shows up, e.g. after a split vote.
        time_machine.forward(TIMEOUT);
        actor.expect_follower_timeout().await;
        actor.expect_quiet().await;

        // A reset after a timeout brings it back to normal.
        timer.reset_timeout();
        time_machine.forward(TIMEOUT / 2);
        actor.expect_quiet().await;
    }

    #[tokio::test]
    async fn dropping_the_handle_ends_the_task() {
        let (actor_client, receiver) = ActorClient::new(10);
        let mut actor = ActorQueue::new(receiver);
        let (clock, mut time_machine) = manual_clock();

        let (timer, task) = FollowerTimerHandle::spawn_with_clock(TIMEOUT, TIMEOUT, actor_client.weak(), clock);
        drop(timer);

        time_machine.forward(TIMEOUT * 2);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("Timer task kept running")
            .unwrap();
        actor.expect_quiet().await;
    }
}
