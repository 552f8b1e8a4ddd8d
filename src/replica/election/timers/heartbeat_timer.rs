use crate::actor::WeakActorClient;
use crate::replica::election::timers::timer_task::{self, WakeTime};
use crate::replica::election::timers::{Clock, RealClock};
use crate::replica::LeaderTimerTick;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// LeaderTimerHandle sends `tick` to the actor right away, then every `period` unless
/// `reset_heartbeat_timer()` pushed it back. Dropping the handle stops the timer.
pub(crate) struct LeaderTimerHandle<C: Clock = RealClock> {
    wake_time: Arc<WakeTime<C>>,
    period: Duration,
}

impl LeaderTimerHandle {
    pub(crate) fn spawn_timer_task(period: Duration, actor_client: WeakActorClient, tick: LeaderTimerTick) -> Self {
        let (handle, _) = Self::spawn_with_clock(period, actor_client, tick, RealClock);
        handle
    }
}

impl<C: Clock> LeaderTimerHandle<C> {
    fn spawn_with_clock(
        period: Duration,
        actor_client: WeakActorClient,
        tick: LeaderTimerTick,
        clock: C,
    ) -> (Self, JoinHandle<()>) {
        let handle = LeaderTimerHandle {
            wake_time: WakeTime::new(clock.clone()),
            period,
        };

        let fire = move || {
            let actor_client = actor_client.clone();
            let tick = tick.clone();
            async move {
                let _ = actor_client.leader_timer(tick).await;
            }
        };
        let task = tokio::spawn(timer_task::run(Arc::downgrade(&handle.wake_time), clock, period, fire));

        (handle, task)
    }

    /// Postpones the next tick by a full period, e.g. because the peer was just sent entries.
    pub(crate) fn reset_heartbeat_timer(&self) {
        self.wake_time.push_back(self.period);
    }
}
