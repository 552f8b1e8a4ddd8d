mod clock;
mod election_timer;
mod heartbeat_timer;
mod timer_task;

#[cfg(test)]
mod actor_queue;

pub(crate) use clock::{Clock, RealClock};
pub(crate) use election_timer::FollowerTimerHandle;
pub(crate) use heartbeat_timer::LeaderTimerHandle;
