use crate::transport::Address;
use tokio::sync::watch;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ElectionStateSnapshot {
    Leader,
    Candidate,
    Follower(Address),
    FollowerNoLeader,
    Joining,
    Leaving,
    Halted,
}

pub(super) fn new(initial_state: ElectionStateSnapshot) -> (ElectionStateChangeNotifier, ElectionStateChangeListener) {
    let (snd, rcv) = watch::channel(initial_state.clone());

    (
        ElectionStateChangeNotifier {
            snd,
            last: initial_state,
        },
        ElectionStateChangeListener { rcv },
    )
}

pub(super) struct ElectionStateChangeNotifier {
    snd: watch::Sender<ElectionStateSnapshot>,
    last: ElectionStateSnapshot,
}

impl ElectionStateChangeNotifier {
    pub(super) fn notify_new_state(&mut self, new_state: ElectionStateSnapshot) {
        // Listeners only care about transitions, not repeats of the same role.
        if self.last != new_state {
            self.last = new_state.clone();
            let _ = self.snd.send(new_state);
        }
    }
}

#[derive(Clone)]
pub(crate) struct ElectionStateChangeListener {
    rcv: watch::Receiver<ElectionStateSnapshot>,
}

impl ElectionStateChangeListener {
    /// Waits for the next role change. None once the replica is gone.
    pub(crate) async fn next(&mut self) -> Option<ElectionStateSnapshot> {
        match self.rcv.changed().await {
            Ok(_) => Some(self.rcv.borrow().clone()),
            Err(_) => None,
        }
    }

    pub(crate) fn current(&self) -> ElectionStateSnapshot {
        self.rcv.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listener_sees_changes_but_not_repeats() {
        let (mut notifier, mut listener) = new(ElectionStateSnapshot::FollowerNoLeader);

        notifier.notify_new_state(ElectionStateSnapshot::FollowerNoLeader);
        notifier.notify_new_state(ElectionStateSnapshot::Candidate);
        assert_eq!(listener.next().await, Some(ElectionStateSnapshot::Candidate));
        assert_eq!(listener.current(), ElectionStateSnapshot::Candidate);

        drop(notifier);
        assert_eq!(listener.next().await, None);
    }
}
