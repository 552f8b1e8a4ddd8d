use crate::replica::ElectionStateChangeListener;
use crate::replica::ElectionStateSnapshot;

/// The part a member currently plays in the cluster.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RaftRole {
    Leader,
    Candidate,
    /// `leader` is None until this follower heard from the leader of its term.
    Follower { leader: Option<String> },
    /// Added to the cluster, not yet promoted to voter.
    Joining,
    Leaving,
    /// Stopped after a state machine failure. Needs operator intervention.
    Halted,
}

/// An event that happened, as observed by the local raft member.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RaftEvent {
    /// The member's role changed. Consuming this event type is subtle. It doesn't queue
    /// intermediate changes. If there are multiple changes between when the application awaits the
    /// next event, those are clobbered into only the most recent role.
    RoleChanged(RaftRole),
}

#[derive(Clone)]
pub struct RaftEventListener {
    election_state_change_listener: ElectionStateChangeListener,
}

impl RaftEventListener {
    pub(crate) fn new(election_state_change_listener: ElectionStateChangeListener) -> Self {
        RaftEventListener {
            election_state_change_listener,
        }
    }

    /// `next_event()` returns the next event that this local raft member observes, or None once
    /// the member stopped.
    pub async fn next_event(&mut self) -> Option<RaftEvent> {
        self.election_state_change_listener
            .next()
            .await
            .map(|election_state| RaftEvent::RoleChanged(RaftRole::from(election_state)))
    }

    pub(crate) fn current_role(&self) -> RaftRole {
        RaftRole::from(self.election_state_change_listener.current())
    }
}

// ------- Conversions --------

impl From<ElectionStateSnapshot> for RaftRole {
    fn from(election_state: ElectionStateSnapshot) -> Self {
        match election_state {
            ElectionStateSnapshot::Leader => RaftRole::Leader,
            ElectionStateSnapshot::Candidate => RaftRole::Candidate,
            ElectionStateSnapshot::Follower(leader) => RaftRole::Follower {
                leader: Some(leader.into_inner()),
            },
            ElectionStateSnapshot::FollowerNoLeader => RaftRole::Follower { leader: None },
            ElectionStateSnapshot::Joining => RaftRole::Joining,
            ElectionStateSnapshot::Leaving => RaftRole::Leaving,
            ElectionStateSnapshot::Halted => RaftRole::Halted,
        }
    }
}
