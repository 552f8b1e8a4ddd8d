use crate::actor::WeakActorClient;
use crate::commitlog::Index;
use crate::replica::election::state_change_listener::ElectionStateChangeNotifier;
use crate::replica::election::timers::{FollowerTimerHandle, LeaderTimerHandle};
use crate::replica::election::{state_change_listener, LeaderStateTracker, PeerState};
use crate::replica::{ElectionStateChangeListener, ElectionStateSnapshot, LeaderTimerTick, Term};
use crate::transport::Address;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone)]
pub(crate) struct ElectionConfig {
    pub my_address: Address,
    pub leader_heartbeat_duration: Duration,
    pub follower_min_timeout: Duration,
    pub follower_max_timeout: Duration,
}

/// Participation is how this node takes part in the cluster, orthogonal to its election stage.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Participation {
    Active,
    /// Catching up as a non-voting member, until promoted.
    Joining,
    /// Leaving the cluster. Doesn't start elections.
    Leaving,
    /// Stopped applying entries after a fatal state machine failure.
    Halted,
}

/// ElectionState is responsible for holding state specific to the stage in an election. Its
/// methods are responsible for "what" to do. It is NOT responsible for validating anything
/// specific to logs, terms, peers, etc. or knowing "when" to do something.
pub(crate) struct ElectionState {
    state: State,
    participation: Participation,
    config: ElectionConfig,
    actor_client: WeakActorClient,
    state_change_notifier: ElectionStateChangeNotifier,
}

impl ElectionState {
    /// `new_follower()` creates a new ElectionState instance that starts out as a follower.
    pub(crate) fn new_follower(
        config: ElectionConfig,
        actor_client: WeakActorClient,
        participation: Participation,
    ) -> (Self, ElectionStateChangeListener) {
        let initial_state = State::Follower(FollowerState::with_leader(
            None,
            config.follower_min_timeout,
            config.follower_max_timeout,
            actor_client.clone(),
        ));
        let (notifier, listener) =
            state_change_listener::new(Self::current_state_impl(&initial_state, participation));

        let election_state = Self {
            state: initial_state,
            participation,
            config,
            actor_client,
            state_change_notifier: notifier,
        };

        (election_state, listener)
    }

    pub(crate) fn transition_to_follower(&mut self, new_leader: Option<Address>) {
        self.state = State::Follower(FollowerState::with_leader(
            new_leader,
            self.config.follower_min_timeout,
            self.config.follower_max_timeout,
            self.actor_client.clone(),
        ));
        self.notify_new_state();
    }

    pub(crate) fn transition_to_candidate_and_vote_for_self(&mut self) {
        let mut cs = CandidateState::new(
            self.config.follower_min_timeout,
            self.config.follower_max_timeout,
            self.actor_client.clone(),
        );

        // Vote for self
        cs.add_received_vote(self.config.my_address.clone());

        self.state = State::Candidate(cs);
        self.notify_new_state();
    }

    pub(crate) fn transition_to_leader(&mut self, term: Term, peers: Vec<Address>, last_log_index: Option<Index>) {
        self.state = State::Leader(LeaderState::new(
            term,
            peers,
            last_log_index,
            self.config.leader_heartbeat_duration,
            self.actor_client.clone(),
        ));
        self.notify_new_state();
    }

    pub(crate) fn participation(&self) -> Participation {
        self.participation
    }

    pub(crate) fn set_participation(&mut self, participation: Participation) {
        if self.participation != participation && self.participation != Participation::Halted {
            self.participation = participation;
            self.notify_new_state();
        }
    }

    /// Stops taking part in elections for good.
    pub(crate) fn halt(&mut self) {
        self.participation = Participation::Halted;
        self.state = State::Halted;
        self.notify_new_state();
    }

    pub(crate) fn current_state(&self) -> ElectionStateSnapshot {
        Self::current_state_impl(&self.state, self.participation)
    }

    fn current_state_impl(state: &State, participation: Participation) -> ElectionStateSnapshot {
        match (participation, state) {
            (Participation::Halted, _) | (_, State::Halted) => ElectionStateSnapshot::Halted,
            (Participation::Leaving, _) => ElectionStateSnapshot::Leaving,
            (_, State::Leader(_)) => ElectionStateSnapshot::Leader,
            (Participation::Joining, _) => ElectionStateSnapshot::Joining,
            (_, State::Candidate(_)) => ElectionStateSnapshot::Candidate,
            (_, State::Follower(FollowerState { leader: None, .. })) => ElectionStateSnapshot::FollowerNoLeader,
            (_, State::Follower(FollowerState { leader: Some(leader), .. })) => {
                ElectionStateSnapshot::Follower(leader.clone())
            }
        }
    }

    fn notify_new_state(&mut self) {
        self.state_change_notifier
            .notify_new_state(Self::current_state_impl(&self.state, self.participation));
    }

    /// Leader this node currently knows about, itself included.
    pub(crate) fn current_leader(&self) -> Option<Address> {
        match &self.state {
            State::Leader(_) => Some(self.config.my_address.clone()),
            State::Follower(fs) => fs.leader.clone(),
            State::Candidate(_) | State::Halted => None,
        }
    }

    pub(crate) fn is_leader(&self) -> bool {
        matches!(self.state, State::Leader(_))
    }

    pub(crate) fn is_candidate(&self) -> bool {
        matches!(self.state, State::Candidate(_))
    }

    pub(crate) fn reset_timeout_if_follower(&self) {
        if let State::Follower(fs) = &self.state {
            fs.reset_timeout();
        }
    }

    pub(crate) fn set_leader_if_unknown(&mut self, leader: &Address) {
        if let State::Follower(fs) = &mut self.state {
            if fs.leader.is_none() {
                fs.leader.replace(leader.clone());
                self.notify_new_state();
            }
        }
    }

    /// Return number of votes received if candidate, or None if no longer Candidate.
    pub(crate) fn add_vote_if_candidate(&mut self, vote_from: Address) -> Option<usize> {
        if let State::Candidate(cs) = &mut self.state {
            Some(cs.add_received_vote(vote_from))
        } else {
            None
        }
    }

    /// Votes received so far, if still a candidate.
    pub(crate) fn received_votes(&self) -> Option<&HashSet<Address>> {
        if let State::Candidate(cs) = &self.state {
            Some(&cs.received_votes_from)
        } else {
            None
        }
    }

    pub(crate) fn leader_state(&self) -> Option<&LeaderStateTracker> {
        if let State::Leader(ls) = &self.state {
            Some(&ls.tracker)
        } else {
            None
        }
    }

    pub(crate) fn leader_state_mut(&mut self) -> Option<&mut LeaderStateTracker> {
        if let State::Leader(ls) = &mut self.state {
            Some(&mut ls.tracker)
        } else {
            None
        }
    }

    /// Matches the leader's peer set to the configuration in effect: new members get a heartbeat
    /// timer (which fires right away), removed members lose theirs.
    pub(crate) fn sync_leader_peers(&mut self, peers: &[Address], last_log_index: Option<Index>) {
        let heartbeat = self.config.leader_heartbeat_duration;
        let actor_client = self.actor_client.clone();
        if let State::Leader(ls) = &mut self.state {
            let wanted: HashSet<Address> = peers.iter().cloned().collect();
            ls.tracker.retain_peers(&wanted);

            let term = ls.tracker.term();
            for peer in peers {
                if !ls.tracker.contains_peer(peer) {
                    let state = new_peer_state(peer.clone(), term, last_log_index, heartbeat, actor_client.clone());
                    ls.tracker.insert_peer(peer.clone(), state);
                }
            }
        }
    }
}

impl fmt::Debug for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Leader(_) => write!(f, "Leader"),
            State::Candidate(_) => write!(f, "Candidate"),
            State::Follower(FollowerState { leader: Some(leader), .. }) => write!(f, "Follower(Leader={})", leader),
            State::Follower(FollowerState { leader: None, .. }) => write!(f, "Follower(Leader=None)"),
            State::Halted => write!(f, "Halted"),
        }?;
        if self.participation != Participation::Active {
            write!(f, "[{:?}]", self.participation)?;
        }
        Ok(())
    }
}

enum State {
    Leader(LeaderState),
    Candidate(CandidateState),
    Follower(FollowerState),
    Halted,
}

struct LeaderState {
    tracker: LeaderStateTracker,
}

struct CandidateState {
    received_votes_from: HashSet<Address>,
    _follower_timeout_tracker: FollowerTimerHandle,
}

struct FollowerState {
    leader: Option<Address>,
    follower_timeout_tracker: FollowerTimerHandle,
}

fn new_peer_state(
    peer: Address,
    term: Term,
    last_log_index: Option<Index>,
    heartbeat_duration: Duration,
    actor_client: WeakActorClient,
) -> PeerState {
    let tick = LeaderTimerTick::Heartbeat { peer, term };
    let leader_timer_handle = LeaderTimerHandle::spawn_timer_task(heartbeat_duration, actor_client, tick);
    PeerState::new(leader_timer_handle, last_log_index, Instant::now())
}

impl LeaderState {
    fn new(
        term: Term,
        peers: Vec<Address>,
        last_log_index: Option<Index>,
        heartbeat_duration: Duration,
        actor_client: WeakActorClient,
    ) -> Self {
        let mut peer_state = HashMap::with_capacity(peers.len());
        for peer in peers {
            let state = new_peer_state(peer.clone(), term, last_log_index, heartbeat_duration, actor_client.clone());
            peer_state.insert(peer, state);
        }

        let maintenance_timer =
            LeaderTimerHandle::spawn_timer_task(heartbeat_duration, actor_client, LeaderTimerTick::Maintenance { term });

        Self {
            tracker: LeaderStateTracker::new(term, peer_state, maintenance_timer),
        }
    }
}

impl CandidateState {
    fn new(min_timeout: Duration, max_timeout: Duration, actor_client: WeakActorClient) -> Self {
        Self {
            received_votes_from: HashSet::with_capacity(3),
            _follower_timeout_tracker: FollowerTimerHandle::spawn_timer_task(min_timeout, max_timeout, actor_client),
        }
    }

    /// `add_received_vote()` returns the number of unique votes we've received after adding the
    /// provided `vote_from`
    fn add_received_vote(&mut self, vote_from: Address) -> usize {
        self.received_votes_from.insert(vote_from);
        self.received_votes_from.len()
    }
}

impl FollowerState {
    fn with_leader(
        leader: Option<Address>,
        min_timeout: Duration,
        max_timeout: Duration,
        actor_client: WeakActorClient,
    ) -> Self {
        Self {
            leader,
            follower_timeout_tracker: FollowerTimerHandle::spawn_timer_task(min_timeout, max_timeout, actor_client),
        }
    }

    fn reset_timeout(&self) {
        self.follower_timeout_tracker.reset_timeout();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;

    fn config() -> ElectionConfig {
        ElectionConfig {
            my_address: Address::new("me"),
            leader_heartbeat_duration: Duration::from_secs(10),
            follower_min_timeout: Duration::from_secs(60),
            follower_max_timeout: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn role_snapshots_follow_transitions() {
        let (actor, _rx) = ActorClient::new(10);
        let (mut state, listener) = ElectionState::new_follower(config(), actor.weak(), Participation::Active);
        assert_eq!(listener.current(), ElectionStateSnapshot::FollowerNoLeader);

        state.set_leader_if_unknown(&Address::new("other"));
        assert_eq!(state.current_state(), ElectionStateSnapshot::Follower(Address::new("other")));
        assert_eq!(state.current_leader(), Some(Address::new("other")));

        state.transition_to_candidate_and_vote_for_self();
        assert_eq!(state.add_vote_if_candidate(Address::new("me")), Some(1));
        assert_eq!(state.add_vote_if_candidate(Address::new("b")), Some(2));
        assert_eq!(listener.current(), ElectionStateSnapshot::Candidate);

        state.transition_to_leader(Term::new(2), vec![Address::new("b")], None);
        assert!(state.is_leader());
        assert_eq!(state.add_vote_if_candidate(Address::new("c")), None);
        assert_eq!(state.current_leader(), Some(Address::new("me")));

        state.set_participation(Participation::Leaving);
        assert_eq!(listener.current(), ElectionStateSnapshot::Leaving);

        state.halt();
        state.set_participation(Participation::Active);
        assert_eq!(listener.current(), ElectionStateSnapshot::Halted);
        assert_eq!(state.current_leader(), None);
    }

    #[tokio::test]
    async fn joining_node_reports_joining_until_leader() {
        let (actor, _rx) = ActorClient::new(10);
        let (mut state, _listener) = ElectionState::new_follower(config(), actor.weak(), Participation::Joining);
        assert_eq!(state.current_state(), ElectionStateSnapshot::Joining);

        state.transition_to_follower(Some(Address::new("leader")));
        assert_eq!(state.current_state(), ElectionStateSnapshot::Joining);

        state.set_participation(Participation::Active);
        assert_eq!(state.current_state(), ElectionStateSnapshot::Follower(Address::new("leader")));
    }

    #[tokio::test]
    async fn leader_peers_follow_configuration() {
        let (actor, _rx) = ActorClient::new(10);
        let (mut state, _listener) = ElectionState::new_follower(config(), actor.weak(), Participation::Active);
        state.transition_to_leader(Term::new(1), vec![Address::new("a"), Address::new("b")], Index::from_u64(4));

        state.sync_leader_peers(&[Address::new("b"), Address::new("c")], Index::from_u64(9));
        let tracker = state.leader_state().unwrap();
        let mut peers = tracker.peer_addresses();
        peers.sort();
        assert_eq!(peers, vec![Address::new("b"), Address::new("c")]);
        assert_eq!(
            tracker.peer_state(&Address::new("b")).unwrap().next_and_previous_log_index().0,
            Index::new(5)
        );
        assert_eq!(
            tracker.peer_state(&Address::new("c")).unwrap().next_and_previous_log_index().0,
            Index::new(10)
        );
    }
}
