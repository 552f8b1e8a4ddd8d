use crate::commitlog::Index;
use crate::protocol::SessionId;
use crate::replica::election::timers::LeaderTimerHandle;
use crate::replica::Term;
use crate::transport::Address;
use std::collections::{HashMap, HashSet};
use tokio::time::{Duration, Instant};

/// LeaderStateTracker is everything a leader keeps for the duration of its term.
pub(crate) struct LeaderStateTracker {
    term: Term,
    peer_state: HashMap<Address, PeerState>,
    _maintenance_timer: LeaderTimerHandle,

    // Index of the no-op appended when this term's leadership began.
    noop_index: u64,
    // Heartbeat round counter for linearizable reads. Every AppendEntries is tagged with the
    // current round; a round is confirmed once a majority of voters acknowledged it.
    round: u64,

    /// Sessions with an expiry proposed but not yet applied.
    pub(crate) expiring: HashSet<SessionId>,
    /// Event delivery progress of each session this leader pushes events to. Volatile.
    pub(crate) deliveries: HashMap<SessionId, Delivery>,
    /// Leadership transfer in progress, because this leader is leaving the cluster.
    pub(crate) transfer: Option<Transfer>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Delivery {
    pub(crate) in_flight: bool,
    pub(crate) acked: u64,
}

#[derive(Debug)]
pub(crate) struct Transfer {
    pub(crate) target: Address,
    pub(crate) deadline: Instant,
    pub(crate) timeout_now_sent: bool,
}

impl LeaderStateTracker {
    pub(super) fn new(
        term: Term,
        peer_state: HashMap<Address, PeerState>,
        maintenance_timer: LeaderTimerHandle,
    ) -> Self {
        LeaderStateTracker {
            term,
            peer_state,
            _maintenance_timer: maintenance_timer,
            noop_index: 0,
            round: 0,
            expiring: HashSet::new(),
            deliveries: HashMap::new(),
            transfer: None,
        }
    }

    pub(crate) fn term(&self) -> Term {
        self.term
    }

    pub(crate) fn peer_state(&self, peer: &Address) -> Option<&PeerState> {
        self.peer_state.get(peer)
    }

    pub(crate) fn peer_state_mut(&mut self, peer: &Address) -> Option<&mut PeerState> {
        self.peer_state.get_mut(peer)
    }

    pub(crate) fn peer_addresses(&self) -> Vec<Address> {
        self.peer_state.keys().cloned().collect()
    }

    pub(crate) fn peers_iter(&self) -> impl Iterator<Item = (&Address, &PeerState)> {
        self.peer_state.iter()
    }

    pub(crate) fn contains_peer(&self, peer: &Address) -> bool {
        self.peer_state.contains_key(peer)
    }

    pub(super) fn insert_peer(&mut self, peer: Address, state: PeerState) {
        self.peer_state.insert(peer, state);
    }

    /// Drops peers that left the configuration, which stops their heartbeat timers.
    pub(super) fn retain_peers(&mut self, peers: &HashSet<Address>) {
        self.peer_state.retain(|address, _| peers.contains(address));
    }

    pub(crate) fn noop_index(&self) -> u64 {
        self.noop_index
    }

    pub(crate) fn set_noop_index(&mut self, index: u64) {
        self.noop_index = index;
    }

    pub(crate) fn round(&self) -> u64 {
        self.round
    }

    pub(crate) fn start_round(&mut self) -> u64 {
        self.round += 1;
        self.round
    }

    /// Highest round acknowledged by a quorum of voters, counting this leader.
    pub(crate) fn confirmed_round(&self, voting_peers: &[Address], quorum: usize) -> u64 {
        let mut rounds: Vec<u64> = voting_peers
            .iter()
            .map(|peer| self.peer_state.get(peer).map_or(0, |ps| ps.acked_round))
            .collect();
        rounds.push(self.round);
        Self::quorum_value(rounds, quorum)
    }

    /// True if a quorum of voters, counting this leader, acknowledged a heartbeat sent within
    /// `lease_duration`. Followers that acknowledged it won't vote for anyone else before their
    /// election timeout, which is at least as long as the lease.
    pub(crate) fn has_lease(&self, voting_peers: &[Address], quorum: usize, lease_duration: Duration, now: Instant) -> bool {
        let acks = voting_peers
            .iter()
            .filter_map(|peer| self.peer_state.get(peer))
            .filter(|ps| matches!(ps.lease_ack, Some(sent_at) if now < sent_at + lease_duration))
            .count();
        acks + 1 >= quorum
    }

    /// True if a quorum of voters, counting this leader, answered within `window`.
    pub(crate) fn has_quorum_contact(&self, voting_peers: &[Address], quorum: usize, window: Duration, now: Instant) -> bool {
        let recent = voting_peers
            .iter()
            .filter_map(|peer| self.peer_state.get(peer))
            .filter(|ps| now.saturating_duration_since(ps.last_contact) <= window)
            .count();
        recent + 1 >= quorum
    }

    // With values sorted descending, the quorum-th highest is held by at least a quorum.
    fn quorum_value(mut values: Vec<u64>, quorum: usize) -> u64 {
        if quorum == 0 || values.len() < quorum {
            return 0;
        }
        values.sort_unstable_by(|a, b| b.cmp(a));
        values[quorum - 1]
    }
}

pub(crate) struct PeerState {
    // Held to send heartbeats for this peer
    leader_timer_handler: LeaderTimerHandle,

    // > index of the next log entry to send to that server
    // > (initialized to leader last log index + 1)
    next: Index,
    // > index of highest log entry known to be replicated on server
    // > (initialized to 0, increases monotonically)
    matched: Option<Index>,

    // SeqNo is a form of a logical clock that tracks a term leader's interactions with a peer. When
    // a replica becomes leader, it initializes last sent/received to 0. Each time leader sends a
    // request, it increments the last sent SeqNo and ensures the response will be associated with
    // that SeqNo. If a leader receives a SeqNo from earlier than a previously received SeqNo, it
    // discards it.
    last_sent_seq_no: u64,
    last_received_seq_no: u64,

    // When we last heard anything from this peer.
    last_contact: Instant,
    // Send time of the latest successful AppendEntries.
    lease_ack: Option<Instant>,
    acked_round: u64,
    // Peer's compaction low-water mark, from its latest successful reply.
    low_water: u64,
}

impl PeerState {
    pub(super) fn new(leader_timer_handler: LeaderTimerHandle, previous_log_entry_index: Option<Index>, now: Instant) -> Self {
        PeerState {
            leader_timer_handler,
            next: previous_log_entry_index
                .map(|i| i.plus(1))
                .unwrap_or_else(Index::start_index),
            matched: None,
            last_sent_seq_no: 0,
            last_received_seq_no: 0,
            last_contact: now,
            lease_ack: None,
            acked_round: 0,
            low_water: 0,
        }
    }

    pub(crate) fn next_and_previous_log_index(&self) -> (Index, Option<Index>) {
        (self.next, self.next.checked_minus(1))
    }

    pub(crate) fn matched(&self) -> Option<Index> {
        self.matched
    }

    pub(crate) fn matched_u64(&self) -> u64 {
        crate::commitlog::index_as_u64(self.matched)
    }

    pub(crate) fn acked_round(&self) -> u64 {
        self.acked_round
    }

    pub(crate) fn low_water(&self) -> u64 {
        self.low_water
    }

    pub(crate) fn record_contact(&mut self, now: Instant) {
        if now > self.last_contact {
            self.last_contact = now;
        }
    }

    pub(crate) fn handle_append_entries_result(&mut self, logger: &slog::Logger, received_seq_no: u64, update: PeerStateUpdate) {
        if !self.ratchet_fwd_received_seq_no(received_seq_no) {
            slog::warn!(logger, "Dropping out of date seq-no({:?}): {:?}", received_seq_no, update);
            return;
        }

        match update {
            PeerStateUpdate::OtherError => { /* No action */ }
            PeerStateUpdate::Success {
                matched_index,
                low_water,
                sent_at,
                round,
            } => {
                self.update_log(logger, matched_index);
                self.low_water = low_water;
                self.acked_round = self.acked_round.max(round);
                if self.lease_ack.map_or(true, |previous| previous < sent_at) {
                    self.lease_ack = Some(sent_at);
                }
            }
            PeerStateUpdate::PeerLogBehind { last_log_index } => {
                self.rewind_log(logger, last_log_index);
            }
        }
    }

    fn update_log(&mut self, logger: &slog::Logger, matched_index: u64) {
        let new_matched = match Index::from_u64(matched_index) {
            Some(index) => index,
            // Empty log matched, e.g. heartbeat to a fresh peer.
            None => return,
        };

        if let Some(matched) = self.matched {
            if new_matched < matched {
                // Don't panic here, because peer could return garbage data.
                slog::warn!(
                    logger,
                    "Ignoring matched index going backwards. CurrentMatched={:?}, NewMatched={:?}",
                    matched,
                    new_matched
                );
                return;
            }
        }

        self.matched.replace(new_matched);
        self.next = self.next.max(new_matched.plus(1));
    }

    fn rewind_log(&mut self, logger: &slog::Logger, peer_last_log_index: u64) {
        // Jump straight to the end of the peer's log, but never below what it already matched.
        let floor = crate::commitlog::index_as_u64(self.matched) + 1;
        let rewound = self
            .next
            .as_u64()
            .saturating_sub(1)
            .min(peer_last_log_index + 1)
            .max(floor);

        if rewound == self.next.as_u64() {
            slog::warn!(logger, "Can't rewind peer log, already at {:?}", self.next);
            return;
        }
        self.next = Index::new(rewound);
    }

    /// Moves `next` to right after the compaction base, for a peer whose `next` entry no longer
    /// exists on the leader.
    pub(crate) fn skip_to_base(&mut self, base_index: u64) {
        if self.next.as_u64() <= base_index {
            self.next = Index::new(base_index + 1);
        }
    }

    pub(crate) fn has_outstanding_request(&self) -> bool {
        self.last_received_seq_no < self.last_sent_seq_no
    }

    pub(crate) fn next_seq_no(&mut self) -> u64 {
        self.last_sent_seq_no += 1;
        self.last_sent_seq_no
    }

    /// returns true if the state was mutated.
    fn ratchet_fwd_received_seq_no(&mut self, received_seq_no: u64) -> bool {
        if self.last_received_seq_no < received_seq_no && received_seq_no <= self.last_sent_seq_no {
            self.last_received_seq_no = received_seq_no;
            true
        } else {
            false
        }
    }

    pub(crate) fn reset_heartbeat_timer(&self) {
        self.leader_timer_handler.reset_heartbeat_timer();
    }
}

#[derive(Debug)]
pub(crate) enum PeerStateUpdate {
    Success {
        matched_index: u64,
        low_water: u64,
        sent_at: Instant,
        round: u64,
    },
    PeerLogBehind {
        last_log_index: u64,
    },
    OtherError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::replica::LeaderTimerTick;

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn peer_state(actor: &ActorClient, last_index: u64, now: Instant) -> PeerState {
        let timer = LeaderTimerHandle::spawn_timer_task(
            Duration::from_secs(60),
            actor.weak(),
            LeaderTimerTick::Maintenance { term: Term::new(1) },
        );
        PeerState::new(timer, Index::from_u64(last_index), now)
    }

    fn success(matched_index: u64, sent_at: Instant, round: u64) -> PeerStateUpdate {
        PeerStateUpdate::Success {
            matched_index,
            low_water: 0,
            sent_at,
            round,
        }
    }

    #[tokio::test]
    async fn success_ratchets_matched_and_next() {
        let (actor, _rx) = ActorClient::new(10);
        let now = Instant::now();
        let mut ps = peer_state(&actor, 10, now);
        assert_eq!(ps.next_and_previous_log_index(), (Index::new(11), Some(Index::new(10))));

        let seq = ps.next_seq_no();
        assert!(ps.has_outstanding_request());
        ps.handle_append_entries_result(&logger(), seq, success(12, now, 1));
        assert!(!ps.has_outstanding_request());
        assert_eq!(ps.matched(), Some(Index::new(12)));
        assert_eq!(ps.next_and_previous_log_index().0, Index::new(13));
        assert_eq!(ps.acked_round(), 1);

        // Stale replies are dropped.
        ps.handle_append_entries_result(&logger(), seq, success(20, now, 5));
        assert_eq!(ps.matched(), Some(Index::new(12)));
    }

    #[tokio::test]
    async fn behind_peer_jumps_back_to_its_log_end() {
        let (actor, _rx) = ActorClient::new(10);
        let now = Instant::now();
        let mut ps = peer_state(&actor, 100, now);

        let seq = ps.next_seq_no();
        ps.handle_append_entries_result(&logger(), seq, PeerStateUpdate::PeerLogBehind { last_log_index: 3 });
        assert_eq!(ps.next_and_previous_log_index().0, Index::new(4));

        // A conflicting entry at the end of the peer's log walks back one at a time.
        let seq = ps.next_seq_no();
        ps.handle_append_entries_result(&logger(), seq, PeerStateUpdate::PeerLogBehind { last_log_index: 3 });
        assert_eq!(ps.next_and_previous_log_index().0, Index::new(3));

        ps.skip_to_base(50);
        assert_eq!(ps.next_and_previous_log_index().0, Index::new(51));
    }

    #[tokio::test]
    async fn quorum_rounds_leases_and_contact() {
        let (actor, _rx) = ActorClient::new(10);
        let start = Instant::now();
        let timer = LeaderTimerHandle::spawn_timer_task(
            Duration::from_secs(60),
            actor.weak(),
            LeaderTimerTick::Maintenance { term: Term::new(1) },
        );
        let (a, b) = (Address::new("a"), Address::new("b"));
        let mut peers = HashMap::new();
        peers.insert(a.clone(), peer_state(&actor, 0, start));
        peers.insert(b.clone(), peer_state(&actor, 0, start));
        let mut tracker = LeaderStateTracker::new(Term::new(1), peers, timer);
        let voters = vec![a.clone(), b.clone()];

        let round = tracker.start_round();
        assert_eq!(tracker.confirmed_round(&voters, 2), 0);
        assert!(!tracker.has_lease(&voters, 2, Duration::from_millis(500), start));

        let ps = tracker.peer_state_mut(&a).unwrap();
        let seq = ps.next_seq_no();
        ps.handle_append_entries_result(&logger(), seq, success(0, start, round));

        assert_eq!(tracker.confirmed_round(&voters, 2), round);
        assert!(tracker.has_lease(&voters, 2, Duration::from_millis(500), start + Duration::from_millis(100)));
        assert!(!tracker.has_lease(&voters, 2, Duration::from_millis(500), start + Duration::from_millis(600)));

        let window = Duration::from_millis(1000);
        assert!(tracker.has_quorum_contact(&voters, 2, window, start + window));
        assert!(!tracker.has_quorum_contact(&voters, 2, window, start + window * 2));
        tracker.peer_state_mut(&b).unwrap().record_contact(start + window);
        assert!(tracker.has_quorum_contact(&voters, 2, window, start + window * 2));

        // A lone leader is its own quorum.
        assert!(tracker.has_lease(&[], 1, Duration::from_millis(1), start));
        assert_eq!(tracker.confirmed_round(&[], 1), round);
    }
}
