use crate::actor::WeakActorClient;
use crate::commitlog::{Index, Log};
use crate::executor::{Applied, Completion, Executor};
use crate::protocol::{
    CloseSessionOk, CommandConsistency, JoinOk, KeepAliveOk, LeaveOk, OpenSessionOk, PeerError, ProtocolError, Reply,
    Request, Response, VoteOk, VoteRequest,
};
use crate::replica::election::{Clock, ElectionState, Participation, RealClock};
use crate::replica::local_state::{PersistentLocalState, Term};
use crate::replica::membership::ClusterMembership;
use crate::replica::pending::{EventBarrier, Pending, ReplyContext, Waiter};
use crate::replica::write_ahead_log::WriteAheadLog;
use crate::replica::{EntryKind, LeaderTimerTick, LogEntry, PeerCallError, ReplicaStatus, RequestVoteReplyFromPeer};
use crate::transport::{Address, Transport, TransportError};
use std::io;
use std::sync::Arc;
use tokio::time::error::Elapsed;
use tokio::time::Duration;

/// Timing and batching knobs of a replica.
#[derive(Clone, Debug)]
pub(crate) struct ReplicaOptions {
    pub(crate) leader_heartbeat_duration: Duration,
    pub(crate) follower_min_timeout: Duration,
    pub(crate) follower_max_timeout: Duration,
    pub(crate) append_entries_timeout: Duration,
    pub(crate) session_timeout: Duration,
    pub(crate) lease_duration: Duration,
    pub(crate) max_entries_per_append: usize,
    pub(crate) publish_timeout: Duration,
}

/// Replica is one member's raft state: election, log replication, and the state machine fed by
/// committed entries. It's driven by ReplicaActor, one event at a time.
///
/// The impl is split by concern: elections and commit/apply live here, log replication in
/// `peer_rpc`, client requests in `client_handling`, and configuration changes in
/// `membership_handling`.
pub(crate) struct Replica<L>
where
    L: Log<LogEntry>,
{
    pub(super) logger: slog::Logger,
    pub(super) my_address: Address,
    pub(super) membership: ClusterMembership,
    pub(super) local_state: Box<dyn PersistentLocalState + Send>,
    pub(super) election_state: ElectionState,
    pub(super) wal: WriteAheadLog<L>,
    pub(super) executor: Executor,
    pub(super) pending: Pending,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) actor_client: WeakActorClient,
    pub(super) clock: RealClock,
    pub(super) options: ReplicaOptions,
    // Highest entry timestamp seen, so that timestamps never go backwards across leaders.
    pub(super) last_timestamp: u64,
}

impl<L> Replica<L>
where
    L: Log<LogEntry>,
{
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        logger: slog::Logger,
        my_address: Address,
        membership: ClusterMembership,
        local_state: Box<dyn PersistentLocalState + Send>,
        election_state: ElectionState,
        wal: WriteAheadLog<L>,
        executor: Executor,
        transport: Arc<dyn Transport>,
        actor_client: WeakActorClient,
        options: ReplicaOptions,
    ) -> Self {
        Replica {
            logger,
            my_address,
            membership,
            local_state,
            election_state,
            wal,
            executor,
            pending: Pending::new(),
            transport,
            actor_client,
            clock: RealClock,
            options,
            last_timestamp: 0,
        }
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.election_state.participation() == Participation::Halted
    }

    pub(crate) fn status(&self) -> ReplicaStatus {
        ReplicaStatus {
            term: self.local_state.current_term().as_u64(),
            role: self.election_state.current_state(),
            commit_index: self.wal.commit_index_u64(),
            applied_index: self.executor.last_applied(),
            first_log_index: self.wal.first_index(),
            last_log_index: self.wal.last_index(),
            members: self.membership.current().members().to_vec(),
        }
    }

    pub(crate) fn log_digest(&self) -> Result<Vec<(u64, u64)>, String> {
        self.wal.committed_digest().map_err(|e| e.to_string())
    }

    pub(super) fn reply_context(&self) -> ReplyContext {
        // While handing over leadership, don't point clients back at ourselves.
        let transferring = self
            .election_state
            .leader_state()
            .map_or(false, |ls| ls.transfer.is_some());
        ReplyContext {
            leader: if transferring {
                None
            } else {
                self.election_state.current_leader()
            },
            members: self.membership.current().addresses(),
        }
    }

    pub(super) fn reply<T>(&self, outcome: Result<T, ProtocolError>) -> Reply<T> {
        self.reply_context().reply(outcome)
    }

    pub(super) fn next_timestamp(&mut self) -> u64 {
        self.last_timestamp = self.clock.wall_clock_millis().max(self.last_timestamp);
        self.last_timestamp
    }

    /// Appends an entry in the current term to the local log only.
    pub(super) fn append_local(&mut self, kind: EntryKind) -> Result<Index, io::Error> {
        let term = self.local_state.current_term();
        let timestamp = self.next_timestamp();
        let index = self.wal.append(LogEntry::new(term, timestamp, kind))?;
        self.wal.flush()?;
        Ok(index)
    }

    /// Leader only. Appends an entry, registers `waiter` to be answered once the entry is applied,
    /// and starts replicating it. Returns the entry's index.
    pub(super) fn propose(&mut self, kind: EntryKind, waiter: Option<Waiter>) -> Option<u64> {
        let configuration = match &kind {
            EntryKind::Configuration { members } => Some(members.clone()),
            _ => None,
        };

        let index = match self.append_local(kind) {
            Ok(index) => index.as_u64(),
            Err(e) => {
                slog::error!(self.logger, "Failed to append to local log: {:?}", e);
                if let Some(waiter) = waiter {
                    waiter.fail(&self.reply_context(), ProtocolError::Internal(e.to_string()));
                }
                return None;
            }
        };

        // A configuration takes effect as soon as it's in the log.
        if let Some(members) = configuration {
            self.membership.append(index, members);
            let latest_index = self.wal.latest_entry().map(|(_, i)| i);
            self.election_state
                .sync_leader_peers(&self.membership.peers(), latest_index);
        }

        // Register before replicating: a leader without voting peers commits right away.
        if let Some(waiter) = waiter {
            self.pending.add_waiter(index, waiter);
        }

        self.replicate_to_all();
        self.advance_leader_commit();
        Some(index)
    }

    // ------- Elections --------

    pub(crate) fn handle_follower_timeout(&mut self) {
        if self.election_state.is_leader() {
            slog::warn!(self.logger, "Received follower timeout as leader. Ignoring.");
            return;
        }
        match self.election_state.participation() {
            Participation::Leaving | Participation::Halted => {
                slog::debug!(self.logger, "Not starting an election. Election state: {:?}", self.election_state);
                return;
            }
            Participation::Active | Participation::Joining => {}
        }
        if !self.membership.am_voter() {
            slog::debug!(self.logger, "Not a voting member. Not starting an election.");
            return;
        }

        self.start_election();
    }

    pub(super) fn start_election(&mut self) {
        // Write-ahead log style: Vote for self on local state before transitioning to candidate.
        let new_term = self.local_state.increment_term_and_vote_for_self();
        self.election_state.transition_to_candidate_and_vote_for_self();
        slog::info!(
            self.logger,
            "Started election for term {:?}. Election state: {:?}",
            new_term,
            self.election_state,
        );

        let voting_peers = self.membership.voting_peers();
        if voting_peers.is_empty() {
            self.become_leader(new_term);
            return;
        }

        let request = self.new_vote_request(new_term);
        for peer in voting_peers {
            tokio::task::spawn(Self::call_peer_request_vote(
                self.logger.clone(),
                self.transport.clone(),
                peer,
                request.clone(),
                self.options.append_entries_timeout,
                self.actor_client.clone(),
                new_term,
                None,
            ));
        }
    }

    fn become_leader(&mut self, term: Term) {
        let latest_index = self.wal.latest_entry().map(|(_, index)| index);
        self.election_state
            .transition_to_leader(term, self.membership.peers(), latest_index);
        slog::info!(self.logger, "Became leader for term {:?}", term);

        // Entries from earlier terms only commit once an entry from this term does.
        match self.append_local(EntryKind::NoOp) {
            Ok(index) => {
                if let Some(leader_state) = self.election_state.leader_state_mut() {
                    leader_state.set_noop_index(index.as_u64());
                }
            }
            Err(e) => {
                slog::error!(self.logger, "Failed to append no-op as new leader: {:?}", e);
                self.step_down(None);
                return;
            }
        }

        self.replicate_to_all();
        self.advance_leader_commit();
    }

    pub(super) fn step_down(&mut self, new_leader: Option<Address>) {
        let was_leader = self.election_state.is_leader();
        self.election_state.transition_to_follower(new_leader);
        if was_leader {
            slog::info!(self.logger, "Stepped down. Election state: {:?}", self.election_state);
            let context = self.reply_context();
            self.pending.fail_leader_bound(&context);
        }
    }

    /// > If RPC request or response contains term T > currentTerm:
    /// > set currentTerm = T, convert to follower (§5.1)
    ///
    /// Returns true if the term increased.
    pub(super) fn observe_term(&mut self, term: Term, leader: Option<Address>) -> bool {
        let increased = self.local_state.store_term_if_increased(term);
        if increased {
            self.step_down(leader);
        }
        increased
    }

    pub(crate) fn server_handle_request_vote(&mut self, request: VoteRequest) -> Result<VoteOk, PeerError> {
        // Members that were removed, or haven't been promoted yet, must not disrupt the cluster.
        if !self.membership.current().is_voter(&request.candidate) {
            return Err(PeerError::NotInCluster);
        }

        // Read our local term/vote state as 1 atomic action.
        let (current_term, mut opt_voted_for) = self.local_state.voted_for_current_term();
        let candidate_term = Term::new(request.term);

        // 1. Reply false if term < currentTerm (§5.1)
        if candidate_term < current_term {
            slog::info!(self.logger, "Not granting vote. Candidate term is out of date.");
            return Err(PeerError::StaleTerm {
                current_term: current_term.as_u64(),
            });
        }

        if self.observe_term(candidate_term, None) {
            slog::info!(
                self.logger,
                "Observed increased term in RequestVote call. Election state: {:?}",
                self.election_state
            );
            // If we've increased the term, we haven't voted for anyone this term.
            opt_voted_for = None;
        }

        // 2. If votedFor is null or candidateId, and candidate’s log is at
        // least as up-to-date as receiver’s log, grant vote (§5.2, §5.4).
        if let Some(voted_for) = opt_voted_for {
            if *voted_for != request.candidate {
                slog::info!(self.logger, "Not granting vote. We already voted for {:?}.", voted_for);
                return Ok(VoteOk { vote_granted: false });
            }
        }

        if !self.is_candidate_log_gte_mine(request.last_log_term, request.last_log_index) {
            slog::info!(self.logger, "Not granting vote. Candidate log is out of date.");
            return Ok(VoteOk { vote_granted: false });
        }

        let cas_success = self
            .local_state
            .store_vote_for_term_if_unvoted(candidate_term, request.candidate.clone());
        let granted = cas_success
            || matches!(
                self.local_state.voted_for_current_term(),
                (term, Some(voted_for)) if term == candidate_term && voted_for.as_ref() == &request.candidate
            );

        if granted {
            slog::info!(self.logger, "Voting for {:?} in term {:?}.", request.candidate, candidate_term);
            self.election_state.reset_timeout_if_follower();
        }
        Ok(VoteOk { vote_granted: granted })
    }

    fn is_candidate_log_gte_mine(&self, candidate_last_term: u64, candidate_last_index: u64) -> bool {
        // > Raft determines which of two logs is more up-to-date
        // > by comparing the index and term of the last entries in the
        // > logs. If the logs have last entries with different terms, then
        // > the log with the later term is more up-to-date. If the logs
        // > end with the same term, then whichever log is longer is
        // > more up-to-date.
        let my_last_term = self.wal.last_term().as_u64();
        if candidate_last_term != my_last_term {
            return candidate_last_term > my_last_term;
        }
        candidate_last_index >= self.wal.last_index()
    }

    pub(crate) fn handle_request_vote_reply_from_peer(&mut self, reply: RequestVoteReplyFromPeer) {
        let current_term = self.local_state.current_term();
        if current_term != reply.term {
            slog::info!(
                self.logger,
                "Received vote for outdated term {:?}, current term: {:?}.",
                reply.term,
                current_term,
            );
            return;
        }

        match reply.result {
            Ok(VoteOk { vote_granted: true }) => {
                if self.election_state.add_vote_if_candidate(reply.peer).is_none() {
                    slog::info!(
                        self.logger,
                        "Received vote for term {:?} after transitioning to election state: {:?}",
                        reply.term,
                        self.election_state,
                    );
                    return;
                }

                // Only votes from members of the configuration in effect count.
                let (num_votes, quorum) = {
                    let configuration = self.membership.current();
                    let num_votes = self
                        .election_state
                        .received_votes()
                        .map_or(0, |votes| votes.iter().filter(|v| configuration.is_voter(v)).count());
                    (num_votes, configuration.quorum())
                };
                slog::info!(self.logger, "Received {}/{} votes for term {:?}", num_votes, quorum, reply.term);

                if num_votes >= quorum {
                    self.become_leader(reply.term);
                }
            }
            Ok(VoteOk { vote_granted: false }) => {
                slog::info!(self.logger, "Vote not granted from {:?} for term {:?}", reply.peer, reply.term);
            }
            Err(PeerCallError::Rejected(PeerError::StaleTerm { current_term })) => {
                self.observe_term(Term::new(current_term), None);
            }
            Err(PeerCallError::Rejected(PeerError::NotInCluster)) => {
                slog::warn!(self.logger, "Peer {:?} doesn't consider us a voting member", reply.peer);
            }
            Err(e) => {
                if !self.election_state.is_candidate() || !self.membership.current().is_voter(&reply.peer) {
                    return;
                }
                slog::debug!(self.logger, "Retrying RequestVote to {:?} after: {}", reply.peer, e);
                tokio::task::spawn(Self::call_peer_request_vote(
                    self.logger.clone(),
                    self.transport.clone(),
                    reply.peer,
                    self.new_vote_request(reply.term),
                    self.options.append_entries_timeout,
                    self.actor_client.clone(),
                    reply.term,
                    Some(self.options.leader_heartbeat_duration),
                ));
            }
        }
    }

    fn new_vote_request(&self, term: Term) -> VoteRequest {
        VoteRequest {
            term: term.as_u64(),
            candidate: self.my_address.clone(),
            last_log_index: self.wal.last_index(),
            last_log_term: self.wal.last_term().as_u64(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn call_peer_request_vote(
        logger: slog::Logger,
        transport: Arc<dyn Transport>,
        peer: Address,
        request: VoteRequest,
        rpc_timeout: Duration,
        callback: WeakActorClient,
        term: Term,
        delay: Option<Duration>,
    ) {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        slog::debug!(logger, "ClientWire - {:?}", request);
        let rpc_reply = tokio::time::timeout(rpc_timeout, transport.send(&peer, Request::Vote(request))).await;
        slog::debug!(logger, "ClientWire - {:?}", rpc_reply);

        let result = Self::convert_vote_rpc_reply(rpc_reply, rpc_timeout);
        let callback_input = RequestVoteReplyFromPeer { peer, term, result };
        if let Err(e) = callback.notify_request_vote_reply_from_peer(callback_input).await {
            slog::debug!(logger, "Dropping RequestVote reply: {}", e);
        }
    }

    fn convert_vote_rpc_reply(
        rpc_reply: Result<Result<Response, TransportError>, Elapsed>,
        rpc_timeout: Duration,
    ) -> Result<VoteOk, PeerCallError> {
        match rpc_reply {
            Ok(Ok(Response::Vote(result))) => result.map_err(PeerCallError::from),
            Ok(Ok(other)) => Err(PeerCallError::MalformedReply(format!(
                "Expected vote response, got {:?}",
                other
            ))),
            Ok(Err(e)) => Err(PeerCallError::from(e)),
            Err(_timeout) => Err(PeerCallError::Timeout(rpc_timeout)),
        }
    }

    // ------- Commit and apply --------

    pub(super) fn advance_leader_commit(&mut self) {
        let current_term = self.local_state.current_term();
        let tentative_new_commit_index = {
            let leader_state = match self.election_state.leader_state() {
                Some(ls) => ls,
                None => return,
            };
            if !self.membership.am_voter() {
                return;
            }

            let voting_peers = self.membership.voting_peers();
            if voting_peers.is_empty() {
                self.wal.latest_entry().map(|(_, index)| index)
            } else {
                // > If there exists an N such that N > commitIndex, a majority
                // > of matchIndex[i] ≥ N, and log[N].term == currentTerm:
                // > set commitIndex = N (§5.3, §5.4).
                let peers_matched_index = voting_peers
                    .iter()
                    .map(|peer| leader_state.peer_state(peer).and_then(|ps| ps.matched()))
                    .collect();
                Self::get_cluster_commit_index(peers_matched_index)
            }
        };

        if let Some(tentative_new_commit_index) = tentative_new_commit_index {
            match self
                .wal
                .ratchet_fwd_commit_index_if_valid(tentative_new_commit_index, current_term)
            {
                Ok(true) => self.apply_committed(),
                Ok(false) => {}
                Err(ioe) => slog::warn!(
                    self.logger,
                    "IO failure while confirming new commit index {:?}: {:?}",
                    tentative_new_commit_index,
                    ioe
                ),
            }
        }
    }

    fn get_cluster_commit_index(mut peers_matched_indexes: Vec<Option<Index>>) -> Option<Index> {
        if peers_matched_indexes.is_empty() {
            return None;
        }
        peers_matched_indexes.sort_by_key(|matched| match matched {
            None => 0u64,
            Some(m) => m.as_u64(),
        });

        // The leader's own log is the longest, so it sits past the tail of the sorted peers. With
        // `n` peers, the cluster has `n + 1` voters and a majority needs `n / 2` peers besides the
        // leader. When in doubt, read the unit tests.
        let quorum_idx = peers_matched_indexes.len() / 2;

        peers_matched_indexes.remove(quorum_idx)
    }

    /// > If commitIndex > lastApplied: increment lastApplied, apply
    /// > log[lastApplied] to state machine (§5.3)
    pub(super) fn apply_committed(&mut self) {
        let commit_index = self.wal.commit_index_u64();
        while self.executor.last_applied() < commit_index {
            let index = self.executor.last_applied() + 1;
            let entry = match self.wal.read_required(index) {
                Ok(entry) => entry,
                Err(e) => {
                    slog::error!(self.logger, "Failed to read committed entry {}: {:?}", index, e);
                    break;
                }
            };

            match self.executor.apply(index, entry) {
                Ok(applied) => self.handle_applied(index, applied),
                Err(e) => {
                    slog::crit!(self.logger, "State machine failed. Halting. {}", e);
                    self.halt();
                    return;
                }
            }
        }

        self.membership.commit(commit_index);
        self.resolve_reads();
        self.resolve_barriers();
        if self.election_state.is_leader() {
            self.pump_deliveries();
        }
    }

    fn handle_applied(&mut self, applied_index: u64, applied: Applied) {
        let context = self.reply_context();
        let is_leader = self.election_state.is_leader();

        for completion in applied.completions {
            match completion {
                Completion::SessionOpened {
                    index,
                    session_id,
                    timeout_ms,
                } => match self.pending.take_waiter(index) {
                    Some(Waiter::OpenSession(callback)) => {
                        callback.send(context.reply(Ok(OpenSessionOk { session_id, timeout_ms })))
                    }
                    other => self.fail_mismatched_waiter(index, other, &context),
                },
                Completion::KeptAlive { index, result } => match self.pending.take_waiter(index) {
                    Some(Waiter::KeepAlive(callback)) => callback.send(context.reply(result.map(|_| KeepAliveOk {}))),
                    other => self.fail_mismatched_waiter(index, other, &context),
                },
                Completion::SessionClosed {
                    index,
                    session_id,
                    result,
                } => {
                    if let Some(leader_state) = self.election_state.leader_state_mut() {
                        leader_state.expiring.remove(&session_id);
                    }
                    match self.pending.take_waiter(index) {
                        Some(Waiter::CloseSession(callback)) => {
                            callback.send(context.reply(result.map(|_| CloseSessionOk {})))
                        }
                        other => self.fail_mismatched_waiter(index, other, &context),
                    }
                }
                Completion::Command {
                    index,
                    result,
                    receivers,
                    ..
                } => match self.pending.take_waiter(index) {
                    Some(Waiter::Command(callback, consistency)) => {
                        if consistency == CommandConsistency::Linearizable
                            && result.is_ok()
                            && !receivers.is_empty()
                            && is_leader
                        {
                            self.pending.add_barrier(EventBarrier {
                                event_index: applied_index,
                                receivers,
                                result,
                                callback,
                            });
                        } else {
                            callback.send(context.reply(result));
                        }
                    }
                    other => self.fail_mismatched_waiter(index, other, &context),
                },
                Completion::Configured { index } => match self.pending.take_waiter(index) {
                    Some(Waiter::Join(callback)) => callback.send(context.reply(Ok(JoinOk {
                        configuration_index: index,
                    }))),
                    Some(Waiter::Leave(callback)) => callback.send(context.reply(Ok(LeaveOk {
                        configuration_index: index,
                    }))),
                    other => self.fail_mismatched_waiter(index, other, &context),
                },
            }
        }

        if let Some(leader_state) = self.election_state.leader_state_mut() {
            for session_id in applied.closed_sessions {
                leader_state.deliveries.remove(&session_id);
                leader_state.expiring.remove(&session_id);
            }
        }
    }

    fn fail_mismatched_waiter(&self, index: u64, waiter: Option<Waiter>, context: &ReplyContext) {
        if let Some(waiter) = waiter {
            slog::error!(self.logger, "Waiter at index {} doesn't match the applied entry", index);
            waiter.fail(
                context,
                ProtocolError::Internal(format!("Entry at index {} isn't the one requested", index)),
            );
        }
    }

    fn halt(&mut self) {
        let context = self.reply_context();
        self.election_state.halt();
        self.pending.fail_leader_bound(&context);
    }

    /// Discards log entries every member has applied and no longer needs.
    pub(super) fn compact_log(&mut self, global_index: u64) {
        let index = global_index
            .min(self.executor.low_water_mark())
            .min(self.executor.last_applied());
        if let Err(e) = self.wal.compact(index) {
            slog::warn!(self.logger, "Failed to compact log up to {}: {:?}", index, e);
        }
    }

    // ------- Leader timers --------

    pub(crate) fn handle_leader_timer(&mut self, tick: LeaderTimerTick) {
        let current_term = self.local_state.current_term();
        match tick {
            LeaderTimerTick::Heartbeat { peer, term } => {
                if current_term != term {
                    slog::debug!(
                        self.logger,
                        "Received leader heartbeat for outdated term {:?}, current term: {:?}",
                        term,
                        current_term
                    );
                    return;
                }
                self.send_append_entries(&peer);
            }
            LeaderTimerTick::Maintenance { term } => {
                if current_term != term {
                    return;
                }
                self.run_maintenance();
            }
        }
    }

    fn run_maintenance(&mut self) {
        let now = self.clock.now();
        let voting_peers = self.membership.voting_peers();
        let quorum = self.membership.current().quorum();
        let window = self.options.follower_max_timeout;

        let (has_quorum_contact, transfer_expired) = match self.election_state.leader_state() {
            Some(ls) => (
                ls.has_quorum_contact(&voting_peers, quorum, window, now),
                ls.transfer.as_ref().map_or(false, |transfer| now >= transfer.deadline),
            ),
            None => return,
        };

        // Followers that can't hear from us will elect someone else anyway.
        if !has_quorum_contact {
            slog::warn!(self.logger, "Lost contact with a quorum of voters. Stepping down.");
            self.step_down(None);
            return;
        }

        if transfer_expired {
            if let Some(leader_state) = self.election_state.leader_state_mut() {
                if let Some(transfer) = leader_state.transfer.take() {
                    slog::warn!(self.logger, "Leadership transfer to {:?} timed out", transfer.target);
                }
            }
        }

        self.expire_sessions();
        self.pump_deliveries();
        self.check_promotion();
        self.check_transfer();
        self.compact_log(self.global_index());
    }

    /// Index up to which every member may compact: nothing past what any member still needs.
    pub(super) fn global_index(&self) -> u64 {
        let mut global_index = self.executor.low_water_mark().min(self.executor.last_applied());
        if let Some(leader_state) = self.election_state.leader_state() {
            for (_, peer_state) in leader_state.peers_iter() {
                global_index = global_index.min(peer_state.low_water().min(peer_state.matched_u64()));
            }
        }
        global_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorClient, Callback};
    use crate::commitlog::InMemoryLog;
    use crate::executor::{Commit, StateMachine, StateMachineExecutor};
    use crate::protocol::{
        AppendRequest, CommandRequest, OpenSessionRequest, Operation, QueryConsistency, QueryRequest, SessionId,
        WireEntry,
    };
    use crate::replica::{create_replica, ElectionStateSnapshot};
    use crate::transport::LocalRegistry;
    use bytes::Bytes;

    type Repl = Replica<InMemoryLog<LogEntry>>;

    fn opt_index(v: u64) -> Option<Index> {
        Index::from_u64(v)
    }

    #[test]
    fn test_commit_checker_logic() {
        fn run(expected: u64, matches: Vec<u64>) {
            let matches = matches.into_iter().map(opt_index).collect();

            let expected = opt_index(expected);

            assert_eq!(expected, Repl::get_cluster_commit_index(matches));
        }

        // No peers is decided by the caller
        assert_eq!(None, Repl::get_cluster_commit_index(vec![]));

        // 2-cluster
        run(0, vec![0]);
        run(9, vec![9]);

        // 3-cluster
        run(0, vec![0, 0]);
        run(9, vec![0, 9]);
        run(9, vec![8, 9]);

        // 4-cluster
        run(0, vec![0, 0, 0]);
        run(0, vec![0, 0, 9]);
        run(8, vec![0, 8, 9]);
        run(8, vec![7, 8, 9]);

        // 5-cluster
        run(0, vec![0, 0, 0, 0]);
        run(0, vec![0, 0, 0, 9]);
        run(8, vec![0, 0, 8, 9]);
        run(8, vec![0, 7, 8, 9]);
        run(8, vec![6, 7, 8, 9]);

        // 6-cluster
        run(0, vec![0, 0, 0, 0, 0]);
        run(0, vec![0, 0, 0, 0, 9]);
        run(0, vec![0, 0, 0, 8, 9]);
        run(7, vec![0, 0, 7, 8, 9]);
        run(7, vec![0, 6, 7, 8, 9]);
        run(7, vec![5, 6, 7, 8, 9]);

        // 7-cluster
        run(0, vec![0, 0, 0, 0, 0, 0]);
        run(0, vec![0, 0, 0, 0, 0, 9]);
        run(0, vec![0, 0, 0, 0, 8, 9]);
        run(7, vec![0, 0, 0, 7, 8, 9]);
        run(7, vec![0, 0, 6, 7, 8, 9]);
        run(7, vec![0, 5, 6, 7, 8, 9]);
        run(7, vec![4, 5, 6, 7, 8, 9]);

        // Ordering doesn't matter
        run(9, vec![9, 8]);
        run(8, vec![7, 9, 8]);
        run(8, vec![6, 0, 8, 9]);
        run(7, vec![9, 8, 0, 0, 7]);
    }

    #[derive(Default)]
    struct Counter {
        value: u64,
    }

    impl StateMachine for Counter {
        fn configure(&mut self, executor: &mut StateMachineExecutor<Self>) {
            executor.register("add", |counter: &mut Counter, commit: Commit| {
                counter.value += commit.payload().len() as u64;
                commit.clean();
                Ok(Bytes::from(counter.value.to_string()))
            });
            executor.register_query("get", |counter: &Counter, _: Commit| Ok(Bytes::from(counter.value.to_string())));
        }
    }

    fn options() -> ReplicaOptions {
        ReplicaOptions {
            leader_heartbeat_duration: Duration::from_secs(10),
            follower_min_timeout: Duration::from_secs(60),
            follower_max_timeout: Duration::from_secs(60),
            append_entries_timeout: Duration::from_secs(1),
            session_timeout: Duration::from_secs(5),
            lease_duration: Duration::from_secs(1),
            max_entries_per_append: 64,
            publish_timeout: Duration::from_secs(1),
        }
    }

    fn single_node(actor: &ActorClient) -> Repl {
        member_of(actor, vec![])
    }

    fn member_of(actor: &ActorClient, members: Vec<Address>) -> Repl {
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let (replica, _listener) = create_replica(
            logger,
            Address::new("solo"),
            members,
            false,
            InMemoryLog::create().unwrap(),
            Counter::default(),
            Arc::new(LocalRegistry::new().transport()),
            actor.weak(),
            options(),
        )
        .unwrap();
        replica
    }

    #[tokio::test]
    async fn lone_member_elects_itself_and_commits_alone() {
        let (actor, _rx) = ActorClient::new(10);
        let mut replica = single_node(&actor);
        assert_eq!(replica.status().role, ElectionStateSnapshot::FollowerNoLeader);

        replica.handle_follower_timeout();
        let status = replica.status();
        assert_eq!(status.role, ElectionStateSnapshot::Leader);
        assert_eq!(status.term, 1);
        assert_eq!(status.commit_index, 1);
        assert_eq!(status.applied_index, 1);

        let (callback, mut rx) = Callback::new();
        replica.handle_open_session(
            OpenSessionRequest {
                client_id: "c".into(),
                client_address: None,
            },
            callback,
        );
        let opened = rx.try_recv().unwrap().outcome.unwrap();
        assert_eq!(opened.session_id, SessionId::new(2));
        assert_eq!(opened.timeout_ms, 5000);

        let (callback, mut rx) = Callback::new();
        replica.handle_command(
            CommandRequest {
                session_id: opened.session_id,
                sequence: 1,
                operation: Operation::new("add", "xyz"),
                consistency: CommandConsistency::Sequential,
            },
            callback,
        );
        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.leader, Some(Address::new("solo")));
        assert_eq!(reply.outcome.unwrap().output, Bytes::from("3"));

        // A retry of the same sequence is answered from the session's cache.
        let (callback, mut rx) = Callback::new();
        replica.handle_command(
            CommandRequest {
                session_id: opened.session_id,
                sequence: 1,
                operation: Operation::new("add", "xyz"),
                consistency: CommandConsistency::Sequential,
            },
            callback,
        );
        assert_eq!(rx.try_recv().unwrap().outcome.unwrap().output, Bytes::from("3"));
        assert_eq!(replica.status().last_log_index, 3);

        let (callback, mut rx) = Callback::new();
        replica.handle_query(
            QueryRequest {
                session_id: opened.session_id,
                sequence: 1,
                index: 3,
                operation: Operation::new("get", Bytes::new()),
                consistency: QueryConsistency::Linearizable,
            },
            callback,
        );
        let queried = rx.try_recv().unwrap().outcome.unwrap();
        assert_eq!(queried.output, Bytes::from("3"));
        assert_eq!(queried.index, 3);

        assert_eq!(replica.log_digest().unwrap(), vec![(1, 1), (2, 1), (3, 1)]);
    }

    #[tokio::test]
    async fn follower_redirects_and_rejects_unknown_candidates() {
        let (actor, _rx) = ActorClient::new(10);
        let mut replica = single_node(&actor);

        let (callback, mut rx) = Callback::new();
        replica.handle_open_session(
            OpenSessionRequest {
                client_id: "c".into(),
                client_address: None,
            },
            callback,
        );
        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.outcome.unwrap_err(), ProtocolError::NotLeader);
        assert_eq!(reply.members, vec![Address::new("solo")]);

        let vote = replica.server_handle_request_vote(VoteRequest {
            term: 5,
            candidate: Address::new("stranger"),
            last_log_index: 10,
            last_log_term: 4,
        });
        assert!(matches!(vote, Err(PeerError::NotInCluster)));
        assert_eq!(replica.status().term, 0);
    }

    #[tokio::test]
    async fn votes_go_once_per_term_to_up_to_date_candidates() {
        let (actor, _rx) = ActorClient::new(10);
        let members = vec![Address::new("solo"), Address::new("a"), Address::new("b")];
        let mut replica = member_of(&actor, members);

        // Our log ends at index 3, term 2.
        let noop = WireEntry {
            term: 2,
            data: Bytes::from(Vec::<u8>::from(LogEntry::new(Term::new(2), 0, EntryKind::NoOp))),
        };
        replica
            .server_handle_append_entries(AppendRequest {
                term: 2,
                leader: Address::new("a"),
                previous_log_index: 0,
                previous_log_term: 0,
                previous_is_base: false,
                entries: vec![noop.clone(), noop.clone(), noop],
                commit_index: 0,
                global_index: 0,
            })
            .unwrap();

        // (candidate, term, last log index, last log term, granted). None means a stale term.
        let cases: Vec<(&str, u64, u64, u64, Option<bool>)> = vec![
            ("b", 3, 9, 1, Some(false)), // older last term, however long
            ("b", 3, 2, 2, Some(false)), // same last term, shorter log
            ("b", 3, 3, 2, Some(true)),
            ("a", 3, 5, 2, Some(false)), // already voted for b in term 3
            ("b", 3, 3, 2, Some(true)),  // asking again is fine
            ("a", 2, 5, 2, None),
            ("a", 4, 1, 3, Some(true)), // newer last term wins over a longer log
        ];
        for (candidate, term, last_log_index, last_log_term, expected) in cases {
            let vote = replica.server_handle_request_vote(VoteRequest {
                term,
                candidate: Address::new(candidate),
                last_log_index,
                last_log_term,
            });
            match expected {
                Some(granted) => assert_eq!(
                    vote.unwrap().vote_granted,
                    granted,
                    "{} in term {} with log ({}, {})",
                    candidate,
                    term,
                    last_log_index,
                    last_log_term
                ),
                None => assert!(matches!(vote, Err(PeerError::StaleTerm { current_term: 3 }))),
            }
        }
        assert_eq!(replica.status().term, 4);
    }
}
