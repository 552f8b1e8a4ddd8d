use crate::actor::WeakActorClient;
use crate::commitlog::{index_as_u64, Index, Log};
use crate::protocol::{
    AppendOk, AppendRequest, PeerError, Request, Response, TimeoutNowOk, TimeoutNowRequest, WireEntry,
};
use crate::replica::election::{Clock, Participation, PeerStateUpdate};
use crate::replica::local_state::Term;
use crate::replica::replica::Replica;
use crate::replica::{
    AppendEntriesReplyFromPeer, AppendEntriesReplyFromPeerDescriptor, EntryKind, LogEntry, PeerCallError,
};
use crate::transport::{Address, Transport, TransportError};
use bytes::Bytes;
use std::convert::TryFrom;
use std::io;
use std::sync::Arc;
use tokio::time::error::Elapsed;
use tokio::time::Duration;

enum HandleLeaderTimerError {
    NoLongerLeader,
    PeerConcurrencyThrottle,
    DiskRead(u64, io::Error),
    UnexpectedMissingLogEntry(u64),
    LeaderStateMissingPeer { leader_state_tracker_peers: Vec<Address> },
}

fn server_fault<E: std::fmt::Debug>(e: E) -> PeerError {
    PeerError::ServerFault(format!("{:?}", e))
}

impl<L> Replica<L>
where
    L: Log<LogEntry>,
{
    pub(crate) fn server_handle_append_entries(&mut self, request: AppendRequest) -> Result<AppendOk, PeerError> {
        // 1. Reply false if term < currentTerm (§5.1)
        let current_term = self.local_state.current_term();
        let leader_term = Term::new(request.term);
        if leader_term < current_term {
            return Err(PeerError::StaleTerm {
                current_term: current_term.as_u64(),
            });
        }

        if self.local_state.store_term_if_increased(leader_term) || self.election_state.is_candidate() {
            self.step_down(Some(request.leader.clone()));
        } else if self.election_state.is_leader() {
            slog::error!(
                self.logger,
                "Received AppendEntries from {:?} while leader of the same term {:?}",
                request.leader,
                leader_term
            );
            return Err(PeerError::ServerFault("Two leaders in one term".into()));
        } else {
            self.election_state.set_leader_if_unknown(&request.leader);
        }

        // Reset follower timeout.
        self.election_state.reset_timeout_if_follower();

        // 2. Reply false if [my] log doesn't contain an entry at [leader's]
        // prevLogIndex whose term matches [leader's] prevLogTerm (§5.3)
        let previous_index = request.previous_log_index;
        let previous_term = Term::new(request.previous_log_term);
        if previous_index > self.wal.base_index() {
            let my_previous_term = self.wal.term_at(previous_index).map_err(server_fault)?;
            if my_previous_term != Some(previous_term) {
                if !request.previous_is_base {
                    return Err(PeerError::MissingPreviousEntry {
                        last_log_index: self.wal.last_index(),
                    });
                }
                // The leader compacted the entries we're missing, so start over from its base.
                self.adopt_base(previous_term, previous_index).map_err(server_fault)?;
            }
        }

        // 3. If [my] existing entry conflicts with [leader's new entries]
        // (same index but different terms), delete [my] existing entry and
        // all that follow it (§5.3)
        // 4. Append any new entries not already in the log
        let mut index = previous_index;
        for wire_entry in request.entries.iter() {
            index += 1;
            if index <= self.wal.base_index() {
                continue;
            }

            // 3. (if...)
            match self.wal.term_at(index).map_err(server_fault)? {
                // 4. (no-op)
                Some(term) if term.as_u64() == wire_entry.term => continue,
                // 3. (delete)
                Some(_) => self.truncate_log(index).map_err(server_fault)?,
                None => {}
            }

            // 4. (append)
            let entry = LogEntry::try_from(wire_entry.data.to_vec()).map_err(server_fault)?;
            if entry.term.as_u64() != wire_entry.term {
                return Err(PeerError::ServerFault(format!(
                    "Entry {} has term {:?} but was sent as term {}",
                    index, entry.term, wire_entry.term
                )));
            }
            if let EntryKind::Configuration { members } = &entry.kind {
                self.membership.append(index, members.clone());
                self.refresh_participation();
            }
            self.last_timestamp = self.last_timestamp.max(entry.timestamp);

            let appended_index = self.wal.append(entry).map_err(server_fault)?;
            if appended_index.as_u64() != index {
                return Err(PeerError::ServerFault(format!(
                    "Appended log entry to unexpected index {:?}, expected {}",
                    appended_index, index
                )));
            }
        }
        self.wal.flush().map_err(server_fault)?;

        // 5. If leaderCommit > commitIndex, set commitIndex = min(leaderCommit, index of last new entry)
        let index_of_last_new_entry = previous_index + request.entries.len() as u64;
        if let Some(new_commit_index) = Index::from_u64(request.commit_index.min(index_of_last_new_entry)) {
            self.wal.ratchet_fwd_commit_index_if_changed(new_commit_index);
        }

        self.apply_committed();
        if self.is_halted() {
            return Err(PeerError::ServerFault("State machine failed. Replica halted.".into()));
        }
        self.compact_log(request.global_index);

        Ok(AppendOk {
            last_log_index: index_of_last_new_entry,
            low_water_index: self.executor.low_water_mark(),
        })
    }

    fn truncate_log(&mut self, index: u64) -> Result<(), io::Error> {
        slog::info!(self.logger, "Truncating conflicting log entries from {}", index);
        self.wal.truncate(Index::new(index))?;
        if self.membership.truncate(index) {
            slog::info!(self.logger, "Reverted configuration to {:?}", self.membership.current());
        }
        let context = self.reply_context();
        self.pending.fail_from(index, &context);
        Ok(())
    }

    fn adopt_base(&mut self, term: Term, index: u64) -> Result<(), io::Error> {
        slog::info!(self.logger, "Log is behind leader's compaction point {}. Adopting it.", index);
        self.wal.reset_to_base(term, index)?;
        self.executor.skip_to(index);
        self.membership.truncate(index + 1);
        let context = self.reply_context();
        self.pending.fail_from(0, &context);
        Ok(())
    }

    /// A joining member becomes a full participant once a configuration makes it a voter.
    pub(super) fn refresh_participation(&mut self) {
        if self.election_state.participation() == Participation::Joining && self.membership.am_voter() {
            slog::info!(self.logger, "Promoted to voting member");
            self.election_state.set_participation(Participation::Active);
        }
    }

    pub(super) fn replicate_to_all(&mut self) {
        let peers = match self.election_state.leader_state() {
            Some(leader_state) => leader_state.peer_addresses(),
            None => return,
        };
        for peer in peers {
            self.send_append_entries(&peer);
        }
    }

    pub(super) fn send_append_entries(&mut self, peer: &Address) {
        match self.try_send_append_entries(peer) {
            Ok(_) => {}
            Err(HandleLeaderTimerError::NoLongerLeader) => {
                slog::info!(self.logger, "Received leader timer event but no longer leader.")
            }
            Err(HandleLeaderTimerError::PeerConcurrencyThrottle) => {
                slog::debug!(self.logger, "Outstanding request to peer {:?}, not sending another", peer)
            }
            Err(HandleLeaderTimerError::DiskRead(index, ioe)) => {
                slog::error!(self.logger, "Failed to read log entry at index {:?}: {:?}", index, ioe);
            }
            Err(HandleLeaderTimerError::UnexpectedMissingLogEntry(index)) => {
                slog::error!(
                    self.logger,
                    "LeaderStateTracker is tracking index {:?}, but entry is missing from log.",
                    index
                );
            }
            Err(HandleLeaderTimerError::LeaderStateMissingPeer {
                leader_state_tracker_peers,
            }) => {
                slog::warn!(
                    self.logger,
                    "Peer {:?} is missing in LeaderStateTracker. LeaderStateTracker peers: [{:?}]",
                    peer,
                    leader_state_tracker_peers,
                )
            }
        }
    }

    fn try_send_append_entries(&mut self, peer: &Address) -> Result<(), HandleLeaderTimerError> {
        let current_term = self.local_state.current_term();
        let base_index = self.wal.base_index();
        let commit_index = self.wal.commit_index_u64();
        let global_index = self.global_index();
        let now = self.clock.now();

        let leader_state = match self.election_state.leader_state_mut() {
            Some(ls) => ls,
            None => return Err(HandleLeaderTimerError::NoLongerLeader),
        };
        let round = leader_state.round();
        let peer_state = match leader_state.peer_state_mut(peer) {
            Some(ps) => ps,
            None => {
                return Err(HandleLeaderTimerError::LeaderStateMissingPeer {
                    leader_state_tracker_peers: leader_state.peer_addresses(),
                })
            }
        };

        // Simplicity vs throughput tradeoff. We're just going to allow 1 outstanding request per
        // peer; no pipelining. Entries are batched instead.
        if peer_state.has_outstanding_request() {
            return Err(HandleLeaderTimerError::PeerConcurrencyThrottle);
        }

        // Entries below the base are gone. The peer gets the base as its previous entry.
        peer_state.skip_to_base(base_index);
        let (next_index, previous_index) = peer_state.next_and_previous_log_index();
        let previous_log_index = index_as_u64(previous_index);
        let previous_log_term = match self.wal.term_at(previous_log_index) {
            Ok(Some(term)) => term,
            Ok(None) => return Err(HandleLeaderTimerError::UnexpectedMissingLogEntry(previous_log_index)),
            Err(e) => return Err(HandleLeaderTimerError::DiskRead(previous_log_index, e)),
        };
        let entries = self
            .wal
            .read_from(next_index.as_u64(), self.options.max_entries_per_append)
            .map_err(|e| HandleLeaderTimerError::DiskRead(next_index.as_u64(), e))?;

        let seq_no = peer_state.next_seq_no();
        let descriptor = AppendEntriesReplyFromPeerDescriptor {
            peer: peer.clone(),
            term: current_term,
            seq_no,
            sent_at: now,
            round,
            previous_log_index,
            num_log_entries: entries.len(),
        };
        let request = AppendRequest {
            term: current_term.as_u64(),
            leader: self.my_address.clone(),
            previous_log_index,
            previous_log_term: previous_log_term.as_u64(),
            previous_is_base: base_index > 0 && previous_log_index == base_index,
            entries: entries
                .into_iter()
                .map(|entry| WireEntry {
                    term: entry.term.as_u64(),
                    data: Bytes::from(Vec::<u8>::from(entry)),
                })
                .collect(),
            commit_index,
            global_index,
        };

        tokio::task::spawn(Self::call_peer_append_entries(
            self.logger.clone(),
            self.transport.clone(),
            peer.clone(),
            request,
            self.options.append_entries_timeout,
            self.actor_client.clone(),
            descriptor,
        ));

        peer_state.reset_heartbeat_timer();

        Ok(())
    }

    async fn call_peer_append_entries(
        logger: slog::Logger,
        transport: Arc<dyn Transport>,
        peer: Address,
        request: AppendRequest,
        rpc_timeout: Duration,
        callback: WeakActorClient,
        descriptor: AppendEntriesReplyFromPeerDescriptor,
    ) {
        slog::trace!(
            logger,
            "ClientWire - AppendEntries(prev={}, entries={}) to {:?}",
            request.previous_log_index,
            request.entries.len(),
            peer
        );
        let rpc_reply = tokio::time::timeout(rpc_timeout, transport.send(&peer, Request::Append(request))).await;
        slog::trace!(logger, "ClientWire - {:?}", rpc_reply);

        let callback_input = AppendEntriesReplyFromPeer {
            descriptor,
            result: Self::convert_append_entries_rpc_reply(rpc_reply, rpc_timeout),
        };

        if let Err(e) = callback.notify_append_entries_reply_from_peer(callback_input).await {
            slog::debug!(logger, "Dropping AppendEntries reply: {}", e);
        }
    }

    fn convert_append_entries_rpc_reply(
        rpc_reply: Result<Result<Response, TransportError>, Elapsed>,
        rpc_timeout: Duration,
    ) -> Result<AppendOk, PeerCallError> {
        match rpc_reply {
            Ok(Ok(Response::Append(result))) => result.map_err(PeerCallError::from),
            Ok(Ok(other)) => Err(PeerCallError::MalformedReply(format!(
                "Expected append response, got {:?}",
                other
            ))),
            Ok(Err(e)) => Err(PeerCallError::from(e)),
            Err(_timeout) => Err(PeerCallError::Timeout(rpc_timeout)),
        }
    }

    pub(crate) fn handle_append_entries_reply_from_peer(&mut self, reply: AppendEntriesReplyFromPeer) {
        let descriptor = reply.descriptor;
        let logger = self
            .logger
            .new(slog::o!("Peer" => descriptor.peer.to_string(), "SeqNo" => descriptor.seq_no));
        slog::trace!(logger, "AE reply from peer result: {:?}", reply.result);

        let current_term = self.local_state.current_term();
        if current_term != descriptor.term {
            slog::debug!(
                logger,
                "Received AE reply for outdated term {:?}, but we're on term {:?}",
                descriptor.term,
                current_term
            );
            return;
        }

        // Anything but a transport failure means the peer is alive.
        let replied = matches!(&reply.result, Ok(_) | Err(PeerCallError::Rejected(_)));

        // 1. Check for stale term rejection
        let peer_log_update = match reply.result {
            Ok(ok) => PeerStateUpdate::Success {
                matched_index: ok.last_log_index,
                low_water: ok.low_water_index,
                sent_at: descriptor.sent_at,
                round: descriptor.round,
            },
            Err(PeerCallError::Rejected(PeerError::StaleTerm { current_term })) => {
                slog::warn!(logger, "Rejected by peer because my term is stale.");
                if self.observe_term(Term::new(current_term), None) {
                    return;
                }
                slog::warn!(logger, "Treating non-incrementing StaleTerm err as generic failure.");
                PeerStateUpdate::OtherError
            }
            Err(PeerCallError::Rejected(PeerError::MissingPreviousEntry { last_log_index })) => {
                slog::debug!(logger, "Peer is missing previous log entry, its log ends at {}", last_log_index);
                PeerStateUpdate::PeerLogBehind { last_log_index }
            }
            Err(e) => {
                slog::debug!(logger, "AE failure: {}", e);
                PeerStateUpdate::OtherError
            }
        };

        // 2. Update peer log tracker
        let now = self.clock.now();
        let last_log_index = self.wal.last_index();
        let do_immediate_call = match self.election_state.leader_state_mut() {
            None => {
                slog::info!(logger, "No longer leader");
                return;
            }
            Some(leader_state) => {
                let round = leader_state.round();
                let peer_state = match leader_state.peer_state_mut(&descriptor.peer) {
                    None => {
                        slog::debug!(logger, "Peer not found while handling AE reply");
                        return;
                    }
                    Some(peer_state) => peer_state,
                };
                if replied {
                    peer_state.record_contact(now);
                }

                let (next_before, _) = peer_state.next_and_previous_log_index();
                let behind = matches!(peer_log_update, PeerStateUpdate::PeerLogBehind { .. });
                let succeeded = matches!(peer_log_update, PeerStateUpdate::Success { .. });
                peer_state.handle_append_entries_result(&logger, descriptor.seq_no, peer_log_update);
                let (next_index, _) = peer_state.next_and_previous_log_index();

                // > If last log index ≥ nextIndex for a follower: send
                // > AppendEntries RPC with log entries starting at nextIndex
                (succeeded && (next_index.as_u64() <= last_log_index || peer_state.acked_round() < round))
                    || (behind && next_index != next_before)
            }
        };

        // 3. Check for majority replication and apply new commits.
        self.advance_leader_commit();
        self.resolve_reads();
        self.resolve_barriers();
        self.check_transfer();
        self.check_promotion();

        // 4. Send the next batch right away rather than on the next heartbeat.
        if do_immediate_call {
            self.send_append_entries(&descriptor.peer);
        }
    }

    pub(crate) fn server_handle_timeout_now(&mut self, request: TimeoutNowRequest) -> Result<TimeoutNowOk, PeerError> {
        let current_term = self.local_state.current_term();
        if Term::new(request.term) < current_term {
            return Err(PeerError::StaleTerm {
                current_term: current_term.as_u64(),
            });
        }
        if self.is_halted() {
            return Err(PeerError::ServerFault("Replica halted".into()));
        }
        if !self.membership.am_voter() || self.election_state.participation() == Participation::Leaving {
            return Err(PeerError::NotInCluster);
        }

        slog::info!(self.logger, "Leader {:?} is handing over leadership. Starting election.", request.leader);
        self.observe_term(Term::new(request.term), None);
        self.start_election();
        Ok(TimeoutNowOk {})
    }

    pub(super) async fn call_peer_timeout_now(
        logger: slog::Logger,
        transport: Arc<dyn Transport>,
        peer: Address,
        request: TimeoutNowRequest,
        rpc_timeout: Duration,
    ) {
        let rpc_reply = tokio::time::timeout(rpc_timeout, transport.send(&peer, Request::TimeoutNow(request))).await;
        match rpc_reply {
            Ok(Ok(Response::TimeoutNow(Ok(_)))) => slog::info!(logger, "{:?} accepted leadership transfer", peer),
            Ok(Ok(other)) => slog::warn!(logger, "Leadership transfer to {:?} failed: {:?}", peer, other),
            Ok(Err(e)) => slog::warn!(logger, "Leadership transfer to {:?} failed: {}", peer, e),
            Err(_timeout) => slog::warn!(logger, "Leadership transfer to {:?} timed out", peer),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::actor::ActorClient;
    use crate::commitlog::InMemoryLog;
    use crate::executor::{Commit, HandlerError, StateMachine, StateMachineExecutor};
    use crate::protocol::{AppendRequest, CommandConsistency, Operation, PeerError, SessionId, WireEntry};
    use crate::replica::local_state::Term;
    use crate::replica::{create_replica, ElectionStateSnapshot, EntryKind, LogEntry, Member, Replica, ReplicaOptions};
    use crate::transport::{Address, LocalRegistry};
    use bytes::Bytes;
    use std::sync::Arc;
    use tokio::time::Duration;

    struct Nothing;

    impl StateMachine for Nothing {
        fn configure(&mut self, executor: &mut StateMachineExecutor<Self>) {
            executor.register("noop", |_: &mut Nothing, commit: Commit| {
                commit.clean();
                Ok(Bytes::new())
            });
            executor.register("explode", |_: &mut Nothing, _: Commit| {
                Err(HandlerError::Fatal("boom".into()))
            });
        }
    }

    fn follower(actor: &ActorClient, joining: bool) -> Replica<InMemoryLog<LogEntry>> {
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let options = ReplicaOptions {
            leader_heartbeat_duration: Duration::from_secs(10),
            follower_min_timeout: Duration::from_secs(60),
            follower_max_timeout: Duration::from_secs(60),
            append_entries_timeout: Duration::from_secs(1),
            session_timeout: Duration::from_secs(5),
            lease_duration: Duration::from_secs(1),
            max_entries_per_append: 64,
            publish_timeout: Duration::from_secs(1),
        };
        let (replica, _listener) = create_replica(
            logger,
            Address::new("f"),
            vec![Address::new("leader"), Address::new("f")],
            joining,
            InMemoryLog::create().unwrap(),
            Nothing,
            Arc::new(LocalRegistry::new().transport()),
            actor.weak(),
            options,
        )
        .unwrap();
        replica
    }

    fn wire(term: u64, kind: EntryKind) -> WireEntry {
        WireEntry {
            term,
            data: Bytes::from(Vec::<u8>::from(LogEntry::new(Term::new(term), 0, kind))),
        }
    }

    fn append(term: u64, previous: (u64, u64), entries: Vec<WireEntry>, commit_index: u64) -> AppendRequest {
        AppendRequest {
            term,
            leader: Address::new("leader"),
            previous_log_index: previous.0,
            previous_log_term: previous.1,
            previous_is_base: false,
            entries,
            commit_index,
            global_index: 0,
        }
    }

    #[tokio::test]
    async fn follower_appends_commits_and_truncates_conflicts() {
        let (actor, _rx) = ActorClient::new(10);
        let mut replica = follower(&actor, false);

        let ok = replica
            .server_handle_append_entries(append(
                1,
                (0, 0),
                vec![wire(1, EntryKind::NoOp), wire(1, EntryKind::NoOp), wire(1, EntryKind::NoOp)],
                1,
            ))
            .unwrap();
        assert_eq!(ok.last_log_index, 3);
        assert_eq!(replica.status().commit_index, 1);
        assert_eq!(replica.status().applied_index, 1);
        assert_eq!(replica.status().term, 1);

        // Gap after the end of the log.
        let err = replica
            .server_handle_append_entries(append(1, (7, 1), vec![], 1))
            .unwrap_err();
        assert!(matches!(err, PeerError::MissingPreviousEntry { last_log_index: 3 }));

        // A new leader overwrites the uncommitted tail.
        let ok = replica
            .server_handle_append_entries(append(2, (1, 1), vec![wire(2, EntryKind::NoOp)], 2))
            .unwrap();
        assert_eq!(ok.last_log_index, 2);
        let status = replica.status();
        assert_eq!(status.last_log_index, 2);
        assert_eq!(status.commit_index, 2);
        assert_eq!(replica.log_digest().unwrap(), vec![(1, 1), (2, 2)]);

        // Stale leaders are told the current term.
        let err = replica
            .server_handle_append_entries(append(1, (2, 2), vec![], 2))
            .unwrap_err();
        assert!(matches!(err, PeerError::StaleTerm { current_term: 2 }));
    }

    #[tokio::test]
    async fn joining_follower_adopts_leader_base_and_gets_promoted() {
        let (actor, _rx) = ActorClient::new(10);
        let mut replica = follower(&actor, true);
        assert_eq!(replica.status().members.len(), 1);

        let mut request = append(
            3,
            (40, 2),
            vec![wire(
                3,
                EntryKind::Configuration {
                    members: vec![
                        Member {
                            address: Address::new("leader"),
                            active: true,
                        },
                        Member {
                            address: Address::new("f"),
                            active: true,
                        },
                    ],
                },
            )],
            41,
        );
        request.previous_is_base = true;

        let ok = replica.server_handle_append_entries(request).unwrap();
        assert_eq!(ok.last_log_index, 41);

        let status = replica.status();
        assert_eq!(status.first_log_index, 41);
        assert_eq!(status.applied_index, 41);
        assert_eq!(status.members.len(), 2);
        assert_eq!(
            status.role,
            ElectionStateSnapshot::Follower(Address::new("leader"))
        );
    }

    #[tokio::test]
    async fn failed_handler_halts_follower_without_acknowledging() {
        let (actor, _rx) = ActorClient::new(10);
        let mut replica = follower(&actor, false);

        let register = EntryKind::Register {
            client_id: "c".into(),
            client_address: None,
            timeout_ms: 5000,
        };
        let command = EntryKind::Command {
            session_id: SessionId::new(2),
            sequence: 1,
            operation: Operation::new("explode", Bytes::new()),
            consistency: CommandConsistency::Sequential,
        };
        let err = replica
            .server_handle_append_entries(append(
                1,
                (0, 0),
                vec![wire(1, EntryKind::NoOp), wire(1, register), wire(1, command)],
                3,
            ))
            .unwrap_err();
        assert!(matches!(err, PeerError::ServerFault(_)));

        let status = replica.status();
        assert_eq!(status.commit_index, 3);
        assert_eq!(status.applied_index, 2);
        assert_eq!(status.role, ElectionStateSnapshot::Halted);
        assert!(replica.is_halted());
    }
}
