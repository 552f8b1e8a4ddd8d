use crate::actor::{Callback, WeakActorClient};
use crate::commitlog::Log;
use crate::protocol::{
    CloseSessionOk, CloseSessionRequest, CommandConsistency, CommandOk, CommandRequest, KeepAliveOk, KeepAliveRequest,
    OpenSessionOk, OpenSessionRequest, ProtocolError, PublishRequest, QueryConsistency, QueryOk, QueryRequest, Reply,
    Request, Response, SessionId,
};
use crate::replica::election::{Clock, Participation};
use crate::replica::local_state::Term;
use crate::replica::pending::{PendingRead, ReadWait, Waiter};
use crate::replica::replica::Replica;
use crate::replica::{EntryKind, LogEntry, PublishReplyFromClient};
use crate::transport::{Address, Transport};
use std::sync::Arc;
use tokio::time::Duration;

impl<L> Replica<L>
where
    L: Log<LogEntry>,
{
    /// Leader that isn't handing over leadership.
    fn check_leader(&self) -> Result<(), ProtocolError> {
        match self.election_state.leader_state() {
            Some(leader_state) if leader_state.transfer.is_none() => Ok(()),
            _ => Err(ProtocolError::NotLeader),
        }
    }

    /// Whether the leader applied everything committed by earlier leaders, so that its session
    /// table is current.
    pub(super) fn leader_caught_up(&self) -> bool {
        self.election_state
            .leader_state()
            .map_or(false, |ls| ls.noop_index() > 0 && ls.noop_index() <= self.executor.last_applied())
    }

    /// Only a caught up leader can tell an unknown session from one it hasn't applied yet.
    fn check_session(&self, session_id: SessionId) -> Result<(), ProtocolError> {
        if self.leader_caught_up() && !self.executor.has_session(session_id) {
            return Err(ProtocolError::UnknownSession);
        }
        Ok(())
    }

    pub(crate) fn handle_open_session(&mut self, request: OpenSessionRequest, callback: Callback<Reply<OpenSessionOk>>) {
        if let Err(e) = self.check_leader() {
            callback.send(self.reply(Err(e)));
            return;
        }

        let kind = EntryKind::Register {
            client_id: request.client_id,
            client_address: request.client_address,
            timeout_ms: self.options.session_timeout.as_millis() as u64,
        };
        self.propose(kind, Some(Waiter::OpenSession(callback)));
    }

    pub(crate) fn handle_keep_alive(&mut self, request: KeepAliveRequest, callback: Callback<Reply<KeepAliveOk>>) {
        if let Err(e) = self
            .check_leader()
            .and_then(|_| self.check_session(request.session_id))
        {
            callback.send(self.reply(Err(e)));
            return;
        }

        // The acknowledgement counts for event barriers right away, without waiting for the commit.
        if self.executor.has_session(request.session_id) {
            if let Some(leader_state) = self.election_state.leader_state_mut() {
                let delivery = leader_state.deliveries.entry(request.session_id).or_default();
                delivery.acked = delivery.acked.max(request.event_index);
            }
            self.resolve_barriers();
        }

        let kind = EntryKind::KeepAlive {
            session_id: request.session_id,
            command_sequence: request.command_sequence,
            event_index: request.event_index,
        };
        self.propose(kind, Some(Waiter::KeepAlive(callback)));
    }

    pub(crate) fn handle_command(&mut self, mut request: CommandRequest, callback: Callback<Reply<CommandOk>>) {
        if let Err(e) = self
            .check_leader()
            .and_then(|_| self.check_session(request.session_id))
        {
            callback.send(self.reply(Err(e)));
            return;
        }

        // Unsequenced commands are neither ordered nor deduplicated.
        if request.consistency == CommandConsistency::None {
            request.sequence = 0;
        }

        if let Some(cached) = self.executor.cached_response(request.session_id, request.sequence) {
            slog::debug!(
                self.logger,
                "Command {} of session {:?} was already applied",
                request.sequence,
                request.session_id
            );
            callback.send(self.reply(cached));
            return;
        }

        let consistency = request.consistency;
        let kind = EntryKind::Command {
            session_id: request.session_id,
            sequence: request.sequence,
            operation: request.operation,
            consistency,
        };
        self.propose(kind, Some(Waiter::Command(callback, consistency)));
    }

    pub(crate) fn handle_close_session(
        &mut self,
        request: CloseSessionRequest,
        callback: Callback<Reply<CloseSessionOk>>,
    ) {
        if let Err(e) = self.check_leader() {
            callback.send(self.reply(Err(e)));
            return;
        }

        let kind = EntryKind::Unregister {
            session_id: request.session_id,
            expired: false,
        };
        self.propose(kind, Some(Waiter::CloseSession(callback)));
    }

    pub(crate) fn handle_query(&mut self, request: QueryRequest, callback: Callback<Reply<QueryOk>>) {
        if self.is_halted() || self.election_state.participation() == Participation::Joining {
            callback.send(self.reply(Err(ProtocolError::NotLeader)));
            return;
        }

        let commit_index = self.wal.commit_index_u64();
        let wait = match request.consistency {
            QueryConsistency::Causal => ReadWait::Applied(request.index),
            QueryConsistency::Sequential => ReadWait::Applied(commit_index.max(request.index)),
            QueryConsistency::BoundedLinearizable | QueryConsistency::Linearizable => {
                if let Err(e) = self.check_leader() {
                    callback.send(self.reply(Err(e)));
                    return;
                }
                match self.leader_read_wait(request.consistency, request.index) {
                    Some(wait) => wait,
                    None => {
                        callback.send(self.reply(Err(ProtocolError::NotLeader)));
                        return;
                    }
                }
            }
        };

        let needs_round = matches!(wait, ReadWait::Round { .. });
        self.pending.add_read(PendingRead {
            session_id: request.session_id,
            operation: request.operation,
            wait,
            callback,
        });
        if needs_round {
            self.replicate_to_all();
        }
        self.resolve_reads();
    }

    fn leader_read_wait(&mut self, consistency: QueryConsistency, client_index: u64) -> Option<ReadWait> {
        let now = self.clock.now();
        let caught_up = self.leader_caught_up();
        let commit_index = self.wal.commit_index_u64();
        let voting_peers = self.membership.voting_peers();
        let quorum = self.membership.current().quorum();
        let lease_duration = self.options.lease_duration;

        let leader_state = self.election_state.leader_state_mut()?;
        let read_index = commit_index.max(leader_state.noop_index()).max(client_index);

        if voting_peers.is_empty() {
            return Some(ReadWait::Applied(read_index));
        }
        if consistency == QueryConsistency::BoundedLinearizable
            && caught_up
            && leader_state.has_lease(&voting_peers, quorum, lease_duration, now)
        {
            return Some(ReadWait::Applied(read_index));
        }

        // Confirm leadership with a fresh round of heartbeats before reading.
        let round = leader_state.start_round();
        Some(ReadWait::Round { round, read_index })
    }

    /// Answers the reads whose wait condition now holds.
    pub(super) fn resolve_reads(&mut self) {
        let applied_index = self.executor.last_applied();
        let confirmed_round = match self.election_state.leader_state() {
            Some(leader_state) => {
                let voting_peers = self.membership.voting_peers();
                leader_state.confirmed_round(&voting_peers, self.membership.current().quorum())
            }
            None => 0,
        };

        let ready = self.pending.take_ready_reads(applied_index, confirmed_round);
        if ready.is_empty() {
            return;
        }
        let context = self.reply_context();
        for read in ready {
            let result = self.executor.query(read.session_id, read.operation);
            read.callback.send(context.reply(result));
        }
    }

    /// Releases linearizable command results once their events were acknowledged by every
    /// receiver that's still open.
    pub(super) fn resolve_barriers(&mut self) {
        let executor = &self.executor;
        let deliveries = self.election_state.leader_state().map(|ls| &ls.deliveries);
        let released = self.pending.take_released_barriers(|barrier| {
            barrier.receivers.iter().all(|session_id| {
                let committed_ack = match executor.acked_event_index(*session_id) {
                    None => return true,
                    Some(acked) => acked,
                };
                let pending_ack = deliveries
                    .and_then(|d| d.get(session_id))
                    .map_or(0, |delivery| delivery.acked);
                committed_ack.max(pending_ack) >= barrier.event_index
            })
        });

        if released.is_empty() {
            return;
        }
        let context = self.reply_context();
        for barrier in released {
            barrier.callback.send(context.reply(barrier.result));
        }
    }

    /// Leader only. Appends an expiry for every session that missed its keep-alives.
    pub(super) fn expire_sessions(&mut self) {
        if !self.leader_caught_up() {
            return;
        }

        let now = self.clock.wall_clock_millis().max(self.last_timestamp);
        let expired = self.executor.expired_sessions(now);
        let to_expire: Vec<SessionId> = match self.election_state.leader_state_mut() {
            Some(leader_state) => expired
                .into_iter()
                .filter(|session_id| leader_state.expiring.insert(*session_id))
                .collect(),
            None => return,
        };

        for session_id in to_expire {
            slog::info!(self.logger, "Session {:?} timed out. Expiring it.", session_id);
            let kind = EntryKind::Unregister {
                session_id,
                expired: true,
            };
            if self.propose(kind, None).is_none() {
                if let Some(leader_state) = self.election_state.leader_state_mut() {
                    leader_state.expiring.remove(&session_id);
                }
            }
        }
    }

    /// Leader only. Pushes the next unacknowledged event batch to each session's client.
    pub(super) fn pump_deliveries(&mut self) {
        let term = self.local_state.current_term();
        for target in self.executor.delivery_targets() {
            let from = {
                let leader_state = match self.election_state.leader_state_mut() {
                    Some(ls) => ls,
                    None => return,
                };
                let delivery = leader_state.deliveries.entry(target.session_id).or_default();
                if delivery.in_flight {
                    continue;
                }
                delivery.acked = delivery.acked.max(target.acked_event_index);
                if delivery.acked >= target.event_index {
                    continue;
                }
                delivery.acked
            };

            let batch = match self.executor.batch_after(target.session_id, from) {
                Some(batch) => batch,
                None => {
                    slog::warn!(
                        self.logger,
                        "Session {:?} has no event batch after {}",
                        target.session_id,
                        from
                    );
                    continue;
                }
            };
            if let Some(delivery) = self
                .election_state
                .leader_state_mut()
                .and_then(|ls| ls.deliveries.get_mut(&target.session_id))
            {
                delivery.in_flight = true;
            }

            let request = PublishRequest {
                session_id: target.session_id,
                event_index: batch.event_index,
                previous_index: batch.previous_index,
                events: batch.events,
            };
            tokio::task::spawn(Self::call_client_publish(
                self.logger.clone(),
                self.transport.clone(),
                target.address,
                request,
                self.options.publish_timeout,
                self.actor_client.clone(),
                term,
            ));
        }
    }

    async fn call_client_publish(
        logger: slog::Logger,
        transport: Arc<dyn Transport>,
        client: Address,
        request: PublishRequest,
        rpc_timeout: Duration,
        callback: WeakActorClient,
        term: Term,
    ) {
        let session_id = request.session_id;
        slog::trace!(logger, "ClientWire - Publish {} to {:?}", request.event_index, client);
        let rpc_reply = tokio::time::timeout(rpc_timeout, transport.send(&client, Request::Publish(request))).await;
        let result = match rpc_reply {
            Ok(Ok(Response::Publish(Ok(ok)))) => Ok(ok.event_index),
            Ok(Ok(Response::Publish(Err(e)))) => Err(e.to_string()),
            Ok(Ok(other)) => Err(format!("Expected publish response, got {:?}", other)),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_timeout) => Err(format!("Timed out after {:?}", rpc_timeout)),
        };

        let reply = PublishReplyFromClient {
            term,
            session_id,
            result,
        };
        if let Err(e) = callback.notify_publish_reply_from_client(reply).await {
            slog::debug!(logger, "Dropping Publish reply: {}", e);
        }
    }

    pub(crate) fn handle_publish_reply_from_client(&mut self, reply: PublishReplyFromClient) {
        if reply.term != self.local_state.current_term() {
            return;
        }
        let advanced = {
            let delivery = match self
                .election_state
                .leader_state_mut()
                .and_then(|ls| ls.deliveries.get_mut(&reply.session_id))
            {
                Some(delivery) => delivery,
                None => return,
            };
            delivery.in_flight = false;
            match reply.result {
                Ok(event_index) if event_index > delivery.acked => {
                    delivery.acked = event_index;
                    true
                }
                Ok(_) => false,
                Err(e) => {
                    slog::debug!(self.logger, "Publishing to session {:?} failed: {}", reply.session_id, e);
                    false
                }
            }
        };

        // Failed deliveries are retried on the next maintenance tick.
        if advanced {
            self.resolve_barriers();
            self.pump_deliveries();
        }
    }
}
