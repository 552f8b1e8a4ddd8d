use crate::actor::Callback;
use crate::commitlog::Log;
use crate::protocol::{JoinOk, JoinRequest, LeaveOk, LeaveRequest, ProtocolError, Reply, TimeoutNowRequest};
use crate::replica::election::{Clock, Participation, Transfer};
use crate::replica::pending::Waiter;
use crate::replica::replica::Replica;
use crate::replica::{EntryKind, LogEntry};

impl<L> Replica<L>
where
    L: Log<LogEntry>,
{
    /// Why a configuration change can't be started right now, if it can't.
    fn check_configuration_change(&self) -> Result<(), ProtocolError> {
        let leader_state = self.election_state.leader_state().ok_or(ProtocolError::NotLeader)?;
        if leader_state.transfer.is_some()
            || self.membership.is_change_pending(self.wal.commit_index_u64())
            || !self.leader_caught_up()
        {
            return Err(ProtocolError::ConfigurationChangeInProgress);
        }
        Ok(())
    }

    /// Adds the member as passive. It's promoted to voter once its log caught up.
    pub(crate) fn handle_join(&mut self, request: JoinRequest, callback: Callback<Reply<JoinOk>>) {
        if let Err(e) = self.check_configuration_change() {
            callback.send(self.reply(Err(e)));
            return;
        }

        let configuration = self.membership.current();
        if configuration.contains(&request.member) {
            let configuration_index = configuration.index();
            callback.send(self.reply(Ok(JoinOk { configuration_index })));
            return;
        }

        slog::info!(self.logger, "Adding {:?} to the cluster as a passive member", request.member);
        let members = configuration.with_member(&request.member, false);
        self.propose(EntryKind::Configuration { members }, Some(Waiter::Join(callback)));
    }

    pub(crate) fn handle_leave(&mut self, request: LeaveRequest, callback: Callback<Reply<LeaveOk>>) {
        if !self.election_state.is_leader() {
            callback.send(self.reply(Err(ProtocolError::NotLeader)));
            return;
        }
        if !self.membership.current().contains(&request.member) {
            let configuration_index = self.membership.current().index();
            callback.send(self.reply(Ok(LeaveOk { configuration_index })));
            return;
        }
        if let Err(e) = self.check_configuration_change() {
            callback.send(self.reply(Err(e)));
            return;
        }

        if request.member == self.my_address {
            self.leave_as_leader(callback);
            return;
        }

        slog::info!(self.logger, "Removing {:?} from the cluster", request.member);
        let members = self.membership.current().without_member(&request.member);
        self.propose(EntryKind::Configuration { members }, Some(Waiter::Leave(callback)));
    }

    /// A leader can't commit its own removal safely. It hands leadership to the most up to date
    /// voter, and the caller retries with whoever wins.
    fn leave_as_leader(&mut self, callback: Callback<Reply<LeaveOk>>) {
        let voting_peers = self.membership.voting_peers();
        if voting_peers.is_empty() {
            slog::info!(self.logger, "Last voting member is leaving. Nothing to hand over.");
            let configuration_index = self.membership.current().index();
            callback.send(self.reply(Ok(LeaveOk { configuration_index })));
            return;
        }

        let deadline = self.clock.now() + self.options.follower_max_timeout * 2;
        let target = match self.election_state.leader_state_mut() {
            Some(leader_state) => {
                let target = voting_peers
                    .iter()
                    .max_by_key(|peer| leader_state.peer_state(peer).map_or(0, |ps| ps.matched_u64()))
                    .cloned();
                if let Some(target) = &target {
                    leader_state.transfer = Some(Transfer {
                        target: target.clone(),
                        deadline,
                        timeout_now_sent: false,
                    });
                }
                target
            }
            None => None,
        };

        slog::info!(self.logger, "Leaving the cluster. Transferring leadership to {:?}", target);
        self.election_state.set_participation(Participation::Leaving);
        self.check_transfer();
        callback.send(self.reply(Err(ProtocolError::ConfigurationChangeInProgress)));
    }

    /// Leader only. Promotes one passive member whose log caught up with the commit index.
    pub(super) fn check_promotion(&mut self) {
        let commit_index = self.wal.commit_index_u64();
        if commit_index == 0 || self.check_configuration_change().is_err() {
            return;
        }

        let candidate = {
            let leader_state = match self.election_state.leader_state() {
                Some(ls) => ls,
                None => return,
            };
            self.membership
                .current()
                .members()
                .iter()
                .filter(|member| !member.active && member.address != self.my_address)
                .find(|member| {
                    leader_state
                        .peer_state(&member.address)
                        .map_or(false, |ps| ps.matched_u64() >= commit_index)
                })
                .map(|member| member.address.clone())
        };

        if let Some(address) = candidate {
            slog::info!(self.logger, "{:?} caught up. Promoting it to voting member.", address);
            let members = self.membership.current().with_member(&address, true);
            self.propose(EntryKind::Configuration { members }, None);
        }
    }

    /// Leader only. Tells the transfer target to start an election once it has every entry.
    pub(super) fn check_transfer(&mut self) {
        let last_log_index = self.wal.last_index();
        let current_term = self.local_state.current_term();
        let target = {
            let leader_state = match self.election_state.leader_state_mut() {
                Some(ls) => ls,
                None => return,
            };
            let caught_up = match &leader_state.transfer {
                Some(transfer) if !transfer.timeout_now_sent => leader_state
                    .peer_state(&transfer.target)
                    .map_or(false, |ps| ps.matched_u64() >= last_log_index),
                _ => false,
            };
            if !caught_up {
                return;
            }
            match leader_state.transfer.as_mut() {
                Some(transfer) => {
                    transfer.timeout_now_sent = true;
                    transfer.target.clone()
                }
                None => return,
            }
        };

        slog::info!(self.logger, "{:?} has every entry. Asking it to take over.", target);
        let request = TimeoutNowRequest {
            term: current_term.as_u64(),
            leader: self.my_address.clone(),
        };
        tokio::task::spawn(Self::call_peer_timeout_now(
            self.logger.clone(),
            self.transport.clone(),
            target,
            request,
            self.options.append_entries_timeout,
        ));
    }

    /// Stops this member from starting elections, ahead of asking the cluster to remove it.
    pub(crate) fn prepare_leave(&mut self) {
        slog::info!(self.logger, "Preparing to leave the cluster");
        if self.election_state.participation() != Participation::Halted {
            self.election_state.set_participation(Participation::Leaving);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::actor::{ActorClient, Callback};
    use crate::commitlog::InMemoryLog;
    use crate::executor::{StateMachine, StateMachineExecutor};
    use crate::protocol::{JoinRequest, LeaveRequest, ProtocolError};
    use crate::replica::{create_replica, ElectionStateSnapshot, LogEntry, Member, Replica, ReplicaOptions};
    use crate::transport::{Address, LocalRegistry};
    use std::sync::Arc;
    use tokio::time::Duration;

    struct Empty;

    impl StateMachine for Empty {
        fn configure(&mut self, _executor: &mut StateMachineExecutor<Self>) {}
    }

    fn leader(actor: &ActorClient) -> Replica<InMemoryLog<LogEntry>> {
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
        let (mut replica, _listener) = create_replica(
            logger,
            Address::new("a"),
            vec![],
            false,
            InMemoryLog::create().unwrap(),
            Empty,
            Arc::new(LocalRegistry::new().transport()),
            actor.weak(),
            options,
        )
        .unwrap();
        replica.handle_follower_timeout();
        replica
    }

    #[tokio::test]
    async fn joiners_are_added_passive_one_change_at_a_time() {
        let (actor, _rx) = ActorClient::new(100);
        let mut replica = leader(&actor);

        let (callback, mut rx) = Callback::new();
        replica.handle_join(JoinRequest { member: Address::new("b") }, callback);
        // Passive members don't vote, so a lone leader commits the change by itself.
        assert_eq!(rx.try_recv().unwrap().outcome.unwrap().configuration_index, 2);
        assert_eq!(
            replica.status().members,
            vec![
                Member {
                    address: Address::new("a"),
                    active: true
                },
                Member {
                    address: Address::new("b"),
                    active: false
                },
            ]
        );

        // Joining twice is a no-op.
        let (callback, mut rx) = Callback::new();
        replica.handle_join(JoinRequest { member: Address::new("b") }, callback);
        assert_eq!(rx.try_recv().unwrap().outcome.unwrap().configuration_index, 2);

        // "b" never replicated anything, so it stays passive.
        replica.check_promotion();
        assert_eq!(replica.status().last_log_index, 2);

        let (callback, mut rx) = Callback::new();
        replica.handle_leave(LeaveRequest { member: Address::new("b") }, callback);
        assert_eq!(rx.try_recv().unwrap().outcome.unwrap().configuration_index, 3);
        assert_eq!(replica.status().members.len(), 1);
    }

    #[tokio::test]
    async fn last_voter_leaves_without_handover() {
        let (actor, _rx) = ActorClient::new(100);
        let mut replica = leader(&actor);

        let (callback, mut rx) = Callback::new();
        replica.handle_leave(LeaveRequest { member: Address::new("a") }, callback);
        assert_eq!(rx.try_recv().unwrap().outcome.unwrap().configuration_index, 0);
        assert_eq!(replica.status().role, ElectionStateSnapshot::Leader);
    }

    #[tokio::test]
    async fn followers_redirect_configuration_changes() {
        let (actor, _rx) = ActorClient::new(100);
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
        let (mut replica, _listener) = create_replica(
            logger,
            Address::new("a"),
            vec![Address::new("a"), Address::new("b")],
            false,
            InMemoryLog::create().unwrap(),
            Empty,
            Arc::new(LocalRegistry::new().transport()),
            actor.weak(),
            options,
        )
        .unwrap();

        let (callback, mut rx) = Callback::new();
        replica.handle_join(JoinRequest { member: Address::new("c") }, callback);
        assert_eq!(rx.try_recv().unwrap().outcome.unwrap_err(), ProtocolError::NotLeader);

        let (callback, mut rx) = Callback::new();
        replica.handle_leave(LeaveRequest { member: Address::new("b") }, callback);
        assert_eq!(rx.try_recv().unwrap().outcome.unwrap_err(), ProtocolError::NotLeader);
    }
}
