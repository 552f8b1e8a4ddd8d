use crate::actor::Callback;
use crate::protocol::{
    CloseSessionOk, CommandConsistency, CommandOk, JoinOk, KeepAliveOk, LeaveOk, OpenSessionOk, Operation,
    ProtocolError, QueryOk, Reply, SessionId,
};
use crate::transport::Address;
use std::collections::BTreeMap;

/// ReplyContext is this node's view of the cluster, attached to every client reply.
#[derive(Clone, Debug)]
pub(super) struct ReplyContext {
    pub(super) leader: Option<Address>,
    pub(super) members: Vec<Address>,
}

impl ReplyContext {
    pub(super) fn reply<T>(&self, outcome: Result<T, ProtocolError>) -> Reply<T> {
        Reply {
            leader: self.leader.clone(),
            members: self.members.clone(),
            outcome,
        }
    }
}

/// A request waiting for the entry it appended to be applied.
pub(super) enum Waiter {
    OpenSession(Callback<Reply<OpenSessionOk>>),
    KeepAlive(Callback<Reply<KeepAliveOk>>),
    CloseSession(Callback<Reply<CloseSessionOk>>),
    Command(Callback<Reply<CommandOk>>, CommandConsistency),
    Join(Callback<Reply<JoinOk>>),
    Leave(Callback<Reply<LeaveOk>>),
}

impl Waiter {
    pub(super) fn fail(self, context: &ReplyContext, error: ProtocolError) {
        match self {
            Waiter::OpenSession(cb) => cb.send(context.reply(Err(error))),
            Waiter::KeepAlive(cb) => cb.send(context.reply(Err(error))),
            Waiter::CloseSession(cb) => cb.send(context.reply(Err(error))),
            Waiter::Command(cb, _) => cb.send(context.reply(Err(error))),
            Waiter::Join(cb) => cb.send(context.reply(Err(error))),
            Waiter::Leave(cb) => cb.send(context.reply(Err(error))),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) enum ReadWait {
    /// Served once the state machine applied this index.
    Applied(u64),
    /// Served once a quorum acknowledged heartbeat `round`, and the state machine applied
    /// `read_index`. Only valid on the leader that started the round.
    Round { round: u64, read_index: u64 },
}

pub(super) struct PendingRead {
    pub(super) session_id: SessionId,
    pub(super) operation: Operation,
    pub(super) wait: ReadWait,
    pub(super) callback: Callback<Reply<QueryOk>>,
}

/// A linearizable command result held back until every session that received events from the
/// command acknowledged them.
pub(super) struct EventBarrier {
    pub(super) event_index: u64,
    pub(super) receivers: Vec<SessionId>,
    pub(super) result: Result<CommandOk, ProtocolError>,
    pub(super) callback: Callback<Reply<CommandOk>>,
}

/// Pending holds every client request this node accepted but hasn't answered yet.
#[derive(Default)]
pub(super) struct Pending {
    waiters: BTreeMap<u64, Waiter>,
    reads: Vec<PendingRead>,
    barriers: Vec<EventBarrier>,
}

impl Pending {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn add_waiter(&mut self, index: u64, waiter: Waiter) {
        self.waiters.insert(index, waiter);
    }

    pub(super) fn take_waiter(&mut self, index: u64) -> Option<Waiter> {
        self.waiters.remove(&index)
    }

    /// Fails the requests whose entries were truncated away.
    pub(super) fn fail_from(&mut self, index: u64, context: &ReplyContext) {
        for (_, waiter) in self.waiters.split_off(&index) {
            waiter.fail(context, ProtocolError::NotLeader);
        }
    }

    pub(super) fn add_read(&mut self, read: PendingRead) {
        self.reads.push(read);
    }

    /// Removes and returns the reads that can be served now. Reads whose caller gave up are
    /// dropped.
    pub(super) fn take_ready_reads(&mut self, applied_index: u64, confirmed_round: u64) -> Vec<PendingRead> {
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.reads)
            .into_iter()
            .filter(|read| !read.callback.is_abandoned())
            .partition(|read| match read.wait {
                ReadWait::Applied(index) => index <= applied_index,
                ReadWait::Round { round, read_index } => round <= confirmed_round && read_index <= applied_index,
            });
        self.reads = waiting;
        ready
    }

    pub(super) fn add_barrier(&mut self, barrier: EventBarrier) {
        self.barriers.push(barrier);
    }

    /// Removes and returns the barriers for which `is_released` holds.
    pub(super) fn take_released_barriers<F>(&mut self, is_released: F) -> Vec<EventBarrier>
    where
        F: Fn(&EventBarrier) -> bool,
    {
        let (released, held): (Vec<_>, Vec<_>) = std::mem::take(&mut self.barriers)
            .into_iter()
            .partition(|barrier| barrier.callback.is_abandoned() || is_released(barrier));
        self.barriers = held;
        released
    }

    /// Fails everything that only the leader of the current term can complete.
    pub(super) fn fail_leader_bound(&mut self, context: &ReplyContext) {
        for (_, waiter) in std::mem::take(&mut self.waiters) {
            waiter.fail(context, ProtocolError::NotLeader);
        }

        let (round_bound, local): (Vec<_>, Vec<_>) = std::mem::take(&mut self.reads)
            .into_iter()
            .partition(|read| matches!(read.wait, ReadWait::Round { .. }));
        self.reads = local;
        for read in round_bound {
            read.callback.send(context.reply(Err(ProtocolError::NotLeader)));
        }

        for barrier in std::mem::take(&mut self.barriers) {
            barrier.callback.send(context.reply(Err(ProtocolError::NotLeader)));
        }
    }

    pub(super) fn len(&self) -> usize {
        self.waiters.len() + self.reads.len() + self.barriers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::sync::oneshot;

    fn context() -> ReplyContext {
        ReplyContext {
            leader: Some(Address::new("leader")),
            members: vec![Address::new("leader"), Address::new("follower")],
        }
    }

    fn read(wait: ReadWait) -> (PendingRead, oneshot::Receiver<Reply<QueryOk>>) {
        let (callback, rx) = Callback::new();
        let read = PendingRead {
            session_id: SessionId::new(1),
            operation: Operation::new("get", Bytes::new()),
            wait,
            callback,
        };
        (read, rx)
    }

    fn command_waiter() -> (Waiter, oneshot::Receiver<Reply<CommandOk>>) {
        let (callback, rx) = Callback::new();
        (Waiter::Command(callback, CommandConsistency::Sequential), rx)
    }

    #[test]
    fn truncation_fails_waiters_at_and_after_index() {
        let mut pending = Pending::new();
        let (w4, mut rx4) = command_waiter();
        let (w5, mut rx5) = command_waiter();
        let (w6, mut rx6) = command_waiter();
        pending.add_waiter(4, w4);
        pending.add_waiter(5, w5);
        pending.add_waiter(6, w6);

        pending.fail_from(5, &context());

        assert!(rx4.try_recv().is_err());
        assert_eq!(rx5.try_recv().unwrap().outcome.unwrap_err(), ProtocolError::NotLeader);
        let reply = rx6.try_recv().unwrap();
        assert_eq!(reply.leader, Some(Address::new("leader")));
        assert_eq!(reply.outcome.unwrap_err(), ProtocolError::NotLeader);
        assert!(pending.take_waiter(4).is_some());
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn reads_wait_for_apply_and_round() {
        let mut pending = Pending::new();
        let (causal, _rx1) = read(ReadWait::Applied(3));
        let (linearizable, _rx2) = read(ReadWait::Round {
            round: 2,
            read_index: 3,
        });
        pending.add_read(causal);
        pending.add_read(linearizable);

        assert!(pending.take_ready_reads(2, 5).is_empty());

        let ready = pending.take_ready_reads(3, 1);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].wait, ReadWait::Applied(3));

        let ready = pending.take_ready_reads(3, 2);
        assert_eq!(ready.len(), 1);
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn abandoned_reads_are_dropped() {
        let mut pending = Pending::new();
        let (r, rx) = read(ReadWait::Applied(10));
        pending.add_read(r);
        drop(rx);

        assert!(pending.take_ready_reads(0, 0).is_empty());
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn stepping_down_keeps_only_local_reads() {
        let mut pending = Pending::new();
        let (w, mut wrx) = command_waiter();
        pending.add_waiter(7, w);
        let (local, _lrx) = read(ReadWait::Applied(9));
        let (round, mut rrx) = read(ReadWait::Round {
            round: 1,
            read_index: 9,
        });
        pending.add_read(local);
        pending.add_read(round);
        let (callback, mut brx) = Callback::new();
        pending.add_barrier(EventBarrier {
            event_index: 7,
            receivers: vec![SessionId::new(2)],
            result: Err(ProtocolError::UnknownSession),
            callback,
        });

        pending.fail_leader_bound(&context());

        assert_eq!(wrx.try_recv().unwrap().outcome.unwrap_err(), ProtocolError::NotLeader);
        assert_eq!(rrx.try_recv().unwrap().outcome.unwrap_err(), ProtocolError::NotLeader);
        assert_eq!(brx.try_recv().unwrap().outcome.unwrap_err(), ProtocolError::NotLeader);
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn barriers_release_by_predicate() {
        let mut pending = Pending::new();
        for event_index in [4u64, 8].iter() {
            let (callback, rx) = Callback::new();
            std::mem::forget(rx);
            pending.add_barrier(EventBarrier {
                event_index: *event_index,
                receivers: vec![SessionId::new(1)],
                result: Err(ProtocolError::UnknownSession),
                callback,
            });
        }

        let released = pending.take_released_barriers(|barrier| barrier.event_index <= 5);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].event_index, 4);
        assert_eq!(pending.len(), 1);
    }
}
