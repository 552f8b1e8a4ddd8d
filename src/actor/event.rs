use crate::protocol::{
    AppendOk, AppendRequest, CloseSessionOk, CloseSessionRequest, CommandOk, CommandRequest, JoinOk, JoinRequest,
    KeepAliveOk, KeepAliveRequest, LeaveOk, LeaveRequest, OpenSessionOk, OpenSessionRequest, PeerError, QueryOk,
    QueryRequest, Reply, TimeoutNowOk, TimeoutNowRequest, VoteOk, VoteRequest,
};
use crate::replica;
use std::fmt;
use tokio::sync::oneshot;

// v1 Design choice: Disk interaction will be synchronous. Future improvement: There should be a
//                   Disk Actor.
pub(crate) enum Event {
    // Leader: Grant vote if applicable (includes write to disk). Transition to follower.
    // Candidate: Grant vote if applicable (includes write to disk). Transition to follower.
    // Follower: Grant vote if applicable (includes write to disk).
    RequestVote(VoteRequest, Callback<Result<VoteOk, PeerError>>),

    // Leader: discard
    // Candidate: Update local state. Transition to leader if quorum vote.
    // Follower: discard
    RequestVoteReplyFromPeer(replica::RequestVoteReplyFromPeer),

    // Leader: Transition to follower if applicable. Clean up log. Respond to request.
    // Candidate: Transition to follower if applicable. Clean up log. Respond to request.
    // Follower: Write to disk then respond. Reset timeout. Apply newly committed entries.
    AppendEntries(AppendRequest, Callback<Result<AppendOk, PeerError>>),

    // Leader: Update the peer's replication progress. Commit, apply and answer waiting requests.
    // Candidate: discard
    // Follower: discard
    AppendEntriesReplyFromPeer(replica::AppendEntriesReplyFromPeer),

    // Any: start an election right away, because the leader is handing over to us.
    TimeoutNow(TimeoutNowRequest, Callback<Result<TimeoutNowOk, PeerError>>),

    // Leader: record the client's event acknowledgement, push the next batch.
    // Others: discard
    PublishReplyFromClient(replica::PublishReplyFromClient),

    // Leader: append a configuration entry, respond once committed.
    // Others: redirect.
    Join(JoinRequest, Callback<Reply<JoinOk>>),
    Leave(LeaveRequest, Callback<Reply<LeaveOk>>),

    // Leader: append an entry, respond once applied.
    // Others: redirect.
    OpenSession(OpenSessionRequest, Callback<Reply<OpenSessionOk>>),
    KeepAlive(KeepAliveRequest, Callback<Reply<KeepAliveOk>>),
    Command(CommandRequest, Callback<Reply<CommandOk>>),
    CloseSession(CloseSessionRequest, Callback<Reply<CloseSessionOk>>),

    // Any (causal, sequential) or leader (linearizable): respond once the state machine caught up.
    Query(QueryRequest, Callback<Reply<QueryOk>>),

    // Leader: send AppendEntries to one peer, or run periodic housekeeping.
    // Others: discard
    LeaderTimer(replica::LeaderTimerTick),

    // Leader: NOT POSSIBLE - discard
    // Candidate: Transition to candidate. Trigger new election.
    // Follower: Transition to candidate. Trigger new election.
    FollowerTimeout,

    // Local API.
    PrepareLeave(Callback<()>),
    Status(Callback<replica::ReplicaStatus>),
    LogDigest(Callback<Result<Vec<(u64, u64)>, String>>),
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::RequestVote(request, _) => write!(f, "RequestVote({:?})", request),
            Event::RequestVoteReplyFromPeer(reply) => write!(f, "RequestVoteReplyFromPeer({:?})", reply),
            Event::AppendEntries(request, _) => write!(
                f,
                "AppendEntries(term={}, leader={}, prev={}, entries={}, commit={})",
                request.term,
                request.leader,
                request.previous_log_index,
                request.entries.len(),
                request.commit_index
            ),
            Event::AppendEntriesReplyFromPeer(reply) => write!(f, "AppendEntriesReplyFromPeer({:?})", reply),
            Event::TimeoutNow(request, _) => write!(f, "TimeoutNow({:?})", request),
            Event::PublishReplyFromClient(reply) => write!(f, "PublishReplyFromClient({:?})", reply),
            Event::Join(request, _) => write!(f, "Join({:?})", request),
            Event::Leave(request, _) => write!(f, "Leave({:?})", request),
            Event::OpenSession(request, _) => write!(f, "OpenSession({:?})", request),
            Event::KeepAlive(request, _) => write!(f, "KeepAlive({:?})", request),
            Event::Command(request, _) => write!(f, "Command({:?})", request),
            Event::CloseSession(request, _) => write!(f, "CloseSession({:?})", request),
            Event::Query(request, _) => write!(f, "Query({:?})", request),
            Event::LeaderTimer(tick) => write!(f, "LeaderTimer({:?})", tick),
            Event::FollowerTimeout => write!(f, "FollowerTimeout"),
            Event::PrepareLeave(_) => write!(f, "PrepareLeave"),
            Event::Status(_) => write!(f, "Status"),
            Event::LogDigest(_) => write!(f, "LogDigest"),
        }
    }
}

/// Callback answers an event. Dropping it unanswered makes the caller see the actor as exited.
pub(crate) struct Callback<T>(oneshot::Sender<T>);

impl<T> Callback<T> {
    pub(crate) fn new() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (Callback(tx), rx)
    }

    pub(crate) fn send(self, message: T) {
        let _ = self.0.send(message);
    }

    /// True once the caller stopped waiting, e.g. because it timed out.
    pub(crate) fn is_abandoned(&self) -> bool {
        self.0.is_closed()
    }
}
