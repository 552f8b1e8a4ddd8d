use crate::protocol::{AppendOk, PeerError, SessionId, VoteOk};
use crate::replica::local_state::Term;
use crate::replica::{ElectionStateSnapshot, Member};
use crate::transport::{Address, TransportError};
use tokio::time::{Duration, Instant};

/// LeaderTimerTick contains info for a single tick of one of a leader's timers.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LeaderTimerTick {
    /// Time to send AppendEntries to `peer`, even if there's nothing new to send.
    Heartbeat { peer: Address, term: Term },
    /// Periodic leader housekeeping: quorum contact check, session expiry, event delivery,
    /// promotions and compaction.
    Maintenance { term: Term },
}

/// Failure to get an answer out of a peer.
#[derive(Debug, thiserror::Error)]
pub(crate) enum PeerCallError {
    #[error("Peer rejected request: {0}")]
    Rejected(#[from] PeerError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("No reply within {0:?}")]
    Timeout(Duration),
    #[error("Malformed reply: {0}")]
    MalformedReply(String),
}

#[derive(Debug)]
pub(crate) struct RequestVoteReplyFromPeer {
    pub(crate) peer: Address,
    pub(crate) term: Term,
    pub(crate) result: Result<VoteOk, PeerCallError>,
}

#[derive(Debug)]
pub(crate) struct AppendEntriesReplyFromPeer {
    pub(crate) descriptor: AppendEntriesReplyFromPeerDescriptor,
    pub(crate) result: Result<AppendOk, PeerCallError>,
}

// This is basically info about the original request
#[derive(Debug)]
pub(crate) struct AppendEntriesReplyFromPeerDescriptor {
    pub(crate) peer: Address,
    pub(crate) term: Term,
    pub(crate) seq_no: u64,
    pub(crate) sent_at: Instant,
    pub(crate) round: u64,
    pub(crate) previous_log_index: u64,
    pub(crate) num_log_entries: usize,
}

/// Outcome of pushing one event batch to a session's client.
#[derive(Debug)]
pub(crate) struct PublishReplyFromClient {
    pub(crate) term: Term,
    pub(crate) session_id: SessionId,
    /// Highest event index the client has received, or why it couldn't be reached.
    pub(crate) result: Result<u64, String>,
}

#[derive(Debug, Clone)]
pub(crate) struct ReplicaStatus {
    pub(crate) term: u64,
    pub(crate) role: ElectionStateSnapshot,
    pub(crate) commit_index: u64,
    pub(crate) applied_index: u64,
    pub(crate) first_log_index: u64,
    pub(crate) last_log_index: u64,
    pub(crate) members: Vec<Member>,
}
