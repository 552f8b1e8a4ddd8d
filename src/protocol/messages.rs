//! Logical message vocabulary shared by members and clients. These types are independent of any
//! wire format; the gRPC transport converts them to and from protobuf.
use crate::transport::Address;
use bytes::Bytes;
use std::fmt;

/// Session identifier. It is the log index of the entry that opened the session, so it is unique
/// across the cluster and assigned by the leader that appended it.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        SessionId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque operation, dispatched to the state machine handler registered for `op_type`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operation {
    pub op_type: String,
    pub payload: Bytes,
}

impl Operation {
    pub fn new<T: Into<String>, P: Into<Bytes>>(op_type: T, payload: P) -> Self {
        Operation {
            op_type: op_type.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandConsistency {
    /// Applied through the log, but outside of the session's sequencing; retries may apply twice.
    None,
    /// Applied in session submission order and deduplicated by sequence number.
    Sequential,
    /// Like Sequential, and the response waits until every event the command triggered has been
    /// acknowledged by the receiving clients.
    Linearizable,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum QueryConsistency {
    Causal,
    Sequential,
    BoundedLinearizable,
    Linearizable,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedEvent {
    pub name: String,
    pub payload: Bytes,
}

#[derive(Clone, Debug)]
pub enum Request {
    Vote(VoteRequest),
    Append(AppendRequest),
    TimeoutNow(TimeoutNowRequest),
    Join(JoinRequest),
    Leave(LeaveRequest),
    OpenSession(OpenSessionRequest),
    KeepAlive(KeepAliveRequest),
    Command(CommandRequest),
    Query(QueryRequest),
    CloseSession(CloseSessionRequest),
    Publish(PublishRequest),
}

#[derive(Clone, Debug)]
pub enum Response {
    Vote(Result<VoteOk, PeerError>),
    Append(Result<AppendOk, PeerError>),
    TimeoutNow(Result<TimeoutNowOk, PeerError>),
    Join(Reply<JoinOk>),
    Leave(Reply<LeaveOk>),
    OpenSession(Reply<OpenSessionOk>),
    KeepAlive(Reply<KeepAliveOk>),
    Command(Reply<CommandOk>),
    Query(Reply<QueryOk>),
    CloseSession(Reply<CloseSessionOk>),
    Publish(Result<PublishOk, ProtocolError>),
    /// The endpoint does not serve this kind of request, e.g. a vote request sent to a client.
    Unsupported,
}

// ------- Peer RPCs --------

#[derive(Clone, Debug)]
pub struct VoteRequest {
    pub term: u64,
    pub candidate: Address,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Clone, Debug)]
pub struct VoteOk {
    pub vote_granted: bool,
}

#[derive(Clone, Debug)]
pub struct AppendRequest {
    pub term: u64,
    pub leader: Address,
    pub previous_log_index: u64,
    pub previous_log_term: u64,
    /// The previous entry is the leader's compaction point. A follower whose log ends before it
    /// adopts it as its own log base.
    pub previous_is_base: bool,
    pub entries: Vec<WireEntry>,
    pub commit_index: u64,
    /// Index up to which every member may compact its log.
    pub global_index: u64,
}

#[derive(Clone, Debug)]
pub struct WireEntry {
    pub term: u64,
    pub data: Bytes,
}

#[derive(Clone, Debug)]
pub struct AppendOk {
    pub last_log_index: u64,
    pub low_water_index: u64,
}

#[derive(Clone, Debug)]
pub struct TimeoutNowRequest {
    pub term: u64,
    pub leader: Address,
}

#[derive(Clone, Debug)]
pub struct TimeoutNowOk {}

#[derive(Clone, Debug, thiserror::Error)]
pub enum PeerError {
    #[error("Sender's term is stale, current term is {current_term}")]
    StaleTerm { current_term: u64 },
    #[error("Missing previous log entry, last log index is {last_log_index}")]
    MissingPreviousEntry { last_log_index: u64 },
    #[error("Sender is not in the cluster")]
    NotInCluster,
    #[error("Server fault: {0}")]
    ServerFault(String),
}

// ------- Membership RPCs --------

#[derive(Clone, Debug)]
pub struct JoinRequest {
    pub member: Address,
}

#[derive(Clone, Debug)]
pub struct JoinOk {
    pub configuration_index: u64,
}

#[derive(Clone, Debug)]
pub struct LeaveRequest {
    pub member: Address,
}

#[derive(Clone, Debug)]
pub struct LeaveOk {
    pub configuration_index: u64,
}

// ------- Client RPCs --------

#[derive(Clone, Debug)]
pub struct OpenSessionRequest {
    pub client_id: String,
    /// Where the cluster pushes this session's events. None for clients that don't consume events.
    pub client_address: Option<Address>,
}

#[derive(Clone, Debug)]
pub struct OpenSessionOk {
    pub session_id: SessionId,
    pub timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct KeepAliveRequest {
    pub session_id: SessionId,
    /// Highest sequence number up to which the client has received every command response.
    pub command_sequence: u64,
    /// Highest event index up to which the client has received every event batch.
    pub event_index: u64,
}

#[derive(Clone, Debug)]
pub struct KeepAliveOk {}

#[derive(Clone, Debug)]
pub struct CommandRequest {
    pub session_id: SessionId,
    /// Ignored for `CommandConsistency::None`.
    pub sequence: u64,
    pub operation: Operation,
    pub consistency: CommandConsistency,
}

#[derive(Clone, Debug)]
pub struct CommandOk {
    pub index: u64,
    /// Index of the latest event batch queued for the session when the command was applied.
    pub event_index: u64,
    pub output: Bytes,
}

#[derive(Clone, Debug)]
pub struct QueryRequest {
    pub session_id: SessionId,
    pub sequence: u64,
    /// Highest log index the client has observed.
    pub index: u64,
    pub operation: Operation,
    pub consistency: QueryConsistency,
}

#[derive(Clone, Debug)]
pub struct QueryOk {
    pub index: u64,
    pub event_index: u64,
    pub output: Bytes,
}

#[derive(Clone, Debug)]
pub struct CloseSessionRequest {
    pub session_id: SessionId,
}

#[derive(Clone, Debug)]
pub struct CloseSessionOk {}

#[derive(Clone, Debug)]
pub struct PublishRequest {
    pub session_id: SessionId,
    pub event_index: u64,
    pub previous_index: u64,
    pub events: Vec<PublishedEvent>,
}

#[derive(Clone, Debug)]
pub struct PublishOk {
    /// Highest event index the client has received without gaps.
    pub event_index: u64,
}

/// Reply wraps every client and membership response with the responder's view of the cluster, so
/// that callers can redirect to the leader.
#[derive(Clone, Debug)]
pub struct Reply<T> {
    pub leader: Option<Address>,
    pub members: Vec<Address>,
    pub outcome: Result<T, ProtocolError>,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    /// Redirect to `Reply::leader`, or retry later if there is none.
    #[error("Not leader")]
    NotLeader,
    #[error("Unknown or expired session")]
    UnknownSession,
    #[error("A configuration change is already in progress")]
    ConfigurationChangeInProgress,
    #[error("Application error: {0}")]
    Application(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}
