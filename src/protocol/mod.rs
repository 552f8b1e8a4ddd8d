mod messages;

pub use messages::AppendOk;
pub use messages::AppendRequest;
pub use messages::CloseSessionOk;
pub use messages::CloseSessionRequest;
pub use messages::CommandConsistency;
pub use messages::CommandOk;
pub use messages::CommandRequest;
pub use messages::JoinOk;
pub use messages::JoinRequest;
pub use messages::KeepAliveOk;
pub use messages::KeepAliveRequest;
pub use messages::LeaveOk;
pub use messages::LeaveRequest;
pub use messages::OpenSessionOk;
pub use messages::OpenSessionRequest;
pub use messages::Operation;
pub use messages::PeerError;
pub use messages::ProtocolError;
pub use messages::PublishOk;
pub use messages::PublishRequest;
pub use messages::PublishedEvent;
pub use messages::QueryConsistency;
pub use messages::QueryOk;
pub use messages::QueryRequest;
pub use messages::Reply;
pub use messages::Request;
pub use messages::Response;
pub use messages::SessionId;
pub use messages::TimeoutNowOk;
pub use messages::TimeoutNowRequest;
pub use messages::VoteOk;
pub use messages::VoteRequest;
pub use messages::WireEntry;
