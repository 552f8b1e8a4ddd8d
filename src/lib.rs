mod actor;
mod api;
mod client;
mod commitlog;
mod executor;
mod protocol;
mod replica;
mod server;
mod transport;
mod grpc {
    include!("../generated/raft.rs");
}

pub use api::try_create_raft_server;
pub use api::RaftEvent;
pub use api::RaftEventListener;
pub use api::RaftMember;
pub use api::RaftOptions;
pub use api::RaftRole;
pub use api::RaftServer;
pub use api::RaftServerConfig;
pub use api::RaftServerCreationError;
pub use api::RaftStatus;
pub use api::ServerError;
pub use client::ClientConfig;
pub use client::ClientError;
pub use client::ClientOptions;
pub use client::EventStream;
pub use client::RaftClient;
pub use client::SessionEvent;
pub use executor::Commit;
pub use executor::HandlerError;
pub use executor::Session;
pub use executor::Sessions;
pub use executor::StateMachine;
pub use executor::StateMachineExecutor;
pub use protocol::CommandConsistency;
pub use protocol::QueryConsistency;
pub use protocol::SessionId;
pub use transport::Address;
pub use transport::GrpcTransport;
pub use transport::Listener;
pub use transport::LocalRegistry;
pub use transport::LocalTransport;
pub use transport::RequestHandler;
pub use transport::Transport;
pub use transport::TransportError;

// Learning 1: `create::{root_mod}` should not have any code. Just `mod` and `pub use` statements.
// Learning 2: All `mod` statements, anywhere, should not be `pub`. Only export `pub` via individual
//             use statements.
//
// This keeps the `crate::{root_mod}` root_mod only responsible for exporting types to the rest of
// crate, and allows me to organize my root_mod impl however I want.
