//! This mod is meant to hold most of the code for the library's server-facing API.
mod event_bus;
mod options;
mod raft_server;
mod types;
mod wiring;

pub use event_bus::RaftEvent;
pub use event_bus::RaftEventListener;
pub use event_bus::RaftRole;
pub use options::RaftOptions;
pub use raft_server::RaftServer;
pub use raft_server::ServerError;
pub use types::RaftMember;
pub use types::RaftStatus;
pub use wiring::try_create_raft_server;
pub use wiring::RaftServerConfig;
pub use wiring::RaftServerCreationError;
