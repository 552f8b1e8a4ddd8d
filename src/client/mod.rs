//! Client side of the cluster: sessions, commands, queries and the session's event stream.
#[allow(clippy::module_inception)]
mod client;
mod connection;
mod error;
mod event_sink;
mod options;

pub use client::ClientConfig;
pub use client::RaftClient;
pub use error::ClientError;
pub use event_sink::EventStream;
pub use event_sink::SessionEvent;
pub use options::ClientOptions;

pub(crate) use connection::ClusterConnection;
pub(crate) use options::ClientOptionsValidated;
