use crate::transport::TransportError;
use tokio::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Illegal client options: {0}")]
    IllegalOptions(String),
    #[error("Cluster didn't complete the request within {0:?}")]
    Timeout(Duration),
    /// The session is gone. A new client has to be connected.
    #[error("Session expired")]
    SessionExpired,
    #[error("Cluster is busy with another configuration change")]
    ConfigurationChangeInProgress,
    #[error("State machine rejected the operation: {0}")]
    Application(String),
    #[error("Cluster failed the request: {0}")]
    Internal(String),
    #[error("Can't receive events")]
    Transport(#[from] TransportError),
}
