use crate::actor::{ActorClient, ActorExited};
use crate::api::{RaftEventListener, RaftRole, RaftStatus};
use crate::client::{ClientError, ClusterConnection};
use crate::protocol::{JoinRequest, LeaveRequest};
use crate::transport::{Address, Listener};
use tokio::task::JoinHandle;
use tokio::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The member stopped, either because it was shut down or because its state machine failed.
    #[error("Raft replica has exited")]
    ReplicaExited,
    #[error("Failed to read the local log: {0}")]
    LogRead(String),
    #[error("Cluster didn't complete the configuration change")]
    ConfigurationChange(#[source] ClientError),
}

impl From<ActorExited> for ServerError {
    fn from(_: ActorExited) -> Self {
        ServerError::ReplicaExited
    }
}

/// RaftServer is a running cluster member. It keeps serving the cluster until it's shut down,
/// leaves, or is dropped.
pub struct RaftServer {
    pub(super) logger: slog::Logger,
    pub(super) address: Address,
    pub(super) actor_client: ActorClient,
    pub(super) event_listener: RaftEventListener,
    pub(super) rpc_listener: Listener,
    pub(super) actor_task: JoinHandle<()>,
    /// Reaches the leader for join and leave requests.
    pub(super) cluster: ClusterConnection,
}

impl RaftServer {
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn role(&self) -> RaftRole {
        self.event_listener.current_role()
    }

    pub fn event_listener(&self) -> RaftEventListener {
        self.event_listener.clone()
    }

    pub async fn status(&self) -> Result<RaftStatus, ServerError> {
        let status = self.actor_client.status().await?;
        Ok(RaftStatus::from(status))
    }

    /// `(index, term)` of every committed entry still in the local log.
    pub async fn log_digest(&self) -> Result<Vec<(u64, u64)>, ServerError> {
        self.actor_client.log_digest().await?.map_err(ServerError::LogRead)
    }

    /// Asks the cluster to add this member. Returns once the configuration that adds it as a
    /// non-voting member committed. The member is promoted to voter after it caught up.
    pub async fn join(&self) -> Result<u64, ServerError> {
        slog::info!(self.logger, "Joining the cluster");
        let joined = self
            .cluster
            .call(JoinRequest {
                member: self.address.clone(),
            })
            .await
            .map_err(ServerError::ConfigurationChange)?;

        slog::info!(self.logger, "Joined in configuration {}", joined.configuration_index);
        Ok(joined.configuration_index)
    }

    /// Leaves the cluster gracefully and shuts down. A leader hands its leadership over first.
    pub async fn leave(self) -> Result<(), ServerError> {
        self.actor_client.prepare_leave().await?;

        slog::info!(self.logger, "Leaving the cluster");
        let result = self
            .cluster
            .call(LeaveRequest {
                member: self.address.clone(),
            })
            .await;
        if let Ok(left) = &result {
            slog::info!(self.logger, "Left in configuration {}", left.configuration_index);
        }

        self.shutdown().await;
        result.map(|_| ()).map_err(ServerError::ConfigurationChange)
    }

    /// Stops the member without telling the rest of the cluster, as if it crashed.
    pub async fn shutdown(self) {
        let RaftServer {
            logger,
            actor_client,
            rpc_listener,
            actor_task,
            ..
        } = self;

        drop(rpc_listener);
        drop(actor_client);
        match tokio::time::timeout(Duration::from_secs(5), actor_task).await {
            Ok(Ok(())) => slog::info!(logger, "Shut down"),
            Ok(Err(e)) => slog::error!(logger, "Replica task failed: {}", e),
            Err(_) => slog::warn!(logger, "Replica task didn't stop in time"),
        }
    }
}
