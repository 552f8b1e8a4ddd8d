use crate::actor::{ActorClient, ReplicaActor};
use crate::api::options::RaftOptionsValidated;
use crate::api::{RaftEventListener, RaftOptions, RaftServer, ServerError};
use crate::client::{ClientOptionsValidated, ClusterConnection};
use crate::commitlog::InMemoryLog;
use crate::executor::StateMachine;
use crate::replica::{self, ReplicaOptions};
use crate::server::RpcServer;
use crate::transport::{Address, Transport, TransportError};
use std::convert::TryFrom;
use std::io;
use std::sync::Arc;

pub struct RaftServerConfig<M> {
    /// This member's address. Members are identified by it.
    pub address: Address,
    /// The founding members, or when joining, any members of the running cluster.
    pub members: Vec<Address>,
    /// Start outside the cluster and ask it to add this member.
    pub join: bool,
    pub state_machine: M,
    pub transport: Arc<dyn Transport>,
    pub info_logger: slog::Logger,
    pub options: RaftOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum RaftServerCreationError {
    #[error("Illegal options for configuring server: {0}")]
    IllegalOptions(String),
    #[error("Log initialization failure")]
    LogInitialization(#[source] io::Error),
    #[error("Joining requires at least one member of the running cluster")]
    NoMembersToJoin,
    #[error("Can't listen for cluster traffic")]
    Transport(#[from] TransportError),
    #[error("Failed to join the cluster")]
    Join(#[source] ServerError),
}

pub async fn try_create_raft_server<M: StateMachine>(
    config: RaftServerConfig<M>,
) -> Result<RaftServer, RaftServerCreationError> {
    let RaftServerConfig {
        address,
        members,
        join,
        state_machine,
        transport,
        info_logger,
        options,
    } = config;
    let options =
        RaftOptionsValidated::try_from(options).map_err(|e| RaftServerCreationError::IllegalOptions(e.to_string()))?;

    let others: Vec<Address> = members.iter().filter(|member| **member != address).cloned().collect();
    if join && others.is_empty() {
        return Err(RaftServerCreationError::NoMembersToJoin);
    }

    let root_logger = info_logger.new(slog::o!("Member" => address.to_string()));

    let commit_log = InMemoryLog::create().map_err(RaftServerCreationError::LogInitialization)?;

    let (actor_client, actor_queue_rx) = ActorClient::new(10);

    let (replica, election_state_change_listener) = replica::create_replica(
        root_logger.clone(),
        address.clone(),
        members,
        join,
        commit_log,
        state_machine,
        transport.clone(),
        actor_client.weak(),
        ReplicaOptions::from(&options),
    )
    .map_err(RaftServerCreationError::LogInitialization)?;

    let replica_actor = ReplicaActor::new(root_logger.clone(), actor_queue_rx, replica);
    let actor_task = tokio::spawn(replica_actor.run_event_loop());

    let rpc_server = RpcServer::new(root_logger.clone(), actor_client.weak());
    let rpc_listener = transport.listen(&address, Arc::new(rpc_server)).await?;

    let cluster = ClusterConnection::new(
        root_logger.new(slog::o!("Component" => "Membership")),
        transport,
        others,
        ClientOptionsValidated::default(),
    );

    let server = RaftServer {
        logger: root_logger,
        address,
        actor_client,
        event_listener: RaftEventListener::new(election_state_change_listener),
        rpc_listener,
        actor_task,
        cluster,
    };

    if join {
        let joined = server.join().await;
        if let Err(e) = joined {
            server.shutdown().await;
            return Err(RaftServerCreationError::Join(e));
        }
    }

    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RaftRole;
    use crate::executor::StateMachineExecutor;
    use crate::transport::LocalRegistry;
    use tokio::time::{Duration, Instant};

    struct Idle;

    impl StateMachine for Idle {
        fn configure(&mut self, _executor: &mut StateMachineExecutor<Self>) {}
    }

    fn config(registry: &LocalRegistry, members: Vec<Address>, join: bool) -> RaftServerConfig<Idle> {
        RaftServerConfig {
            address: Address::new("solo"),
            members,
            join,
            state_machine: Idle,
            transport: Arc::new(registry.transport()),
            info_logger: slog::Logger::root(slog::Discard, slog::o!()),
            options: RaftOptions {
                leader_heartbeat_duration: Some(Duration::from_millis(20)),
                follower_min_timeout: Some(Duration::from_millis(100)),
                follower_max_timeout: Some(Duration::from_millis(200)),
                leader_append_entries_timeout: Some(Duration::from_millis(50)),
                session_timeout: Some(Duration::from_secs(1)),
                ..RaftOptions::default()
            },
        }
    }

    #[tokio::test]
    async fn joining_needs_another_member() {
        let registry = LocalRegistry::new();
        // Listing only itself leaves nobody to ask.
        let result = try_create_raft_server(config(&registry, vec![Address::new("solo")], true)).await;
        assert!(matches!(result, Err(RaftServerCreationError::NoMembersToJoin)));
    }

    #[tokio::test]
    async fn illegal_options_are_refused() {
        let registry = LocalRegistry::new();
        let mut config = config(&registry, vec![], false);
        config.options.follower_max_timeout = Some(Duration::from_millis(50));
        let result = try_create_raft_server(config).await;
        assert!(matches!(result, Err(RaftServerCreationError::IllegalOptions(_))));
    }

    #[tokio::test]
    async fn lone_founder_leads_and_holds_its_address() {
        let registry = LocalRegistry::new();
        let server = try_create_raft_server(config(&registry, vec![Address::new("solo")], false))
            .await
            .unwrap();
        assert_eq!(server.address(), &Address::new("solo"));

        let duplicate = try_create_raft_server(config(&registry, vec![], false)).await;
        assert!(matches!(
            duplicate,
            Err(RaftServerCreationError::Transport(TransportError::AddressInUse(_)))
        ));

        let deadline = Instant::now() + Duration::from_secs(5);
        while server.role() != RaftRole::Leader {
            assert!(Instant::now() < deadline, "No leader: {:?}", server.role());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        server.shutdown().await;
    }
}
