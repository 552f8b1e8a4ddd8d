use crate::actor::WeakActorClient;
use crate::commitlog::Log;
use crate::executor::{Executor, StateMachine};
use crate::replica::election::{ElectionConfig, ElectionState, Participation};
use crate::replica::local_state::VolatileLocalState;
use crate::replica::membership::ClusterMembership;
use crate::replica::write_ahead_log::WriteAheadLog;
use crate::replica::{ElectionStateChangeListener, LogEntry, Replica, ReplicaOptions};
use crate::transport::{Address, Transport};
use std::io;
use std::sync::Arc;

/// Creates a replica that starts out as a follower.
///
/// A founding member bootstraps from `members` (itself included, whether listed or not). A
/// `joining` member starts outside the configuration, which it learns from the leader once the
/// cluster added it.
#[allow(clippy::too_many_arguments)]
pub(crate) fn create_replica<L, M>(
    logger: slog::Logger,
    my_address: Address,
    members: Vec<Address>,
    joining: bool,
    commit_log: L,
    state_machine: M,
    transport: Arc<dyn Transport>,
    actor_client: WeakActorClient,
    options: ReplicaOptions,
) -> Result<(Replica<L>, ElectionStateChangeListener), io::Error>
where
    L: Log<LogEntry>,
    M: StateMachine,
{
    let mut bootstrap: Vec<Address> = Vec::with_capacity(members.len() + 1);
    for address in members {
        if address != my_address && !bootstrap.contains(&address) {
            bootstrap.push(address);
        }
    }
    let participation = if joining {
        Participation::Joining
    } else {
        bootstrap.insert(0, my_address.clone());
        Participation::Active
    };
    let membership = ClusterMembership::new(my_address.clone(), bootstrap);

    let (election_state, election_state_change_listener) = ElectionState::new_follower(
        ElectionConfig {
            my_address: my_address.clone(),
            leader_heartbeat_duration: options.leader_heartbeat_duration,
            follower_min_timeout: options.follower_min_timeout,
            follower_max_timeout: options.follower_max_timeout,
        },
        actor_client.clone(),
        participation,
    );

    let wal = WriteAheadLog::new(logger.clone(), commit_log)?;
    let executor = Executor::new(logger.new(slog::o!("Component" => "Executor")), state_machine);
    let local_state = Box::new(VolatileLocalState::new(my_address.clone()));

    let replica = Replica::new(
        logger,
        my_address,
        membership,
        local_state,
        election_state,
        wal,
        executor,
        transport,
        actor_client,
        options,
    );

    Ok((replica, election_state_change_listener))
}
