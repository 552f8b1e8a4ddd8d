mod client_handling;
mod election;
mod local_state;
mod membership;
mod membership_handling;
mod peer_rpc;
mod pending;
#[allow(clippy::module_inception)]
mod replica;
mod replica_api;
mod replica_wiring;
mod write_ahead_log;

pub(crate) use election::ElectionStateChangeListener;
pub(crate) use election::ElectionStateSnapshot;
pub(crate) use local_state::Term;
pub(crate) use replica::Replica;
pub(crate) use replica::ReplicaOptions;
pub(crate) use replica_api::*;
pub(crate) use replica_wiring::create_replica;
pub(crate) use write_ahead_log::EntryKind;
pub(crate) use write_ahead_log::LogEntry;
pub(crate) use write_ahead_log::Member;
