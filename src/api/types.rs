use crate::api::RaftRole;
use crate::replica;

/// A member of the cluster configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RaftMember {
    pub address: String,
    /// False while the member is catching up as a non-voter.
    pub voting: bool,
}

/// Point-in-time view of a member's replication progress.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RaftStatus {
    pub term: u64,
    pub role: RaftRole,
    pub commit_index: u64,
    pub applied_index: u64,
    /// First index still in the log. Everything before it was compacted.
    pub first_log_index: u64,
    pub last_log_index: u64,
    pub members: Vec<RaftMember>,
}

impl From<replica::Member> for RaftMember {
    fn from(member: replica::Member) -> Self {
        RaftMember {
            address: member.address.into_inner(),
            voting: member.active,
        }
    }
}

impl From<replica::ReplicaStatus> for RaftStatus {
    fn from(status: replica::ReplicaStatus) -> Self {
        RaftStatus {
            term: status.term,
            role: RaftRole::from(status.role),
            commit_index: status.commit_index,
            applied_index: status.applied_index,
            first_log_index: status.first_log_index,
            last_log_index: status.last_log_index,
            members: status.members.into_iter().map(RaftMember::from).collect(),
        }
    }
}
