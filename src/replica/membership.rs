use crate::replica::Member;
use crate::transport::Address;

/// Configuration is the set of cluster members introduced by the configuration entry at `index`.
/// Index 0 is the bootstrap configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Configuration {
    index: u64,
    members: Vec<Member>,
}

impl Configuration {
    pub(crate) fn new(index: u64, members: Vec<Member>) -> Self {
        Configuration { index, members }
    }

    pub(crate) fn index(&self) -> u64 {
        self.index
    }

    pub(crate) fn members(&self) -> &[Member] {
        &self.members
    }

    pub(crate) fn addresses(&self) -> Vec<Address> {
        self.members.iter().map(|m| m.address.clone()).collect()
    }

    pub(crate) fn voters(&self) -> Vec<Address> {
        self.members
            .iter()
            .filter(|m| m.active)
            .map(|m| m.address.clone())
            .collect()
    }

    pub(crate) fn contains(&self, address: &Address) -> bool {
        self.members.iter().any(|m| &m.address == address)
    }

    pub(crate) fn is_voter(&self, address: &Address) -> bool {
        self.members.iter().any(|m| &m.address == address && m.active)
    }

    /// Number of voters that form a majority.
    pub(crate) fn quorum(&self) -> usize {
        self.voters().len() / 2 + 1
    }

    /// Members of the configuration that would result from adding (or re-flagging) `address`.
    pub(crate) fn with_member(&self, address: &Address, active: bool) -> Vec<Member> {
        let mut members: Vec<Member> = self.members.iter().filter(|m| &m.address != address).cloned().collect();
        members.push(Member {
            address: address.clone(),
            active,
        });
        members
    }

    pub(crate) fn without_member(&self, address: &Address) -> Vec<Member> {
        self.members.iter().filter(|m| &m.address != address).cloned().collect()
    }
}

/// ClusterMembership tracks every configuration that's in the local log and not yet known to be
/// superseded by a committed one. The latest appended configuration is in effect, whether or not
/// it is committed.
pub(crate) struct ClusterMembership {
    my_address: Address,
    // Ascending by index. Never empty.
    history: Vec<Configuration>,
}

impl ClusterMembership {
    pub(crate) fn new(my_address: Address, bootstrap: Vec<Address>) -> Self {
        let members = bootstrap
            .into_iter()
            .map(|address| Member { address, active: true })
            .collect();

        ClusterMembership {
            my_address,
            history: vec![Configuration::new(0, members)],
        }
    }

    pub(crate) fn my_address(&self) -> &Address {
        &self.my_address
    }

    pub(crate) fn current(&self) -> &Configuration {
        self.history.last().expect("ClusterMembership history is never empty")
    }

    pub(crate) fn append(&mut self, index: u64, members: Vec<Member>) {
        // Re-appending the same index happens when a follower receives an entry it already has.
        self.history.retain(|c| c.index < index);
        self.history.push(Configuration::new(index, members));
    }

    /// Reverts configurations appended at or after `index`, because that part of the log was
    /// truncated. Returns true if the configuration in effect changed.
    pub(crate) fn truncate(&mut self, index: u64) -> bool {
        let before = self.history.len();
        let bootstrap_or_older = self.history.iter().take_while(|c| c.index < index || c.index == 0).count();
        self.history.truncate(bootstrap_or_older.max(1));
        before != self.history.len()
    }

    /// Forgets configurations that are superseded by a committed one.
    pub(crate) fn commit(&mut self, commit_index: u64) {
        let latest_committed = self
            .history
            .iter()
            .rposition(|c| c.index <= commit_index)
            .unwrap_or(0);
        self.history.drain(..latest_committed);
    }

    pub(crate) fn is_change_pending(&self, commit_index: u64) -> bool {
        self.current().index > commit_index
    }

    /// Every member other than me, voting or not.
    pub(crate) fn peers(&self) -> Vec<Address> {
        self.current()
            .members
            .iter()
            .filter(|m| m.address != self.my_address)
            .map(|m| m.address.clone())
            .collect()
    }

    pub(crate) fn voting_peers(&self) -> Vec<Address> {
        self.current()
            .voters()
            .into_iter()
            .filter(|address| address != &self.my_address)
            .collect()
    }

    pub(crate) fn am_voter(&self) -> bool {
        self.current().is_voter(&self.my_address)
    }

    pub(crate) fn am_member(&self) -> bool {
        self.current().contains(&self.my_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(s: &str) -> Address {
        Address::new(s)
    }

    fn membership() -> ClusterMembership {
        ClusterMembership::new(address("a"), vec![address("a"), address("b"), address("c")])
    }

    #[test]
    fn bootstrap_members_are_voters() {
        let m = membership();
        assert!(m.am_voter());
        assert_eq!(m.current().index(), 0);
        assert_eq!(m.current().quorum(), 2);
        assert_eq!(m.voting_peers(), vec![address("b"), address("c")]);
    }

    #[test]
    fn appended_configuration_takes_effect_and_reverts_on_truncate() {
        let mut m = membership();
        let joined = m.current().with_member(&address("d"), false);
        m.append(10, joined);

        assert_eq!(m.peers().len(), 3);
        assert_eq!(m.voting_peers().len(), 2);
        assert!(m.is_change_pending(9));
        assert!(!m.is_change_pending(10));

        assert!(m.truncate(10));
        assert_eq!(m.current().index(), 0);
        assert!(!m.truncate(5));
    }

    #[test]
    fn committed_configuration_drops_history() {
        let mut m = membership();
        m.append(4, m.current().with_member(&address("d"), false));
        m.append(8, m.current().with_member(&address("d"), true));
        m.commit(5);

        // Truncating below the committed configuration can't happen, but must not empty history.
        m.truncate(1);
        assert_eq!(m.current().index(), 4);
        assert_eq!(m.current().quorum(), 2);
    }

    #[test]
    fn joining_node_is_not_a_member_of_bootstrap() {
        let mut m = ClusterMembership::new(address("d"), vec![address("a"), address("b"), address("c")]);
        assert!(!m.am_member());
        assert!(!m.am_voter());

        m.append(3, m.current().with_member(&address("d"), false));
        assert!(m.am_member());
        assert!(!m.am_voter());

        m.append(5, m.current().with_member(&address("d"), true));
        assert!(m.am_voter());
        assert_eq!(m.current().quorum(), 3);
    }

    #[test]
    fn removing_member() {
        let mut m = membership();
        m.append(2, m.current().without_member(&address("a")));
        assert!(!m.am_member());
        assert_eq!(m.peers(), vec![address("b"), address("c")]);
    }
}
