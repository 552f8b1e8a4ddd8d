use bytes::Bytes;
use raft_rsm::{
    Address, ClientConfig, ClientError, ClientOptions, Commit, CommandConsistency, EventStream, LocalRegistry,
    QueryConsistency, RaftClient, RaftOptions, RaftRole, RaftServer, RaftServerConfig, Session, StateMachine,
    StateMachineExecutor,
};
use slog::Drain;
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

#[tokio::test]
async fn three_members_elect_one_leader_and_apply_commands() -> Result<(), Box<dyn Error>> {
    let mut cluster = TestCluster::start(3).await?;
    let leader = cluster.wait_for_stable_leader(Duration::from_secs(10)).await;

    let leaders: Vec<_> = cluster
        .servers
        .values()
        .filter(|server| server.role() == RaftRole::Leader)
        .collect();
    assert_eq!(leaders.len(), 1);
    assert_eq!(leaders[0].address(), &leader);

    let (client, _events) = cluster.connect(ClientOptions::default()).await?;
    let output = client
        .submit_command("append", "Hello world!", CommandConsistency::Linearizable)
        .await?;
    assert_eq!(output, Bytes::from("Hello world!"));

    // Every member applies it.
    let leader_status = cluster.servers[&leader].status().await?;
    for server in cluster.servers.values() {
        wait_for_applied(server, leader_status.commit_index, Duration::from_secs(5)).await;
    }

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn events_arrive_in_order_across_leader_failure() -> Result<(), Box<dyn Error>> {
    let mut cluster = TestCluster::start(5).await?;
    let leader = cluster.wait_for_stable_leader(Duration::from_secs(10)).await;
    let (client, mut events) = cluster.connect(ClientOptions::default()).await?;

    for i in 0..100u32 {
        if i == 50 {
            cluster.kill(&leader).await;
        }
        client
            .submit_command("announce", i.to_string(), CommandConsistency::Sequential)
            .await?;
    }

    for i in 0..100u32 {
        let event = tokio::time::timeout(Duration::from_secs(10), events.next())
            .await
            .expect("Timeout waiting for event")
            .expect("Event stream ended");
        assert_eq!(event.name, "announced");
        assert_eq!(event.payload, Bytes::from(i.to_string()));
    }

    let new_leader = cluster.wait_for_stable_leader(Duration::from_secs(10)).await;
    assert_ne!(new_leader, leader);

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn silent_sessions_expire_exactly_once() -> Result<(), Box<dyn Error>> {
    let mut cluster = TestCluster::start(3).await?;
    cluster.wait_for_stable_leader(Duration::from_secs(10)).await;

    let (client, _events) = cluster
        .connect(ClientOptions {
            keep_alive_interval: Some(Duration::from_secs(60)),
            ..ClientOptions::default()
        })
        .await?;
    client
        .submit_command("append", "soon gone", CommandConsistency::Sequential)
        .await?;

    let deadline = Instant::now() + Duration::from_secs(10);
    while cluster.probes.values().any(|probe| probe.expired() == 0) {
        assert!(Instant::now() < deadline, "Session didn't expire everywhere");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // Nothing expires it a second time.
    tokio::time::sleep(Duration::from_secs(1)).await;
    for probe in cluster.probes.values() {
        assert_eq!(probe.expired(), 1);
        assert_eq!(probe.closed(), 1);
    }

    let err = client
        .submit_command("append", "too late", CommandConsistency::Sequential)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::SessionExpired), "{:?}", err);

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn keep_alives_hold_sessions_open_until_closed() -> Result<(), Box<dyn Error>> {
    let mut cluster = TestCluster::start(3).await?;
    cluster.wait_for_stable_leader(Duration::from_secs(10)).await;
    let (client, _events) = cluster.connect(ClientOptions::default()).await?;

    tokio::time::sleep(SESSION_TIMEOUT * 2).await;
    client
        .submit_command("append", "still here", CommandConsistency::Sequential)
        .await?;
    client.close().await?;

    let deadline = Instant::now() + Duration::from_secs(5);
    while cluster.probes.values().any(|probe| probe.closed() == 0) {
        assert!(Instant::now() < deadline, "Close didn't reach every member");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    for probe in cluster.probes.values() {
        assert_eq!(probe.expired(), 0);
    }

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn every_consistency_level_reads_own_writes() -> Result<(), Box<dyn Error>> {
    let mut cluster = TestCluster::start(3).await?;
    cluster.wait_for_stable_leader(Duration::from_secs(10)).await;
    let (client, _events) = cluster.connect(ClientOptions::default()).await?;

    client.submit_command("append", "a", CommandConsistency::None).await?;
    client.submit_command("append", "b", CommandConsistency::Sequential).await?;
    client
        .submit_command("append", "c", CommandConsistency::Linearizable)
        .await?;

    for consistency in vec![
        QueryConsistency::Causal,
        QueryConsistency::Sequential,
        QueryConsistency::BoundedLinearizable,
        QueryConsistency::Linearizable,
    ] {
        let output = client.submit_query("count", Bytes::new(), consistency).await?;
        assert_eq!(output, Bytes::from("3"), "{:?}", consistency);
    }

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn joined_member_catches_up_with_the_same_log() -> Result<(), Box<dyn Error>> {
    let mut cluster = TestCluster::start(3).await?;
    let leader = cluster.wait_for_stable_leader(Duration::from_secs(10)).await;
    let (client, _events) = cluster.connect(ClientOptions::default()).await?;
    let client = Arc::new(client);

    // 10,000 entries from concurrent submitters sharing one session.
    let mut submitters = Vec::new();
    for task in 0..10u32 {
        let client = client.clone();
        submitters.push(tokio::spawn(async move {
            for i in 0..1000u32 {
                client
                    .submit_command("append", format!("{}-{}", task, i), CommandConsistency::Sequential)
                    .await?;
            }
            Ok::<(), ClientError>(())
        }));
    }
    for submitter in submitters {
        submitter.await??;
    }
    let committed = cluster.servers[&leader].status().await?.commit_index;
    assert!(committed > 10_000, "Only {} committed", committed);

    let joiner = cluster.add_member().await?;

    // Promoted to voter.
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = cluster.servers[&joiner].status().await?;
        let voters = status.members.iter().filter(|member| member.voting).count();
        if voters == 4 && matches!(status.role, RaftRole::Follower { leader: Some(_) }) {
            break;
        }
        assert!(Instant::now() < deadline, "Joiner wasn't promoted: {:?}", status);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    client
        .submit_command("append", "after join", CommandConsistency::Linearizable)
        .await?;
    let commit_index = cluster.servers[&leader].status().await?.commit_index;
    wait_for_applied(&cluster.servers[&joiner], commit_index, Duration::from_secs(5)).await;
    let count = client
        .submit_query("count", Bytes::new(), QueryConsistency::Linearizable)
        .await?;
    assert_eq!(count, Bytes::from("10001"));

    let leader_digest: HashMap<u64, u64> = cluster.servers[&leader].log_digest().await?.into_iter().collect();
    let joiner_digest = cluster.servers[&joiner].log_digest().await?;
    assert!(!joiner_digest.is_empty());
    for (index, term) in joiner_digest {
        if let Some(leader_term) = leader_digest.get(&index) {
            assert_eq!(*leader_term, term, "Logs diverge at {}", index);
        }
    }

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn leader_leaves_and_the_rest_carry_on() -> Result<(), Box<dyn Error>> {
    let mut cluster = TestCluster::start(3).await?;
    let leader = cluster.wait_for_stable_leader(Duration::from_secs(10)).await;
    let (client, _events) = cluster.connect(ClientOptions::default()).await?;
    client
        .submit_command("append", "before", CommandConsistency::Sequential)
        .await?;

    let departing = cluster.servers.remove(&leader).expect("Leader missing");
    departing.leave().await?;

    let new_leader = cluster.wait_for_stable_leader(Duration::from_secs(10)).await;
    assert_ne!(new_leader, leader);
    let status = cluster.servers[&new_leader].status().await?;
    let members: Vec<_> = status.members.iter().map(|member| member.address.clone()).collect();
    assert_eq!(members.len(), 2);
    assert!(!members.contains(&leader.to_string()));

    client
        .submit_command("append", "after", CommandConsistency::Sequential)
        .await?;
    let count = client
        .submit_query("count", Bytes::new(), QueryConsistency::Linearizable)
        .await?;
    assert_eq!(count, Bytes::from("2"));

    cluster.shutdown().await;
    Ok(())
}

// ------- Test cluster --------

const SESSION_TIMEOUT: Duration = Duration::from_millis(1500);

/// TestCluster owns one test's members and clients, all on a private in-process registry.
struct TestCluster {
    registry: LocalRegistry,
    logger: slog::Logger,
    addresses: Vec<Address>,
    servers: BTreeMap<Address, RaftServer>,
    probes: BTreeMap<Address, Probe>,
    num_clients: usize,
}

impl TestCluster {
    async fn start(num_members: usize) -> Result<Self, Box<dyn Error>> {
        let mut cluster = TestCluster {
            registry: LocalRegistry::new(),
            logger: create_root_logger_for_stdout(),
            addresses: Vec::new(),
            servers: BTreeMap::new(),
            probes: BTreeMap::new(),
            num_clients: 0,
        };
        cluster.addresses = (0..num_members).map(member_address).collect();
        for address in cluster.addresses.clone() {
            cluster.launch(address, false).await?;
        }

        Ok(cluster)
    }

    /// Starts a member outside of the cluster and has it join.
    async fn add_member(&mut self) -> Result<Address, Box<dyn Error>> {
        let address = member_address(self.addresses.len());
        self.launch(address.clone(), true).await?;
        self.addresses.push(address.clone());
        Ok(address)
    }

    async fn launch(&mut self, address: Address, join: bool) -> Result<(), Box<dyn Error>> {
        let probe = Probe::default();
        let server = raft_rsm::try_create_raft_server(RaftServerConfig {
            address: address.clone(),
            members: self.addresses.clone(),
            join,
            state_machine: Journal {
                entries: Vec::new(),
                probe: probe.clone(),
            },
            transport: Arc::new(self.registry.transport()),
            info_logger: self.logger.clone(),
            options: raft_options(),
        })
        .await?;

        self.servers.insert(address.clone(), server);
        self.probes.insert(address, probe);
        Ok(())
    }

    async fn connect(&mut self, options: ClientOptions) -> Result<(RaftClient, EventStream), ClientError> {
        self.num_clients += 1;
        RaftClient::connect(ClientConfig {
            client_id: format!("client-{}", self.num_clients),
            address: Address::new(format!("client-{}", self.num_clients)),
            members: self.servers.keys().cloned().collect(),
            transport: Arc::new(self.registry.transport()),
            logger: self.logger.clone(),
            options: ClientOptions {
                retry_backoff: Some(Duration::from_millis(20)),
                max_retry_backoff: Some(Duration::from_millis(200)),
                ..options
            },
        })
        .await
    }

    async fn kill(&mut self, address: &Address) {
        if let Some(server) = self.servers.remove(address) {
            server.shutdown().await;
        }
        self.probes.remove(address);
    }

    /// Waits until exactly one member leads and every other member follows it.
    async fn wait_for_stable_leader(&self, timeout: Duration) -> Address {
        let deadline = Instant::now() + timeout;
        loop {
            let leaders: Vec<&Address> = self
                .servers
                .iter()
                .filter(|(_, server)| server.role() == RaftRole::Leader)
                .map(|(address, _)| address)
                .collect();

            if let [leader] = leaders.as_slice() {
                let following = self.servers.iter().all(|(address, server)| {
                    address == *leader
                        || server.role()
                            == RaftRole::Follower {
                                leader: Some(leader.to_string()),
                            }
                });
                if following {
                    return (*leader).clone();
                }
            }

            assert!(Instant::now() < deadline, "Timeout waiting for a stable leader");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn shutdown(self) {
        for (_, server) in self.servers {
            server.shutdown().await;
        }
    }
}

async fn wait_for_applied(server: &RaftServer, index: u64, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        let status = server.status().await.expect("Replica exited");
        if status.applied_index >= index {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "{} applied {} of {}",
            server.address(),
            status.applied_index,
            index
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn raft_options() -> RaftOptions {
    RaftOptions {
        leader_heartbeat_duration: Some(Duration::from_millis(50)),
        follower_min_timeout: Some(Duration::from_millis(300)),
        follower_max_timeout: Some(Duration::from_millis(600)),
        leader_append_entries_timeout: Some(Duration::from_millis(100)),
        session_timeout: Some(SESSION_TIMEOUT),
        ..RaftOptions::default()
    }
}

fn member_address(id: usize) -> Address {
    Address::new(format!("member-{}", id + 1))
}

// ------- State machine --------

/// Counts the session callbacks a member's state machine received.
#[derive(Clone, Default)]
struct Probe {
    expired: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl Probe {
    fn expired(&self) -> usize {
        self.expired.load(Ordering::SeqCst)
    }

    fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Journal appends strings and announces payloads to the submitting session.
struct Journal {
    entries: Vec<String>,
    probe: Probe,
}

impl StateMachine for Journal {
    fn configure(&mut self, executor: &mut StateMachineExecutor<Self>) {
        executor.register("append", |journal: &mut Journal, commit: Commit| {
            let entry = String::from_utf8_lossy(commit.payload()).into_owned();
            journal.entries.push(entry.clone());
            // The journal is rebuilt from these entries, so they must survive compaction.
            commit.close();
            Ok(Bytes::from(entry))
        });
        executor.register("announce", |_: &mut Journal, commit: Commit| {
            commit.session().publish("announced", commit.payload().clone());
            commit.clean();
            Ok(Bytes::new())
        });
        executor.register_query("count", |journal: &Journal, _: Commit| {
            Ok(Bytes::from(journal.entries.len().to_string()))
        });
    }

    fn expire(&mut self, _session: &Session) {
        self.probe.expired.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&mut self, _session: &Session) {
        self.probe.closed.fetch_add(1, Ordering::SeqCst);
    }
}

fn create_root_logger_for_stdout() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog::LevelFilter::new(drain, slog::Level::Warning).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
