//! Runs a 3 member in-process cluster with a replicated counter, adds to it through a client and
//! reads it back at every query consistency level.
use bytes::Bytes;
use raft_rsm::{
    Address, ClientConfig, ClientOptions, Commit, CommandConsistency, HandlerError, LocalRegistry, QueryConsistency,
    RaftClient, RaftOptions, RaftRole, RaftServer, RaftServerConfig, Sessions, StateMachine, StateMachineExecutor,
};
use slog::Drain;
use std::error::Error;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// Accumulator sums every "add" and tells every open session about the new total.
#[derive(Default)]
struct Accumulator {
    total: i64,
    sessions: Option<Sessions>,
}

impl Accumulator {
    fn add(&mut self, commit: Commit) -> Result<Bytes, HandlerError> {
        let amount: i64 = parse(commit.payload())?;
        self.total += amount;

        if let Some(sessions) = &self.sessions {
            for session in sessions.all() {
                session.publish("changed", self.total.to_string());
            }
        }
        // The total is rebuilt by replaying adds.
        commit.close();
        Ok(Bytes::from(self.total.to_string()))
    }
}

impl StateMachine for Accumulator {
    fn configure(&mut self, executor: &mut StateMachineExecutor<Self>) {
        self.sessions = Some(executor.sessions());
        executor.register("add", Accumulator::add);
        executor.register_query("get", |accumulator: &Accumulator, _: Commit| {
            Ok(Bytes::from(accumulator.total.to_string()))
        });
    }
}

fn parse(payload: &Bytes) -> Result<i64, HandlerError> {
    std::str::from_utf8(payload)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| HandlerError::Rejected(format!("Not a number: {:?}", payload)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let logger = create_root_logger_for_stdout();
    let registry = LocalRegistry::new();
    let members: Vec<Address> = (1..=3).map(|i| Address::new(format!("accumulator-{}", i))).collect();

    let mut servers = Vec::with_capacity(members.len());
    for address in &members {
        let server = raft_rsm::try_create_raft_server(RaftServerConfig {
            address: address.clone(),
            members: members.clone(),
            join: false,
            state_machine: Accumulator::default(),
            transport: Arc::new(registry.transport()),
            info_logger: logger.clone(),
            options: RaftOptions::default(),
        })
        .await?;
        servers.push(server);
    }
    let leader = wait_for_leader(&servers, Duration::from_secs(10)).await?;
    println!("{} is leading", leader);

    let (client, mut events) = RaftClient::connect(ClientConfig {
        client_id: "demo".to_string(),
        address: Address::new("demo-client"),
        members: members.clone(),
        transport: Arc::new(registry.transport()),
        logger: logger.clone(),
        options: ClientOptions::default(),
    })
    .await?;

    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            println!("Event {}: {}", event.name, String::from_utf8_lossy(&event.payload));
        }
    });

    for amount in &[5, 10, -3] {
        let total = client
            .submit_command("add", amount.to_string(), CommandConsistency::Linearizable)
            .await?;
        println!("Added {}, total is {}", amount, String::from_utf8_lossy(&total));
    }

    for consistency in &[
        QueryConsistency::Causal,
        QueryConsistency::Sequential,
        QueryConsistency::BoundedLinearizable,
        QueryConsistency::Linearizable,
    ] {
        let total = client.submit_query("get", Bytes::new(), *consistency).await?;
        println!("{:?} read: {}", consistency, String::from_utf8_lossy(&total));
    }

    if let Err(e) = client.submit_command("add", "lots", CommandConsistency::Sequential).await {
        println!("Rejected: {}", e);
    }

    client.close().await?;
    for server in servers {
        server.shutdown().await;
    }
    Ok(())
}

async fn wait_for_leader(servers: &[RaftServer], timeout: Duration) -> Result<Address, Box<dyn Error>> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(leader) = servers.iter().find(|server| server.role() == RaftRole::Leader) {
            return Ok(leader.address().clone());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    Err("No leader was elected".into())
}

fn create_root_logger_for_stdout() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
