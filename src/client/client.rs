use crate::client::event_sink::{EventSink, EventStream};
use crate::client::{ClientError, ClientOptions, ClientOptionsValidated, ClusterConnection};
use crate::protocol::{
    CloseSessionRequest, CommandConsistency, CommandRequest, KeepAliveRequest, OpenSessionRequest, Operation,
    QueryConsistency, QueryRequest, SessionId,
};
use crate::transport::{Address, Listener, Transport};
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::convert::TryFrom;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::time::{Duration, Instant};

pub struct ClientConfig {
    /// Identifies the client in the cluster's logs.
    pub client_id: String,
    /// Where the client listens for the events the cluster pushes to its session.
    pub address: Address,
    /// Any subset of the cluster. The client learns the rest from replies.
    pub members: Vec<Address>,
    pub transport: Arc<dyn Transport>,
    pub logger: slog::Logger,
    pub options: ClientOptions,
}

/// RaftClient is a session with the cluster. Commands submitted through it are applied in
/// submission order and at most once, and the events the state machine publishes to the session
/// arrive on the `EventStream` returned alongside it.
///
/// The session is kept alive in the background until the client is closed or dropped.
pub struct RaftClient {
    shared: Arc<ClientShared>,
    _event_listener: Listener,
}

struct ClientShared {
    logger: slog::Logger,
    connection: ClusterConnection,
    events: Arc<EventSink>,
    session_id: SessionId,
    options: ClientOptionsValidated,
    sequences: Mutex<Sequences>,
    // Highest log index any reply reported, for causal reads.
    highest_index: AtomicU64,
    closed: AtomicBool,
}

/// Tracks command sequence numbers. `contiguous` is the highest number up to which every command
/// got its response, so the cluster may drop the cached results.
///
/// A command that timed out may still be applied, and the cluster parks every later sequence
/// until it sees this one. It stays in `unanswered` and goes out again under the same number.
#[derive(Default)]
struct Sequences {
    next: u64,
    contiguous: u64,
    done: BTreeSet<u64>,
    unanswered: BTreeMap<u64, CommandRequest>,
}

impl Sequences {
    fn start(&mut self) -> u64 {
        self.next += 1;
        self.next
    }

    fn finish(&mut self, sequence: u64) {
        self.unanswered.remove(&sequence);
        if sequence > self.contiguous {
            self.done.insert(sequence);
        }
        while self.done.remove(&(self.contiguous + 1)) {
            self.contiguous += 1;
        }
    }

    fn defer(&mut self, request: CommandRequest) {
        let sequence = request.sequence;
        if sequence > self.contiguous && !self.done.contains(&sequence) {
            self.unanswered.insert(sequence, request);
        }
    }
}

impl RaftClient {
    /// Opens a session with the cluster.
    pub async fn connect(config: ClientConfig) -> Result<(RaftClient, EventStream), ClientError> {
        let options =
            ClientOptionsValidated::try_from(config.options).map_err(|e| ClientError::IllegalOptions(e.to_string()))?;
        let logger = config.logger.new(slog::o!("Client" => config.client_id.clone()));

        let (events, event_stream) = EventSink::new(logger.new(slog::o!("Component" => "EventSink")));
        let events = Arc::new(events);
        let event_listener = config.transport.listen(&config.address, events.clone()).await?;

        let connection = ClusterConnection::new(
            logger.new(slog::o!("Component" => "Connection")),
            config.transport,
            config.members,
            options.clone(),
        );
        let opened = connection
            .call(OpenSessionRequest {
                client_id: config.client_id,
                client_address: Some(config.address),
            })
            .await?;
        events.set_session(opened.session_id);
        slog::info!(logger, "Opened session {:?}", opened.session_id);

        let keep_alive_interval = options
            .keep_alive_interval
            .unwrap_or_else(|| Duration::from_millis((opened.timeout_ms / 2).max(1)));

        let shared = Arc::new(ClientShared {
            logger: logger.new(slog::o!("Session" => opened.session_id.as_u64())),
            connection,
            events,
            session_id: opened.session_id,
            options,
            sequences: Mutex::new(Sequences::default()),
            highest_index: AtomicU64::new(opened.session_id.as_u64()),
            closed: AtomicBool::new(false),
        });
        tokio::spawn(run_keep_alive(Arc::downgrade(&shared), keep_alive_interval));

        let client = RaftClient {
            shared,
            _event_listener: event_listener,
        };
        Ok((client, event_stream))
    }

    pub fn session_id(&self) -> SessionId {
        self.shared.session_id
    }

    /// The leader the client is currently talking to, if it found one.
    pub fn leader(&self) -> Option<Address> {
        self.shared.connection.leader()
    }

    /// Submits a command to be applied to the replicated state machine and returns its output.
    ///
    /// The output is returned only after every event the session was sent up to that command
    /// arrived on the event stream.
    ///
    /// Commands that earlier calls gave up on are resubmitted first. If the cluster still doesn't
    /// answer them, this fails without submitting the new command.
    pub async fn submit_command<T: Into<String>, P: Into<Bytes>>(
        &self,
        op_type: T,
        payload: P,
        consistency: CommandConsistency,
    ) -> Result<Bytes, ClientError> {
        let shared = &self.shared;
        let deadline = Instant::now() + shared.options.request_timeout;
        let sequence = match consistency {
            CommandConsistency::None => 0,
            CommandConsistency::Sequential | CommandConsistency::Linearizable => {
                shared.resubmit_unanswered().await?;
                shared.sequences().start()
            }
        };

        let request = CommandRequest {
            session_id: shared.session_id,
            sequence,
            operation: Operation::new(op_type, payload),
            consistency,
        };
        let result = shared.connection.call(request.clone()).await;
        if sequence > 0 {
            shared.settle(request, &result);
        }

        let ok = result?;
        shared.observe_index(ok.index);
        shared.await_events(ok.event_index, deadline).await?;
        Ok(ok.output)
    }

    /// Reads the state machine without changing it. See `QueryConsistency` for what each level
    /// guarantees.
    pub async fn submit_query<T: Into<String>, P: Into<Bytes>>(
        &self,
        op_type: T,
        payload: P,
        consistency: QueryConsistency,
    ) -> Result<Bytes, ClientError> {
        let shared = &self.shared;
        let deadline = Instant::now() + shared.options.request_timeout;
        let sequence = shared.sequences().next;

        let ok = shared
            .connection
            .call(QueryRequest {
                session_id: shared.session_id,
                sequence,
                index: shared.highest_index.load(Ordering::SeqCst),
                operation: Operation::new(op_type, payload),
                consistency,
            })
            .await?;
        shared.observe_index(ok.index);
        shared.await_events(ok.event_index, deadline).await?;
        Ok(ok.output)
    }

    /// Closes the session. The state machine's `close` callback runs for it, and the event stream
    /// ends.
    pub async fn close(self) -> Result<(), ClientError> {
        let shared = &self.shared;
        shared.closed.store(true, Ordering::SeqCst);
        shared
            .connection
            .call(CloseSessionRequest {
                session_id: shared.session_id,
            })
            .await?;
        slog::info!(shared.logger, "Closed session");
        Ok(())
    }
}

impl ClientShared {
    fn sequences(&self) -> MutexGuard<'_, Sequences> {
        self.sequences.lock().expect("Sequences lock is poisoned")
    }

    fn observe_index(&self, index: u64) {
        self.highest_index.fetch_max(index, Ordering::SeqCst);
    }

    /// Records whether a sequenced command got a definite answer.
    fn settle<T>(&self, request: CommandRequest, result: &Result<T, ClientError>) {
        match result {
            Ok(_) | Err(ClientError::Application(_)) | Err(ClientError::SessionExpired) => {
                self.sequences().finish(request.sequence)
            }
            Err(e) => {
                slog::debug!(self.logger, "Command {} is still unanswered: {}", request.sequence, e);
                self.sequences().defer(request);
            }
        }
    }

    async fn resubmit_unanswered(&self) -> Result<(), ClientError> {
        let unanswered: Vec<CommandRequest> = self.sequences().unanswered.values().cloned().collect();
        for request in unanswered {
            slog::debug!(self.logger, "Resubmitting command {}", request.sequence);
            let result = self.connection.call(request.clone()).await;
            self.settle(request, &result);
            match result {
                Ok(ok) => self.observe_index(ok.index),
                Err(ClientError::Application(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn await_events(&self, event_index: u64, deadline: Instant) -> Result<(), ClientError> {
        if self.events.wait_for(event_index, deadline).await {
            Ok(())
        } else {
            slog::warn!(self.logger, "Events up to {} didn't arrive in time", event_index);
            Err(ClientError::Timeout(self.options.request_timeout))
        }
    }

    async fn keep_alive(&self, timeout: Duration) -> Result<(), ClientError> {
        let command_sequence = self.sequences().contiguous;
        self.connection
            .call_with_timeout(
                KeepAliveRequest {
                    session_id: self.session_id,
                    command_sequence,
                    event_index: self.events.last_event_index(),
                },
                timeout,
            )
            .await
            .map(|_| ())
    }
}

async fn run_keep_alive(shared: Weak<ClientShared>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;

        let shared = match shared.upgrade() {
            Some(shared) => shared,
            None => return,
        };
        if shared.closed.load(Ordering::SeqCst) {
            return;
        }

        match shared.keep_alive(interval).await {
            Ok(()) => {}
            Err(ClientError::SessionExpired) => {
                slog::warn!(shared.logger, "Session expired. Stopping keep-alives.");
                return;
            }
            Err(e) => slog::debug!(shared.logger, "Keep-alive failed: {}", e),
        }
    }
}
