use crate::executor::{Commit, Session, Sessions};
use bytes::Bytes;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The operation was applied and deterministically refused, e.g. an invalid argument. The
    /// message is returned to the client and the node keeps running.
    #[error("Operation rejected: {0}")]
    Rejected(String),
    /// The state machine can't safely continue. The node stops applying entries.
    #[error("Fatal state machine failure: {0}")]
    Fatal(String),
}

/// StateMachine is the replicated application logic.
///
/// It's applied on every member in log order, so handlers must be deterministic: the same
/// sequence of commits produces the same state and the same outputs everywhere. Use
/// `Commit::time()` rather than the local clock.
pub trait StateMachine: Send + Sized + 'static {
    /// Registers the operation handlers. Called once when the member starts.
    fn configure(&mut self, executor: &mut StateMachineExecutor<Self>);

    /// A session was opened.
    fn register(&mut self, _session: &Session) {}

    /// A session was expired by the cluster because its keep-alives stopped.
    fn expire(&mut self, _session: &Session) {}

    /// A session was closed, by its client or following `expire()`.
    fn close(&mut self, _session: &Session) {}
}

type Handler<M> = Box<dyn FnMut(&mut M, Commit) -> Result<Bytes, HandlerError> + Send>;
type QueryHandler<M> = Box<dyn Fn(&M, Commit) -> Result<Bytes, HandlerError> + Send>;

/// StateMachineExecutor holds the handler tables of a state machine, keyed by operation type.
/// Commands and queries are registered separately: a query handler only gets to read the state.
pub struct StateMachineExecutor<M> {
    handlers: HashMap<String, Handler<M>>,
    query_handlers: HashMap<String, QueryHandler<M>>,
    sessions: Sessions,
}

impl<M: StateMachine> StateMachineExecutor<M> {
    /// Routes every operation of `op_type` to `handler`, replacing any previous handler.
    ///
    /// The handler owns the commit. It should `clean()` it once nothing the state machine keeps
    /// depends on the entry, or `close()` it (or keep it) if the entry must survive compaction.
    pub fn register<T, F>(&mut self, op_type: T, handler: F)
    where
        T: Into<String>,
        F: FnMut(&mut M, Commit) -> Result<Bytes, HandlerError> + Send + 'static,
    {
        self.handlers.insert(op_type.into(), Box::new(handler));
    }

    /// Routes every query of `op_type` to `handler`, replacing any previous query handler.
    ///
    /// Queries run on a single member and are never logged, so the handler can't change the state
    /// machine. Events published from a query are dropped.
    pub fn register_query<T, F>(&mut self, op_type: T, handler: F)
    where
        T: Into<String>,
        F: Fn(&M, Commit) -> Result<Bytes, HandlerError> + Send + 'static,
    {
        self.query_handlers.insert(op_type.into(), Box::new(handler));
    }

    /// Open sessions, usable from handlers to broadcast events.
    pub fn sessions(&self) -> Sessions {
        self.sessions.clone()
    }
}

/// MachineRunner erases the state machine's type so the replica only deals with commits.
pub(crate) trait MachineRunner: Send {
    /// None if there is no handler for the commit's operation type.
    fn execute(&mut self, commit: Commit) -> Option<Result<Bytes, HandlerError>>;

    /// None if there is no query handler for the commit's operation type.
    fn query(&self, commit: Commit) -> Option<Result<Bytes, HandlerError>>;

    fn on_register(&mut self, session: &Session);

    fn on_expire(&mut self, session: &Session);

    fn on_close(&mut self, session: &Session);
}

pub(crate) struct Machine<M: StateMachine> {
    machine: M,
    executor: StateMachineExecutor<M>,
}

impl<M: StateMachine> Machine<M> {
    pub(crate) fn new(mut machine: M, sessions: Sessions) -> Self {
        let mut executor = StateMachineExecutor {
            handlers: HashMap::new(),
            query_handlers: HashMap::new(),
            sessions,
        };
        machine.configure(&mut executor);

        Machine { machine, executor }
    }
}

impl<M: StateMachine> MachineRunner for Machine<M> {
    fn execute(&mut self, commit: Commit) -> Option<Result<Bytes, HandlerError>> {
        match self.executor.handlers.get_mut(commit.op_type()) {
            Some(handler) => Some(handler(&mut self.machine, commit)),
            None => {
                // Nothing can ever reference an unhandled entry.
                commit.clean();
                None
            }
        }
    }

    fn query(&self, commit: Commit) -> Option<Result<Bytes, HandlerError>> {
        let handler = self.executor.query_handlers.get(commit.op_type())?;
        Some(handler(&self.machine, commit))
    }

    fn on_register(&mut self, session: &Session) {
        self.machine.register(session);
    }

    fn on_expire(&mut self, session: &Session) {
        self.machine.expire(session);
    }

    fn on_close(&mut self, session: &Session) {
        self.machine.close(session);
    }
}
