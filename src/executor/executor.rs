use crate::executor::commit::{CommitTracker, DisposalToken};
use crate::executor::session::{self, DeferredCommand, EventBatch, SessionRegistry, SessionState, SharedRegistry};
use crate::executor::state_machine::{HandlerError, Machine, MachineRunner};
use crate::executor::{Commit, Session, Sessions, StateMachine};
use crate::protocol::{CommandConsistency, CommandOk, Operation, ProtocolError, QueryOk, SessionId};
use crate::replica::{EntryKind, LogEntry};
use crate::transport::Address;
use bytes::Bytes;
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub(crate) enum ExecutorError {
    #[error("Handler for '{op_type}' failed at index {index}: {message}")]
    HandlerFailed {
        index: u64,
        op_type: String,
        message: String,
    },
}

/// Completion is the result of applying one entry, for whoever is waiting on it. Completions are
/// produced on every member, only the one holding the request uses them.
#[derive(Debug)]
pub(crate) enum Completion {
    SessionOpened {
        index: u64,
        session_id: SessionId,
        timeout_ms: u64,
    },
    KeptAlive {
        index: u64,
        result: Result<(), ProtocolError>,
    },
    /// Ok(false) if an expiry lost the race against a keep-alive.
    SessionClosed {
        index: u64,
        session_id: SessionId,
        result: Result<bool, ProtocolError>,
    },
    Command {
        index: u64,
        session_id: SessionId,
        result: Result<CommandOk, ProtocolError>,
        /// Sessions that were sent events while the command was applied.
        receivers: Vec<SessionId>,
    },
    Configured {
        index: u64,
    },
}

#[derive(Debug, Default)]
pub(crate) struct Applied {
    pub(crate) completions: Vec<Completion>,
    pub(crate) closed_sessions: Vec<SessionId>,
}

/// A session with events its client hasn't acknowledged yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DeliveryTarget {
    pub(crate) session_id: SessionId,
    pub(crate) address: Address,
    pub(crate) acked_event_index: u64,
    pub(crate) event_index: u64,
}

/// Executor applies committed entries, one at a time and in index order, to the sessions table and
/// the user's state machine.
pub(crate) struct Executor {
    logger: slog::Logger,
    machine: Box<dyn MachineRunner>,
    registry: SharedRegistry,
    tracker: CommitTracker,
    configuration_token: Option<DisposalToken>,
    last_applied: u64,
    last_timestamp: u64,
}

impl Executor {
    pub(crate) fn new<M: StateMachine>(logger: slog::Logger, state_machine: M) -> Self {
        let registry = Arc::new(Mutex::new(SessionRegistry::new()));
        let machine = Machine::new(state_machine, Sessions::new(registry.clone()));

        Executor {
            logger,
            machine: Box::new(machine),
            registry,
            tracker: CommitTracker::new(),
            configuration_token: None,
            last_applied: 0,
            last_timestamp: 0,
        }
    }

    pub(crate) fn last_applied(&self) -> u64 {
        self.last_applied
    }

    /// Moves the apply cursor to a log base adopted from the leader. Entries up to it were cleaned
    /// on every member, so none of them carry state.
    pub(crate) fn skip_to(&mut self, index: u64) {
        self.last_applied = self.last_applied.max(index);
    }

    /// Index up to which this member's applied entries may be compacted.
    pub(crate) fn low_water_mark(&self) -> u64 {
        self.tracker.low_water_mark(self.last_applied)
    }

    pub(crate) fn apply(&mut self, index: u64, entry: LogEntry) -> Result<Applied, ExecutorError> {
        // Leaders only append monotonic timestamps, but a new leader's clock may lag behind.
        let timestamp = entry.timestamp.max(self.last_timestamp);
        let mut applied = Applied::default();

        session::lock(&self.registry).begin_apply(index);
        let result = self.apply_kind(index, timestamp, entry.kind, &mut applied);
        let receivers: Vec<SessionId> = session::lock(&self.registry).end_apply().into_iter().collect();

        result?;
        self.last_applied = index;
        self.last_timestamp = timestamp;

        if !receivers.is_empty() {
            for completion in applied.completions.iter_mut() {
                if let Completion::Command { receivers: r, .. } = completion {
                    *r = receivers.clone();
                }
            }
        }

        Ok(applied)
    }

    fn apply_kind(
        &mut self,
        index: u64,
        timestamp: u64,
        kind: EntryKind,
        applied: &mut Applied,
    ) -> Result<(), ExecutorError> {
        match kind {
            EntryKind::NoOp => {
                session::lock(&self.registry).touch_all(timestamp);
            }
            EntryKind::Register {
                client_id,
                client_address,
                timeout_ms,
            } => {
                let session_id = SessionId::new(index);
                let session = Session::new(session_id, client_id.clone(), self.registry.clone());
                let state = SessionState::new(
                    client_id,
                    client_address,
                    timeout_ms,
                    timestamp,
                    self.tracker.hold(index),
                );
                session::lock(&self.registry).sessions.insert(session_id, state);
                slog::info!(self.logger, "Opened session {:?}", session_id; "Session" => session_id.as_u64());

                self.machine.on_register(&session);
                applied.completions.push(Completion::SessionOpened {
                    index,
                    session_id,
                    timeout_ms,
                });
            }
            EntryKind::KeepAlive {
                session_id,
                command_sequence,
                event_index,
            } => {
                let mut registry = session::lock(&self.registry);
                let result = match registry.sessions.get_mut(&session_id) {
                    Some(state) => {
                        state.keep_alive(timestamp, command_sequence, event_index, self.tracker.hold(index));
                        Ok(())
                    }
                    None => Err(ProtocolError::UnknownSession),
                };
                applied.completions.push(Completion::KeptAlive { index, result });
            }
            EntryKind::Unregister { session_id, expired } => {
                self.apply_unregister(index, timestamp, session_id, expired, applied);
            }
            EntryKind::Command {
                session_id,
                sequence,
                operation,
                consistency,
            } => {
                self.apply_command(index, timestamp, session_id, sequence, operation, consistency, applied)?;
            }
            EntryKind::Configuration { .. } => {
                if let Some(previous) = self.configuration_token.replace(self.tracker.hold(index)) {
                    previous.clean();
                }
                applied.completions.push(Completion::Configured { index });
            }
        }

        Ok(())
    }

    fn apply_unregister(
        &mut self,
        index: u64,
        timestamp: u64,
        session_id: SessionId,
        expired: bool,
        applied: &mut Applied,
    ) {
        let session = {
            let registry = session::lock(&self.registry);
            match registry.sessions.get(&session_id) {
                // A keep-alive committed after the expiry was proposed wins.
                Some(state) if expired && !state.is_expired(timestamp) => {
                    applied.completions.push(Completion::SessionClosed {
                        index,
                        session_id,
                        result: Ok(false),
                    });
                    return;
                }
                Some(state) => Session::new(session_id, state.client_id.clone(), self.registry.clone()),
                None => {
                    applied.completions.push(Completion::SessionClosed {
                        index,
                        session_id,
                        result: Err(ProtocolError::UnknownSession),
                    });
                    return;
                }
            }
        };

        if expired {
            slog::info!(self.logger, "Expiring session {:?}", session_id; "Session" => session_id.as_u64());
            self.machine.on_expire(&session);
        } else {
            slog::info!(self.logger, "Closing session {:?}", session_id; "Session" => session_id.as_u64());
        }
        self.machine.on_close(&session);

        let removed = session::lock(&self.registry).sessions.remove(&session_id);
        if let Some(state) = removed {
            for parked_index in state.dispose() {
                applied.completions.push(Completion::Command {
                    index: parked_index,
                    session_id,
                    result: Err(ProtocolError::UnknownSession),
                    receivers: vec![],
                });
            }
        }

        applied.closed_sessions.push(session_id);
        applied.completions.push(Completion::SessionClosed {
            index,
            session_id,
            result: Ok(true),
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_command(
        &mut self,
        index: u64,
        timestamp: u64,
        session_id: SessionId,
        sequence: u64,
        operation: Operation,
        consistency: CommandConsistency,
        applied: &mut Applied,
    ) -> Result<(), ExecutorError> {
        let applied_sequence = match session::lock(&self.registry).sessions.get(&session_id) {
            Some(state) => state.command_sequence,
            None => {
                applied.completions.push(Completion::Command {
                    index,
                    session_id,
                    result: Err(ProtocolError::UnknownSession),
                    receivers: vec![],
                });
                return Ok(());
            }
        };

        if consistency == CommandConsistency::None {
            let token = self.tracker.hold(index);
            let output = self.execute(index, timestamp, session_id, operation, token)?;
            let result = self.record(session_id, 0, index, output);
            applied.completions.push(Completion::Command {
                index,
                session_id,
                result,
                receivers: vec![],
            });
            return Ok(());
        }

        if sequence <= applied_sequence {
            // Retry of a command that was already applied.
            let result = self
                .cached_response(session_id, sequence)
                .unwrap_or(Err(ProtocolError::UnknownSession));
            self.tracker.hold(index).clean();
            applied.completions.push(Completion::Command {
                index,
                session_id,
                result,
                receivers: vec![],
            });
            return Ok(());
        }

        let token = self.tracker.hold(index);
        if sequence > applied_sequence + 1 {
            slog::debug!(
                self.logger,
                "Parking command {} of session {:?} until {} is applied",
                sequence,
                session_id,
                applied_sequence + 1
            );
            let mut registry = session::lock(&self.registry);
            if let Some(state) = registry.sessions.get_mut(&session_id) {
                state.deferred.insert(
                    sequence,
                    DeferredCommand {
                        index,
                        timestamp,
                        operation,
                        token,
                    },
                );
            }
            return Ok(());
        }

        let output = self.execute(index, timestamp, session_id, operation, token)?;
        let result = self.record(session_id, sequence, index, output);
        applied.completions.push(Completion::Command {
            index,
            session_id,
            result,
            receivers: vec![],
        });

        // Release whatever was waiting on this sequence number.
        loop {
            let next = {
                let mut registry = session::lock(&self.registry);
                registry.sessions.get_mut(&session_id).and_then(|state| {
                    let next_sequence = state.command_sequence + 1;
                    state.deferred.remove(&next_sequence).map(|parked| (next_sequence, parked))
                })
            };

            match next {
                None => break,
                Some((next_sequence, parked)) => {
                    let output = self.execute(parked.index, parked.timestamp, session_id, parked.operation, parked.token)?;
                    let result = self.record(session_id, next_sequence, parked.index, output);
                    applied.completions.push(Completion::Command {
                        index: parked.index,
                        session_id,
                        result,
                        receivers: vec![],
                    });
                }
            }
        }

        Ok(())
    }

    fn execute(
        &mut self,
        index: u64,
        timestamp: u64,
        session_id: SessionId,
        operation: Operation,
        token: DisposalToken,
    ) -> Result<Result<Bytes, ProtocolError>, ExecutorError> {
        let session = match self.session(session_id) {
            Some(session) => session,
            None => return Ok(Err(ProtocolError::UnknownSession)),
        };
        let op_type = operation.op_type.clone();
        let commit = Commit::new(index, timestamp, session, operation, Some(token));

        match self.machine.execute(commit) {
            Some(Ok(output)) => Ok(Ok(output)),
            Some(Err(HandlerError::Rejected(message))) => Ok(Err(ProtocolError::Application(message))),
            Some(Err(HandlerError::Fatal(message))) => Err(ExecutorError::HandlerFailed {
                index,
                op_type,
                message,
            }),
            None => Ok(Err(unknown_operation(&op_type))),
        }
    }

    fn record(
        &self,
        session_id: SessionId,
        sequence: u64,
        index: u64,
        output: Result<Bytes, ProtocolError>,
    ) -> Result<CommandOk, ProtocolError> {
        let mut registry = session::lock(&self.registry);
        let state = match registry.sessions.get_mut(&session_id) {
            Some(state) => state,
            None => return Err(ProtocolError::UnknownSession),
        };

        let result = output.map(|output| CommandOk {
            index,
            event_index: state.event_index,
            output,
        });
        if sequence > 0 {
            state.command_sequence = state.command_sequence.max(sequence);
            state.results.insert(sequence, result.clone());
        }
        result
    }

    /// Runs a read-only operation against the current state. Only query handlers run, so the log,
    /// the sessions and the state machine stay as they are. A fatal handler failure is reported to
    /// the caller rather than halting the member.
    pub(crate) fn query(&self, session_id: SessionId, operation: Operation) -> Result<QueryOk, ProtocolError> {
        let (session, event_index) = {
            let registry = session::lock(&self.registry);
            let state = registry.sessions.get(&session_id).ok_or(ProtocolError::UnknownSession)?;
            (
                Session::new(session_id, state.client_id.clone(), self.registry.clone()),
                state.event_index,
            )
        };
        let op_type = operation.op_type.clone();
        let commit = Commit::new(self.last_applied, self.last_timestamp, session, operation, None);

        match self.machine.query(commit) {
            Some(Ok(output)) => Ok(QueryOk {
                index: self.last_applied,
                event_index,
                output,
            }),
            Some(Err(HandlerError::Rejected(message))) => Err(ProtocolError::Application(message)),
            Some(Err(HandlerError::Fatal(message))) => {
                slog::error!(self.logger, "Query handler for '{}' failed: {}", op_type, message);
                Err(ProtocolError::Internal(message))
            }
            None => Err(ProtocolError::Application(format!("'{}' is not a query", op_type))),
        }
    }

    fn session(&self, session_id: SessionId) -> Option<Session> {
        let registry = session::lock(&self.registry);
        registry
            .sessions
            .get(&session_id)
            .map(|state| Session::new(session_id, state.client_id.clone(), self.registry.clone()))
    }

    pub(crate) fn has_session(&self, session_id: SessionId) -> bool {
        session::lock(&self.registry).sessions.contains_key(&session_id)
    }

    pub(crate) fn num_sessions(&self) -> usize {
        session::lock(&self.registry).sessions.len()
    }

    /// Result of an already applied command, or None if `sequence` hasn't been applied yet.
    pub(crate) fn cached_response(
        &self,
        session_id: SessionId,
        sequence: u64,
    ) -> Option<Result<CommandOk, ProtocolError>> {
        let registry = session::lock(&self.registry);
        let state = registry.sessions.get(&session_id)?;
        if sequence == 0 || sequence > state.command_sequence {
            return None;
        }

        Some(state.results.get(&sequence).cloned().unwrap_or_else(|| {
            Err(ProtocolError::Internal(format!(
                "Response to command {} is no longer cached",
                sequence
            )))
        }))
    }

    /// Sessions whose last committed keep-alive is older than their timeout at `now`.
    pub(crate) fn expired_sessions(&self, now: u64) -> Vec<SessionId> {
        session::lock(&self.registry)
            .sessions
            .iter()
            .filter(|(_, state)| state.is_expired(now))
            .map(|(id, _)| *id)
            .collect()
    }

    pub(crate) fn delivery_targets(&self) -> Vec<DeliveryTarget> {
        session::lock(&self.registry)
            .sessions
            .iter()
            .filter_map(|(id, state)| {
                let address = state.client_address.clone()?;
                if state.event_index <= state.acked_event_index {
                    return None;
                }
                Some(DeliveryTarget {
                    session_id: *id,
                    address,
                    acked_event_index: state.acked_event_index,
                    event_index: state.event_index,
                })
            })
            .collect()
    }

    pub(crate) fn batch_after(&self, session_id: SessionId, event_index: u64) -> Option<EventBatch> {
        session::lock(&self.registry)
            .sessions
            .get(&session_id)?
            .batch_after(event_index)
            .cloned()
    }

    /// Event index up to which the session's client acknowledged delivery through a committed
    /// keep-alive. None if the session is closed.
    pub(crate) fn acked_event_index(&self, session_id: SessionId) -> Option<u64> {
        session::lock(&self.registry)
            .sessions
            .get(&session_id)
            .map(|state| state.acked_event_index)
    }
}

fn unknown_operation(op_type: &str) -> ProtocolError {
    ProtocolError::Application(format!("No handler registered for operation '{}'", op_type))
}
