use crate::executor::commit::DisposalToken;
use crate::protocol::{CommandOk, Operation, ProtocolError, PublishedEvent, SessionId};
use crate::transport::Address;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

pub(crate) type SharedRegistry = Arc<Mutex<SessionRegistry>>;

pub(crate) fn lock(registry: &SharedRegistry) -> MutexGuard<'_, SessionRegistry> {
    registry.lock().expect("SessionRegistry mutex guard poison")
}

/// Sessions is the state machine's view of every open session, e.g. to broadcast events.
#[derive(Clone)]
pub struct Sessions {
    registry: SharedRegistry,
}

impl Sessions {
    pub(crate) fn new(registry: SharedRegistry) -> Self {
        Sessions { registry }
    }

    /// Every open session, ordered by id.
    pub fn all(&self) -> Vec<Session> {
        let registry = lock(&self.registry);
        registry
            .sessions
            .iter()
            .map(|(id, state)| Session::new(*id, state.client_id.clone(), self.registry.clone()))
            .collect()
    }

    pub fn get(&self, id: SessionId) -> Option<Session> {
        let registry = lock(&self.registry);
        registry
            .sessions
            .get(&id)
            .map(|state| Session::new(id, state.client_id.clone(), self.registry.clone()))
    }

    pub fn len(&self) -> usize {
        lock(&self.registry).sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Session is a handle to one client session. It stays usable after the session ends, but then
/// `is_open()` is false and `publish()` does nothing.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    client_id: String,
    registry: SharedRegistry,
}

impl Session {
    pub(crate) fn new(id: SessionId, client_id: String, registry: SharedRegistry) -> Self {
        Session {
            id,
            client_id,
            registry,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_open(&self) -> bool {
        lock(&self.registry).sessions.contains_key(&self.id)
    }

    /// Queues an event for this session's client. Events can only be published while a committed
    /// entry is being applied, and only to sessions whose client accepts events. Returns whether
    /// the event was queued.
    pub fn publish<N: Into<String>, P: Into<Bytes>>(&self, name: N, payload: P) -> bool {
        let event = PublishedEvent {
            name: name.into(),
            payload: payload.into(),
        };
        lock(&self.registry).publish(self.id, event)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session({:?}, {})", self.id, self.client_id)
    }
}

/// EventBatch is every event published to one session while applying one log index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct EventBatch {
    pub(crate) event_index: u64,
    pub(crate) previous_index: u64,
    pub(crate) events: Vec<PublishedEvent>,
}

/// Command parked until the session's earlier sequence numbers have been applied.
pub(crate) struct DeferredCommand {
    pub(crate) index: u64,
    pub(crate) timestamp: u64,
    pub(crate) operation: Operation,
    pub(crate) token: DisposalToken,
}

pub(crate) struct SessionState {
    pub(crate) client_id: String,
    pub(crate) client_address: Option<Address>,
    pub(crate) timeout_ms: u64,
    pub(crate) last_keep_alive: u64,
    pub(crate) command_sequence: u64,
    pub(crate) results: BTreeMap<u64, Result<CommandOk, ProtocolError>>,
    pub(crate) deferred: BTreeMap<u64, DeferredCommand>,
    pub(crate) events: VecDeque<EventBatch>,
    pub(crate) event_index: u64,
    pub(crate) acked_event_index: u64,
    register_token: Option<DisposalToken>,
    keep_alive_token: Option<DisposalToken>,
}

impl SessionState {
    pub(crate) fn new(
        client_id: String,
        client_address: Option<Address>,
        timeout_ms: u64,
        opened_at: u64,
        register_token: DisposalToken,
    ) -> Self {
        SessionState {
            client_id,
            client_address,
            timeout_ms,
            last_keep_alive: opened_at,
            command_sequence: 0,
            results: BTreeMap::new(),
            deferred: BTreeMap::new(),
            events: VecDeque::new(),
            event_index: 0,
            acked_event_index: 0,
            register_token: Some(register_token),
            keep_alive_token: None,
        }
    }

    /// Records a committed keep-alive: refreshes the deadline and drops whatever the client
    /// reported it has already received.
    pub(crate) fn keep_alive(&mut self, timestamp: u64, command_sequence: u64, event_index: u64, token: DisposalToken) {
        self.last_keep_alive = self.last_keep_alive.max(timestamp);

        if let Some(previous) = self.keep_alive_token.replace(token) {
            previous.clean();
        }

        self.results = self.results.split_off(&(command_sequence + 1));

        if event_index > self.acked_event_index {
            self.acked_event_index = event_index.min(self.event_index);
        }
        while self.events.front().map_or(false, |batch| batch.event_index <= event_index) {
            self.events.pop_front();
        }
    }

    pub(crate) fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.last_keep_alive) >= self.timeout_ms
    }

    /// First queued batch after `event_index`.
    pub(crate) fn batch_after(&self, event_index: u64) -> Option<&EventBatch> {
        self.events.iter().find(|batch| batch.event_index > event_index)
    }

    /// Releases the session's retained entries. Returns the log indexes of the commands that were
    /// still parked.
    pub(crate) fn dispose(mut self) -> Vec<u64> {
        if let Some(token) = self.register_token.take() {
            token.clean();
        }
        if let Some(token) = self.keep_alive_token.take() {
            token.clean();
        }
        std::mem::take(&mut self.deferred)
            .into_iter()
            .map(|(_, deferred)| {
                let index = deferred.index;
                deferred.token.clean();
                index
            })
            .collect()
    }
}

struct ApplyContext {
    index: u64,
    receivers: BTreeSet<SessionId>,
}

/// SessionRegistry is the replicated session table. It's only mutated while applying committed
/// entries, so it's identical on every member that has applied the same index.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    pub(crate) sessions: BTreeMap<SessionId, SessionState>,
    context: Option<ApplyContext>,
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin_apply(&mut self, index: u64) {
        self.context = Some(ApplyContext {
            index,
            receivers: BTreeSet::new(),
        });
    }

    /// Ends the apply context. Returns the sessions that received events at that index.
    pub(crate) fn end_apply(&mut self) -> BTreeSet<SessionId> {
        self.context.take().map(|context| context.receivers).unwrap_or_default()
    }

    fn publish(&mut self, id: SessionId, event: PublishedEvent) -> bool {
        let index = match &self.context {
            Some(context) => context.index,
            None => return false,
        };

        let session = match self.sessions.get_mut(&id) {
            Some(session) if session.client_address.is_some() => session,
            _ => return false,
        };

        match session.events.back_mut() {
            Some(batch) if batch.event_index == index => batch.events.push(event),
            _ => {
                session.events.push_back(EventBatch {
                    event_index: index,
                    previous_index: session.event_index,
                    events: vec![event],
                });
                session.event_index = index;
            }
        }

        if let Some(context) = &mut self.context {
            context.receivers.insert(id);
        }
        true
    }

    /// Refreshes every session's keep-alive time, e.g. when a new leader takes over.
    pub(crate) fn touch_all(&mut self, timestamp: u64) {
        for session in self.sessions.values_mut() {
            session.last_keep_alive = session.last_keep_alive.max(timestamp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::commit::CommitTracker;

    fn registry_with_session(address: Option<&str>) -> (SharedRegistry, CommitTracker) {
        let tracker = CommitTracker::new();
        let mut registry = SessionRegistry::new();
        registry.sessions.insert(
            SessionId::new(1),
            SessionState::new("client".into(), address.map(Address::new), 1000, 0, tracker.hold(1)),
        );
        (Arc::new(Mutex::new(registry)), tracker)
    }

    fn session(registry: &SharedRegistry) -> Session {
        Session::new(SessionId::new(1), "client".into(), registry.clone())
    }

    #[test]
    fn publish_outside_apply_is_dropped() {
        let (registry, _tracker) = registry_with_session(Some("client:1"));
        assert!(!session(&registry).publish("e", "x"));
        assert!(lock(&registry).sessions[&SessionId::new(1)].events.is_empty());
    }

    #[test]
    fn publish_to_session_without_address_is_dropped() {
        let (registry, _tracker) = registry_with_session(None);
        lock(&registry).begin_apply(5);
        assert!(!session(&registry).publish("e", "x"));
        assert!(lock(&registry).end_apply().is_empty());
    }

    #[test]
    fn events_are_batched_per_index_and_chained() {
        let (registry, _tracker) = registry_with_session(Some("client:1"));
        let handle = session(&registry);

        lock(&registry).begin_apply(5);
        assert!(handle.publish("a", "1"));
        assert!(handle.publish("b", "2"));
        let receivers = lock(&registry).end_apply();
        assert_eq!(receivers.into_iter().collect::<Vec<_>>(), vec![SessionId::new(1)]);

        lock(&registry).begin_apply(9);
        assert!(handle.publish("c", "3"));
        lock(&registry).end_apply();

        let guard = lock(&registry);
        let state = &guard.sessions[&SessionId::new(1)];
        let batches: Vec<_> = state
            .events
            .iter()
            .map(|b| (b.event_index, b.previous_index, b.events.len()))
            .collect();
        assert_eq!(batches, vec![(5, 0, 2), (9, 5, 1)]);
        assert_eq!(state.event_index, 9);
    }

    #[test]
    fn keep_alive_trims_results_and_events() {
        let (registry, tracker) = registry_with_session(Some("client:1"));
        let handle = session(&registry);
        for index in [3, 4, 6].iter() {
            lock(&registry).begin_apply(*index);
            handle.publish("e", "x");
            lock(&registry).end_apply();
        }

        let mut guard = lock(&registry);
        let state = guard.sessions.get_mut(&SessionId::new(1)).unwrap();
        for seq in 1..=3 {
            state.results.insert(
                seq,
                Ok(CommandOk {
                    index: seq,
                    event_index: 0,
                    output: Bytes::new(),
                }),
            );
        }

        state.keep_alive(700, 2, 4, tracker.hold(7));
        assert_eq!(state.last_keep_alive, 700);
        assert_eq!(state.results.keys().copied().collect::<Vec<_>>(), vec![3]);
        assert_eq!(state.events.len(), 1);
        assert_eq!(state.acked_event_index, 4);
        assert_eq!(state.batch_after(4).map(|b| b.event_index), Some(6));

        // The register entry (1) and the latest keep-alive (7) are retained.
        state.keep_alive(800, 3, 6, tracker.hold(8));
        assert_eq!(tracker.low_water_mark(10), 0);
    }

    #[test]
    fn dispose_releases_retained_entries() {
        let (registry, tracker) = registry_with_session(Some("client:1"));
        let state = lock(&registry).sessions.remove(&SessionId::new(1)).unwrap();
        assert!(state.dispose().is_empty());
        assert_eq!(tracker.low_water_mark(3), 3);
    }

    #[test]
    fn expiry_uses_timeout() {
        let (registry, tracker) = registry_with_session(None);
        let guard = lock(&registry);
        let state = &guard.sessions[&SessionId::new(1)];
        assert!(!state.is_expired(999));
        assert!(state.is_expired(1000));
        drop(tracker);
    }
}
