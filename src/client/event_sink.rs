use crate::protocol::{ProtocolError, PublishOk, PublishRequest, Request, Response, SessionId};
use crate::transport::RequestHandler;
use bytes::Bytes;
use std::sync::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// An event the state machine published to this client's session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionEvent {
    pub name: String,
    pub payload: Bytes,
}

/// EventStream yields the session's events in the order the state machine published them.
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<SessionEvent>,
}

impl EventStream {
    /// Waits for the next event. None once the client is closed.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        self.receiver.recv().await
    }
}

/// EventSink receives the event batches the leader pushes to the client. Batches are chained by
/// index, so it accepts exactly the one following the last it accepted and answers everything
/// else with the index it expects to continue from.
pub(super) struct EventSink {
    logger: slog::Logger,
    state: Mutex<SinkState>,
    received: watch::Receiver<u64>,
}

struct SinkState {
    session_id: Option<SessionId>,
    last_event_index: u64,
    sender: mpsc::UnboundedSender<SessionEvent>,
    received: watch::Sender<u64>,
}

impl EventSink {
    pub(super) fn new(logger: slog::Logger) -> (Self, EventStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (received_tx, received_rx) = watch::channel(0);
        let sink = EventSink {
            logger,
            state: Mutex::new(SinkState {
                session_id: None,
                last_event_index: 0,
                sender,
                received: received_tx,
            }),
            received: received_rx,
        };
        (sink, EventStream { receiver })
    }

    pub(super) fn set_session(&self, session_id: SessionId) {
        self.lock().session_id = Some(session_id);
    }

    pub(super) fn last_event_index(&self) -> u64 {
        self.lock().last_event_index
    }

    /// Waits until every event up to `event_index` was received. False if `deadline` passed first.
    pub(super) async fn wait_for(&self, event_index: u64, deadline: Instant) -> bool {
        let mut received = self.received.clone();
        let wait = async {
            loop {
                let last = *received.borrow();
                if last >= event_index || received.changed().await.is_err() {
                    return;
                }
            }
        };
        tokio::time::timeout_at(deadline, wait).await.is_ok()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SinkState> {
        self.state.lock().expect("EventSink lock is poisoned")
    }

    fn accept(&self, batch: PublishRequest) -> Result<PublishOk, ProtocolError> {
        let mut state = self.lock();
        match state.session_id {
            Some(session_id) if session_id == batch.session_id => {}
            // Not open yet. The leader retries later.
            None => {
                return Ok(PublishOk {
                    event_index: state.last_event_index,
                })
            }
            Some(_) => return Err(ProtocolError::UnknownSession),
        }

        if batch.previous_index != state.last_event_index {
            slog::debug!(
                self.logger,
                "Ignoring event batch {} chained to {}. Expecting one after {}.",
                batch.event_index,
                batch.previous_index,
                state.last_event_index
            );
            return Ok(PublishOk {
                event_index: state.last_event_index,
            });
        }

        for event in batch.events {
            let _ = state.sender.send(SessionEvent {
                name: event.name,
                payload: event.payload,
            });
        }
        state.last_event_index = batch.event_index;
        let _ = state.received.send(batch.event_index);
        Ok(PublishOk {
            event_index: batch.event_index,
        })
    }
}

#[async_trait::async_trait]
impl RequestHandler for EventSink {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Publish(batch) => Response::Publish(self.accept(batch)),
            _ => Response::Unsupported,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PublishedEvent;
    use tokio::time::Duration;

    fn batch(event_index: u64, previous_index: u64, names: &[&str]) -> PublishRequest {
        PublishRequest {
            session_id: SessionId::new(3),
            event_index,
            previous_index,
            events: names
                .iter()
                .map(|name| PublishedEvent {
                    name: name.to_string(),
                    payload: Bytes::new(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn accepts_only_the_next_batch_in_the_chain() {
        let (sink, mut stream) = EventSink::new(slog::Logger::root(slog::Discard, slog::o!()));
        assert_eq!(sink.accept(batch(5, 0, &["early"])).unwrap().event_index, 0);

        sink.set_session(SessionId::new(3));
        assert_eq!(sink.accept(batch(5, 0, &["a", "b"])).unwrap().event_index, 5);
        // Duplicate, then a gap.
        assert_eq!(sink.accept(batch(5, 0, &["a", "b"])).unwrap().event_index, 5);
        assert_eq!(sink.accept(batch(9, 7, &["lost"])).unwrap().event_index, 5);
        assert_eq!(sink.accept(batch(7, 5, &["c"])).unwrap().event_index, 7);

        let mut names = Vec::new();
        for _ in 0..3 {
            names.push(stream.next().await.unwrap().name);
        }
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(sink.last_event_index(), 7);

        let mut other = batch(8, 7, &["x"]);
        other.session_id = SessionId::new(4);
        assert_eq!(sink.accept(other).unwrap_err(), ProtocolError::UnknownSession);
    }

    #[tokio::test]
    async fn waits_for_events_to_arrive() {
        let (sink, _stream) = EventSink::new(slog::Logger::root(slog::Discard, slog::o!()));
        sink.set_session(SessionId::new(3));
        let deadline = Instant::now() + Duration::from_millis(50);
        assert!(sink.wait_for(0, deadline).await);
        assert!(!sink.wait_for(4, deadline).await);

        sink.accept(batch(4, 0, &["a"])).unwrap();
        assert!(sink.wait_for(4, Instant::now() + Duration::from_millis(50)).await);
    }
}
