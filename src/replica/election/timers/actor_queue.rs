use crate::actor::Event;
use crate::replica::LeaderTimerTick;
use tokio::sync::mpsc;
use tokio::time::Duration;

/// ActorQueue stands in for the replica actor and checks what timers send it.
pub(super) struct ActorQueue {
    receiver: mpsc::Receiver<Event>,
}

impl ActorQueue {
    pub(super) fn new(receiver: mpsc::Receiver<Event>) -> Self {
        ActorQueue { receiver }
    }

    pub(super) async fn expect_leader_tick(&mut self, expected: &LeaderTimerTick) {
        match self.next().await {
            Event::LeaderTimer(tick) => assert_eq!(&tick, expected),
            other => panic!("Expected a leader tick, got {:?}", other),
        }
    }

    pub(super) async fn expect_follower_timeout(&mut self) {
        match self.next().await {
            Event::FollowerTimeout => {}
            other => panic!("Expected a follower timeout, got {:?}", other),
        }
    }

    pub(super) async fn expect_quiet(&mut self) {
        if let Ok(event) = tokio::time::timeout(Duration::from_millis(10), self.receiver.recv()).await {
            panic!("Expected no event, got {:?}", event);
        }
    }

    async fn next(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(5), self.receiver.recv())
            .await
            .expect("No event within 5s")
            .expect("Every actor client dropped")
    }
}
