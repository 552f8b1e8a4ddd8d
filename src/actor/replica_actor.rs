use crate::actor::event::Event;
use crate::commitlog::Log;
use crate::replica::{LogEntry, Replica};
use tokio::sync::mpsc;

/// ReplicaActor is replica logic in actor model.
pub(crate) struct ReplicaActor<L>
where
    L: Log<LogEntry>,
{
    logger: slog::Logger,
    receiver: mpsc::Receiver<Event>,
    replica: Replica<L>,
}

impl<L> ReplicaActor<L>
where
    L: Log<LogEntry>,
{
    pub(crate) fn new(logger: slog::Logger, receiver: mpsc::Receiver<Event>, replica: Replica<L>) -> Self {
        ReplicaActor {
            logger,
            receiver,
            replica,
        }
    }

    pub(crate) async fn run_event_loop(mut self) {
        while let Some(event) = self.receiver.recv().await {
            self.handle_event(event);

            if self.replica.is_halted() {
                slog::crit!(self.logger, "Replica halted. Event loop is exiting.");
                return;
            }
        }

        slog::info!(self.logger, "Every actor client is gone. Event loop is exiting.");
    }

    // This must NOT be async. Any long running work must be spawned on another task and come back
    // as an event to this actor.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::RequestVote(request, callback) => {
                let result = self.replica.server_handle_request_vote(request);
                callback.send(result);
            }
            Event::RequestVoteReplyFromPeer(reply) => {
                self.replica.handle_request_vote_reply_from_peer(reply);
            }
            Event::AppendEntries(request, callback) => {
                let result = self.replica.server_handle_append_entries(request);
                callback.send(result);
            }
            Event::AppendEntriesReplyFromPeer(reply) => {
                self.replica.handle_append_entries_reply_from_peer(reply);
            }
            Event::TimeoutNow(request, callback) => {
                let result = self.replica.server_handle_timeout_now(request);
                callback.send(result);
            }
            Event::PublishReplyFromClient(reply) => {
                self.replica.handle_publish_reply_from_client(reply);
            }
            Event::Join(request, callback) => self.replica.handle_join(request, callback),
            Event::Leave(request, callback) => self.replica.handle_leave(request, callback),
            Event::OpenSession(request, callback) => self.replica.handle_open_session(request, callback),
            Event::KeepAlive(request, callback) => self.replica.handle_keep_alive(request, callback),
            Event::Command(request, callback) => self.replica.handle_command(request, callback),
            Event::CloseSession(request, callback) => self.replica.handle_close_session(request, callback),
            Event::Query(request, callback) => self.replica.handle_query(request, callback),
            Event::LeaderTimer(tick) => {
                self.replica.handle_leader_timer(tick);
            }
            Event::FollowerTimeout => {
                self.replica.handle_follower_timeout();
            }
            Event::PrepareLeave(callback) => {
                self.replica.prepare_leave();
                callback.send(());
            }
            Event::Status(callback) => callback.send(self.replica.status()),
            Event::LogDigest(callback) => callback.send(self.replica.log_digest()),
        }
    }
}
