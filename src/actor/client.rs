use crate::actor::event::{Callback, Event};
use crate::protocol::{
    AppendOk, AppendRequest, CloseSessionOk, CloseSessionRequest, CommandOk, CommandRequest, JoinOk, JoinRequest,
    KeepAliveOk, KeepAliveRequest, LeaveOk, LeaveRequest, OpenSessionOk, OpenSessionRequest, PeerError, ProtocolError,
    QueryOk, QueryRequest, Reply, TimeoutNowOk, TimeoutNowRequest, VoteOk, VoteRequest,
};
use crate::replica;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
#[error("Raft replica event loop actor has exited")]
pub(crate) struct ActorExited;

/// ActorClient is the owning handle to the replica actor. The actor's event loop ends once every
/// ActorClient is dropped.
pub(crate) struct ActorClient {
    sender: Arc<mpsc::Sender<Event>>,
}

/// WeakActorClient is held by everything the actor spawns (timers, peer calls, the RPC server),
/// so none of them keeps the actor alive.
#[derive(Clone)]
pub(crate) struct WeakActorClient {
    sender: Weak<mpsc::Sender<Event>>,
}

impl ActorClient {
    pub(crate) fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        (ActorClient { sender: Arc::new(tx) }, rx)
    }

    pub(crate) fn weak(&self) -> WeakActorClient {
        WeakActorClient {
            sender: Arc::downgrade(&self.sender),
        }
    }

    pub(crate) async fn status(&self) -> Result<replica::ReplicaStatus, ActorExited> {
        call(&self.sender, Event::Status).await
    }

    pub(crate) async fn log_digest(&self) -> Result<Result<Vec<(u64, u64)>, String>, ActorExited> {
        call(&self.sender, Event::LogDigest).await
    }

    pub(crate) async fn prepare_leave(&self) -> Result<(), ActorExited> {
        call(&self.sender, Event::PrepareLeave).await
    }
}

impl WeakActorClient {
    // ------- Peer RPCs --------

    pub(crate) async fn request_vote(&self, request: VoteRequest) -> Result<VoteOk, PeerError> {
        self.call(|cb| Event::RequestVote(request, cb))
            .await
            .unwrap_or_else(|e| Err(PeerError::ServerFault(e.to_string())))
    }

    pub(crate) async fn append_entries(&self, request: AppendRequest) -> Result<AppendOk, PeerError> {
        self.call(|cb| Event::AppendEntries(request, cb))
            .await
            .unwrap_or_else(|e| Err(PeerError::ServerFault(e.to_string())))
    }

    pub(crate) async fn timeout_now(&self, request: TimeoutNowRequest) -> Result<TimeoutNowOk, PeerError> {
        self.call(|cb| Event::TimeoutNow(request, cb))
            .await
            .unwrap_or_else(|e| Err(PeerError::ServerFault(e.to_string())))
    }

    // ------- Membership and client RPCs --------

    pub(crate) async fn join(&self, request: JoinRequest) -> Reply<JoinOk> {
        self.call(|cb| Event::Join(request, cb)).await.unwrap_or_else(exited_reply)
    }

    pub(crate) async fn leave(&self, request: LeaveRequest) -> Reply<LeaveOk> {
        self.call(|cb| Event::Leave(request, cb)).await.unwrap_or_else(exited_reply)
    }

    pub(crate) async fn open_session(&self, request: OpenSessionRequest) -> Reply<OpenSessionOk> {
        self.call(|cb| Event::OpenSession(request, cb))
            .await
            .unwrap_or_else(exited_reply)
    }

    pub(crate) async fn keep_alive(&self, request: KeepAliveRequest) -> Reply<KeepAliveOk> {
        self.call(|cb| Event::KeepAlive(request, cb)).await.unwrap_or_else(exited_reply)
    }

    pub(crate) async fn command(&self, request: CommandRequest) -> Reply<CommandOk> {
        self.call(|cb| Event::Command(request, cb)).await.unwrap_or_else(exited_reply)
    }

    pub(crate) async fn query(&self, request: QueryRequest) -> Reply<QueryOk> {
        self.call(|cb| Event::Query(request, cb)).await.unwrap_or_else(exited_reply)
    }

    pub(crate) async fn close_session(&self, request: CloseSessionRequest) -> Reply<CloseSessionOk> {
        self.call(|cb| Event::CloseSession(request, cb))
            .await
            .unwrap_or_else(exited_reply)
    }

    // ------- Notifications from spawned tasks --------

    pub(crate) async fn notify_request_vote_reply_from_peer(
        &self,
        reply: replica::RequestVoteReplyFromPeer,
    ) -> Result<(), ActorExited> {
        self.send(Event::RequestVoteReplyFromPeer(reply)).await
    }

    pub(crate) async fn notify_append_entries_reply_from_peer(
        &self,
        reply: replica::AppendEntriesReplyFromPeer,
    ) -> Result<(), ActorExited> {
        self.send(Event::AppendEntriesReplyFromPeer(reply)).await
    }

    pub(crate) async fn notify_publish_reply_from_client(
        &self,
        reply: replica::PublishReplyFromClient,
    ) -> Result<(), ActorExited> {
        self.send(Event::PublishReplyFromClient(reply)).await
    }

    pub(crate) async fn leader_timer(&self, tick: replica::LeaderTimerTick) -> Result<(), ActorExited> {
        self.send(Event::LeaderTimer(tick)).await
    }

    pub(crate) async fn follower_timeout(&self) -> Result<(), ActorExited> {
        self.send(Event::FollowerTimeout).await
    }

    async fn call<T, F>(&self, make_event: F) -> Result<T, ActorExited>
    where
        F: FnOnce(Callback<T>) -> Event,
    {
        let (callback, rx) = Callback::new();
        self.send(make_event(callback)).await?;
        rx.await.map_err(|_| ActorExited)
    }

    // Upgraded only for the send, so callers waiting on an answer don't keep the event loop alive.
    async fn send(&self, event: Event) -> Result<(), ActorExited> {
        let sender = self.sender.upgrade().ok_or(ActorExited)?;
        sender.send(event).await.map_err(|_| ActorExited)
    }
}

async fn call<T, F>(sender: &mpsc::Sender<Event>, make_event: F) -> Result<T, ActorExited>
where
    F: FnOnce(Callback<T>) -> Event,
{
    let (callback, rx) = Callback::new();
    sender.send(make_event(callback)).await.map_err(|_| ActorExited)?;
    rx.await.map_err(|_| ActorExited)
}

fn exited_reply<T>(_: ActorExited) -> Reply<T> {
    Reply {
        leader: None,
        members: Vec::new(),
        outcome: Err(ProtocolError::NotLeader),
    }
}
