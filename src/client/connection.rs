use crate::client::options::ClientOptionsValidated;
use crate::client::ClientError;
use crate::protocol::{
    CloseSessionOk, CloseSessionRequest, CommandOk, CommandRequest, JoinOk, JoinRequest, KeepAliveOk,
    KeepAliveRequest, LeaveOk, LeaveRequest, OpenSessionOk, OpenSessionRequest, ProtocolError, QueryOk, QueryRequest,
    Reply, Request, Response,
};
use crate::transport::{Address, Transport};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::{Duration, Instant};

/// A request any member accepts, answered with a Reply that may redirect to the leader.
pub(crate) trait ClusterRequest: Clone + Send {
    type Ok: Send;

    fn into_request(self) -> Request;
    fn from_response(response: Response) -> Option<Reply<Self::Ok>>;
}

/// ClusterConnection sends requests to the cluster's leader, finding it through redirects and
/// retrying with backoff until the request's deadline.
pub(crate) struct ClusterConnection {
    logger: slog::Logger,
    transport: Arc<dyn Transport>,
    state: Mutex<ConnectionState>,
    options: ClientOptionsValidated,
}

struct ConnectionState {
    members: Vec<Address>,
    leader: Option<Address>,
    next: usize,
}

impl ClusterConnection {
    pub(crate) fn new(
        logger: slog::Logger,
        transport: Arc<dyn Transport>,
        members: Vec<Address>,
        options: ClientOptionsValidated,
    ) -> Self {
        ClusterConnection {
            logger,
            transport,
            state: Mutex::new(ConnectionState {
                members,
                leader: None,
                next: 0,
            }),
            options,
        }
    }

    pub(crate) fn leader(&self) -> Option<Address> {
        self.lock().leader.clone()
    }

    pub(crate) async fn call<R: ClusterRequest>(&self, request: R) -> Result<R::Ok, ClientError> {
        self.call_with_timeout(request, self.options.request_timeout).await
    }

    pub(crate) async fn call_with_timeout<R: ClusterRequest>(
        &self,
        request: R,
        timeout: Duration,
    ) -> Result<R::Ok, ClientError> {
        let deadline = Instant::now() + timeout;
        let mut backoff = self.options.retry_backoff;
        let mut last_error = ClientError::Timeout(timeout);
        let mut just_redirected = false;

        loop {
            let target = match self.target() {
                Some(target) => target,
                None => return Err(ClientError::Internal("No known cluster member".into())),
            };

            let attempt = tokio::time::timeout_at(deadline, self.transport.send(&target, request.clone().into_request()));
            let redirected = match attempt.await {
                Err(_elapsed) => return Err(last_error),
                Ok(Err(e)) => {
                    slog::debug!(self.logger, "Failed to reach {:?}: {}", target, e);
                    self.move_on_from(&target);
                    last_error = ClientError::Timeout(timeout);
                    false
                }
                Ok(Ok(response)) => match R::from_response(response) {
                    None => {
                        slog::warn!(self.logger, "Unexpected response type from {:?}", target);
                        self.move_on_from(&target);
                        false
                    }
                    Some(reply) => {
                        self.learn_members(reply.members);
                        match reply.outcome {
                            Ok(ok) => return Ok(ok),
                            Err(ProtocolError::NotLeader) => {
                                last_error = ClientError::Timeout(timeout);
                                self.redirect(&target, reply.leader)
                            }
                            Err(ProtocolError::ConfigurationChangeInProgress) => {
                                last_error = ClientError::ConfigurationChangeInProgress;
                                false
                            }
                            Err(ProtocolError::UnknownSession) => return Err(ClientError::SessionExpired),
                            Err(ProtocolError::Application(message)) => return Err(ClientError::Application(message)),
                            Err(ProtocolError::Internal(message)) => return Err(ClientError::Internal(message)),
                        }
                    }
                },
            };

            // Follow a fresh redirect right away, but don't ping-pong between stale hints.
            if redirected && !just_redirected {
                just_redirected = true;
                continue;
            }
            just_redirected = false;

            let wake = Instant::now() + backoff;
            if wake >= deadline {
                tokio::time::sleep_until(deadline).await;
                return Err(last_error);
            }
            tokio::time::sleep_until(wake).await;
            backoff = (backoff * 2).min(self.options.max_retry_backoff);
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().expect("ClusterConnection lock is poisoned")
    }

    fn target(&self) -> Option<Address> {
        let state = self.lock();
        if let Some(leader) = &state.leader {
            return Some(leader.clone());
        }
        if state.members.is_empty() {
            return None;
        }
        Some(state.members[state.next % state.members.len()].clone())
    }

    /// Returns true if there's a new leader to try.
    fn redirect(&self, from: &Address, hint: Option<Address>) -> bool {
        match hint {
            Some(leader) if &leader != from => {
                slog::debug!(self.logger, "Redirected from {:?} to {:?}", from, leader);
                self.lock().leader = Some(leader);
                true
            }
            _ => {
                self.move_on_from(from);
                false
            }
        }
    }

    fn move_on_from(&self, target: &Address) {
        let mut state = self.lock();
        if state.leader.as_ref() == Some(target) {
            state.leader = None;
        }
        let position = state.members.iter().position(|m| m == target);
        state.next = match position {
            Some(position) => position + 1,
            None => state.next + 1,
        };
    }

    fn learn_members(&self, members: Vec<Address>) {
        if members.is_empty() {
            return;
        }
        let mut state = self.lock();
        if state.members != members {
            state.members = members;
            state.next = 0;
        }
    }
}

// ------- Request types --------

impl ClusterRequest for JoinRequest {
    type Ok = JoinOk;

    fn into_request(self) -> Request {
        Request::Join(self)
    }

    fn from_response(response: Response) -> Option<Reply<JoinOk>> {
        match response {
            Response::Join(reply) => Some(reply),
            _ => None,
        }
    }
}

impl ClusterRequest for LeaveRequest {
    type Ok = LeaveOk;

    fn into_request(self) -> Request {
        Request::Leave(self)
    }

    fn from_response(response: Response) -> Option<Reply<LeaveOk>> {
        match response {
            Response::Leave(reply) => Some(reply),
            _ => None,
        }
    }
}

impl ClusterRequest for OpenSessionRequest {
    type Ok = OpenSessionOk;

    fn into_request(self) -> Request {
        Request::OpenSession(self)
    }

    fn from_response(response: Response) -> Option<Reply<OpenSessionOk>> {
        match response {
            Response::OpenSession(reply) => Some(reply),
            _ => None,
        }
    }
}

impl ClusterRequest for KeepAliveRequest {
    type Ok = KeepAliveOk;

    fn into_request(self) -> Request {
        Request::KeepAlive(self)
    }

    fn from_response(response: Response) -> Option<Reply<KeepAliveOk>> {
        match response {
            Response::KeepAlive(reply) => Some(reply),
            _ => None,
        }
    }
}

impl ClusterRequest for CommandRequest {
    type Ok = CommandOk;

    fn into_request(self) -> Request {
        Request::Command(self)
    }

    fn from_response(response: Response) -> Option<Reply<CommandOk>> {
        match response {
            Response::Command(reply) => Some(reply),
            _ => None,
        }
    }
}

impl ClusterRequest for QueryRequest {
    type Ok = QueryOk;

    fn into_request(self) -> Request {
        Request::Query(self)
    }

    fn from_response(response: Response) -> Option<Reply<QueryOk>> {
        match response {
            Response::Query(reply) => Some(reply),
            _ => None,
        }
    }
}

impl ClusterRequest for CloseSessionRequest {
    type Ok = CloseSessionOk;

    fn into_request(self) -> Request {
        Request::CloseSession(self)
    }

    fn from_response(response: Response) -> Option<Reply<CloseSessionOk>> {
        match response {
            Response::CloseSession(reply) => Some(reply),
            _ => None,
        }
    }
}
