use crate::actor::WeakActorClient;
use crate::protocol::{Request, Response};
use crate::transport::RequestHandler;

/// RpcServer is the type that serves a member's peer and client RPCs, whichever transport they
/// arrive on. It owns no state, every request is answered by the local replica actor.
pub(crate) struct RpcServer {
    logger: slog::Logger,
    local_replica: WeakActorClient,
}

impl RpcServer {
    pub(crate) fn new(logger: slog::Logger, local_replica: WeakActorClient) -> Self {
        RpcServer { logger, local_replica }
    }
}

#[async_trait::async_trait]
impl RequestHandler for RpcServer {
    async fn handle(&self, request: Request) -> Response {
        slog::trace!(self.logger, "ServerWire - {:?}", request);
        let response = match request {
            Request::Vote(request) => Response::Vote(self.local_replica.request_vote(request).await),
            Request::Append(request) => Response::Append(self.local_replica.append_entries(request).await),
            Request::TimeoutNow(request) => Response::TimeoutNow(self.local_replica.timeout_now(request).await),
            Request::Join(request) => Response::Join(self.local_replica.join(request).await),
            Request::Leave(request) => Response::Leave(self.local_replica.leave(request).await),
            Request::OpenSession(request) => Response::OpenSession(self.local_replica.open_session(request).await),
            Request::KeepAlive(request) => Response::KeepAlive(self.local_replica.keep_alive(request).await),
            Request::Command(request) => Response::Command(self.local_replica.command(request).await),
            Request::Query(request) => Response::Query(self.local_replica.query(request).await),
            Request::CloseSession(request) => Response::CloseSession(self.local_replica.close_session(request).await),
            // Events flow from servers to clients, never the other way.
            Request::Publish(_) => Response::Unsupported,
        };
        slog::trace!(self.logger, "ServerWire - {:?}", response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::protocol::{PeerError, PublishRequest, SessionId, VoteRequest};
    use crate::transport::Address;

    #[tokio::test]
    async fn exited_replica_reports_server_fault() {
        let (actor, rx) = ActorClient::new(1);
        drop(rx);
        let server = RpcServer::new(slog::Logger::root(slog::Discard, slog::o!()), actor.weak());

        let response = server
            .handle(Request::Vote(VoteRequest {
                term: 1,
                candidate: Address::new("a"),
                last_log_index: 0,
                last_log_term: 0,
            }))
            .await;
        assert!(matches!(response, Response::Vote(Err(PeerError::ServerFault(_)))));

        let response = server
            .handle(Request::Publish(PublishRequest {
                session_id: SessionId::new(1),
                event_index: 1,
                previous_index: 0,
                events: vec![],
            }))
            .await;
        assert!(matches!(response, Response::Unsupported));
    }
}
