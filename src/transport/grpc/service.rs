use crate::grpc::grpc_raft_server::{GrpcRaft, GrpcRaftServer};
use crate::grpc::{ProtoRequest, ProtoResponse};
use crate::transport::grpc::convert;
use crate::transport::RequestHandler;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

/// GrpcService exposes a RequestHandler through the gRPC `Dispatch` RPC.
pub(super) struct GrpcService {
    logger: slog::Logger,
    handler: Arc<dyn RequestHandler>,
}

impl GrpcService {
    pub(super) fn new(logger: slog::Logger, handler: Arc<dyn RequestHandler>) -> Self {
        GrpcService { logger, handler }
    }

    /// Serves until `stop` resolves, i.e. its sender is dropped.
    pub(super) async fn run(self, socket_addr: SocketAddr, stop: oneshot::Receiver<()>) {
        let logger = self.logger.clone();
        slog::info!(logger, "Serving on {}", socket_addr);

        // TODO: bind before spawning, so listen() can report an unavailable port as AddressInUse.
        let result = Server::builder()
            .add_service(GrpcRaftServer::new(self))
            .serve_with_shutdown(socket_addr, async {
                let _ = stop.await;
            })
            .await;

        match result {
            Ok(()) => slog::info!(logger, "Stopped serving on {}", socket_addr),
            Err(e) => slog::error!(logger, "Serving on {} failed: {}", socket_addr, e),
        }
    }
}

#[async_trait::async_trait]
impl GrpcRaft for GrpcService {
    async fn dispatch(&self, rpc_request_wrapped: Request<ProtoRequest>) -> Result<Response<ProtoResponse>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);

        let request =
            convert::request_from_proto(rpc_request).map_err(|e| Status::invalid_argument(e.to_string()))?;
        let response = self.handler.handle(request).await;
        let rpc_reply = convert::response_to_proto(response);

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_reply);
        Ok(Response::new(rpc_reply))
    }
}
