use crate::grpc::grpc_raft_client::GrpcRaftClient;
use crate::protocol::{Request, Response};
use crate::transport::grpc::convert;
use crate::transport::grpc::service::GrpcService;
use crate::transport::{Address, Listener, RequestHandler, Transport, TransportError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tonic::transport::{Channel, Endpoint};

/// GrpcTransport sends requests over gRPC (tonic) and serves `listen()`ed handlers on a TCP socket.
/// Addresses are `host:port` strings.
#[derive(Clone)]
pub struct GrpcTransport {
    logger: slog::Logger,
    // One lazily-created connection per destination. A channel that fails a call is evicted and
    // re-established on the next send.
    clients: Arc<Mutex<HashMap<Address, GrpcRaftClient<Channel>>>>,
}

impl GrpcTransport {
    pub fn new(logger: slog::Logger) -> Self {
        GrpcTransport {
            logger,
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn cached_client(&self, address: &Address) -> Option<GrpcRaftClient<Channel>> {
        self.clients
            .lock()
            .expect("GrpcTransport.cached_client() mutex guard poison")
            .get(address)
            .cloned()
    }

    fn cache_client(&self, address: &Address, client: GrpcRaftClient<Channel>) {
        self.clients
            .lock()
            .expect("GrpcTransport.cache_client() mutex guard poison")
            .insert(address.clone(), client);
    }

    fn evict_client(&self, address: &Address) {
        self.clients
            .lock()
            .expect("GrpcTransport.evict_client() mutex guard poison")
            .remove(address);
    }

    async fn client(&self, address: &Address) -> Result<GrpcRaftClient<Channel>, TransportError> {
        if let Some(client) = self.cached_client(address) {
            return Ok(client);
        }

        let url = format!("http://{}", address);
        slog::debug!(self.logger, "Connecting to {} ...", url);
        let endpoint = Endpoint::from_shared(url).map_err(|_| TransportError::InvalidAddress(address.clone()))?;
        let connection = endpoint
            .connect()
            .await
            .map_err(|_| TransportError::Unreachable(address.clone()))?;

        let client = GrpcRaftClient::new(connection);
        self.cache_client(address, client.clone());

        Ok(client)
    }
}

#[async_trait::async_trait]
impl Transport for GrpcTransport {
    async fn send(&self, address: &Address, request: Request) -> Result<Response, TransportError> {
        let mut client = self.client(address).await?;

        let rpc_request = convert::request_to_proto(request);
        slog::debug!(self.logger, "ClientWire - {:?}", rpc_request);
        let rpc_reply = client.dispatch(rpc_request).await;
        slog::debug!(self.logger, "ClientWire - {:?}", rpc_reply);

        match rpc_reply {
            Ok(rpc_result) => convert::response_from_proto(rpc_result.into_inner()),
            Err(rpc_status) => {
                self.evict_client(address);
                Err(TransportError::Connection(format!(
                    "Un-modeled failure from Dispatch RPC call: {:?}",
                    rpc_status
                )))
            }
        }
    }

    async fn listen(&self, address: &Address, handler: Arc<dyn RequestHandler>) -> Result<Listener, TransportError> {
        let socket_addr: SocketAddr = address
            .as_str()
            .parse()
            .map_err(|_| TransportError::InvalidAddress(address.clone()))?;

        let (stop_sender, stop_receiver) = oneshot::channel::<()>();
        let service = GrpcService::new(
            self.logger.new(slog::o!("Listener" => address.to_string())),
            handler,
        );
        tokio::spawn(service.run(socket_addr, stop_receiver));

        // The server stops once the sender is dropped along with the Listener.
        Ok(Listener::new(stop_sender))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    #[tokio::test]
    async fn listen_rejects_non_socket_address() {
        struct Nothing;

        #[async_trait::async_trait]
        impl RequestHandler for Nothing {
            async fn handle(&self, _: Request) -> Response {
                Response::Unsupported
            }
        }

        let transport = GrpcTransport::new(logger());
        assert!(matches!(
            transport.listen(&Address::new("not-a-socket"), Arc::new(Nothing)).await,
            Err(TransportError::InvalidAddress(_))
        ));
    }
}
