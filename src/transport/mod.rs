mod grpc;
mod local;
mod transport;

pub use grpc::GrpcTransport;
pub use local::LocalRegistry;
pub use local::LocalTransport;
pub use transport::Address;
pub use transport::Listener;
pub use transport::RequestHandler;
pub use transport::Transport;
pub use transport::TransportError;
