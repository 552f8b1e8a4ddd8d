use crate::protocol::{Request, Response};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Address of a cluster member or client, e.g. `"127.0.0.1:5000"`. Members are identified by their
/// address.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Address(String);

impl Address {
    pub fn new<S: Into<String>>(address: S) -> Self {
        Address(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(address: &str) -> Self {
        Address::new(address)
    }
}

impl From<String> for Address {
    fn from(address: String) -> Self {
        Address::new(address)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Nothing is listening at {0}")]
    Unreachable(Address),
    #[error("Address {0} is already in use")]
    AddressInUse(Address),
    #[error("Invalid address {0}")]
    InvalidAddress(Address),
    #[error("Connection failure: {0}")]
    Connection(String),
    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// Transport is point-to-point request/response delivery between members and clients.
///
/// Delivery is not guaranteed to be ordered or reliable. Callers are expected to apply their own
/// timeouts.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, address: &Address, request: Request) -> Result<Response, TransportError>;

    /// Routes every request sent to `address` to `handler` until the returned Listener is dropped.
    async fn listen(&self, address: &Address, handler: Arc<dyn RequestHandler>) -> Result<Listener, TransportError>;
}

#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: Request) -> Response;
}

/// Listener keeps a `listen()` registration alive. Dropping it stops routing requests to the
/// handler.
pub struct Listener {
    _registration: Box<dyn Any + Send + Sync>,
}

impl Listener {
    pub(crate) fn new<R: Any + Send + Sync>(registration: R) -> Self {
        Listener {
            _registration: Box::new(registration),
        }
    }
}
