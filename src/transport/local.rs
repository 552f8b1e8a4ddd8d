use crate::protocol::{Request, Response};
use crate::transport::{Address, Listener, RequestHandler, Transport, TransportError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

type Handlers = Mutex<HashMap<Address, Arc<dyn RequestHandler>>>;

/// LocalRegistry maps addresses to in-process handlers. Every LocalTransport created from the same
/// registry can reach every handler listening on it.
#[derive(Clone, Default)]
pub struct LocalRegistry {
    handlers: Arc<Handlers>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> LocalTransport {
        LocalTransport {
            registry: self.clone(),
        }
    }

    pub fn is_listening(&self, address: &Address) -> bool {
        self.lock().contains_key(address)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Address, Arc<dyn RequestHandler>>> {
        self.handlers.lock().expect("LocalRegistry mutex guard poison")
    }
}

/// LocalTransport delivers requests in-process by calling the destination's handler directly.
#[derive(Clone)]
pub struct LocalTransport {
    registry: LocalRegistry,
}

/// Removes the handler from the registry when the owning Listener drops.
struct LocalRegistration {
    address: Address,
    handlers: Weak<Handlers>,
}

impl Drop for LocalRegistration {
    fn drop(&mut self) {
        if let Some(handlers) = self.handlers.upgrade() {
            if let Ok(mut handlers) = handlers.lock() {
                handlers.remove(&self.address);
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for LocalTransport {
    async fn send(&self, address: &Address, request: Request) -> Result<Response, TransportError> {
        // Clone the handler out so the registry lock isn't held across the await.
        let handler = self
            .registry
            .lock()
            .get(address)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(address.clone()))?;

        Ok(handler.handle(request).await)
    }

    async fn listen(&self, address: &Address, handler: Arc<dyn RequestHandler>) -> Result<Listener, TransportError> {
        let mut handlers = self.registry.lock();
        if handlers.contains_key(address) {
            return Err(TransportError::AddressInUse(address.clone()));
        }
        handlers.insert(address.clone(), handler);

        Ok(Listener::new(LocalRegistration {
            address: address.clone(),
            handlers: Arc::downgrade(&self.registry.handlers),
        }))
    }
}
