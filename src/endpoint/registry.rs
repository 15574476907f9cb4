// src/endpoint/registry.rs

use crate::config::EndpointConfig;
use crate::endpoint::{EndpointHandle, EndpointInfo, HandshakeOutcome, SecureEndpoint};
use crate::error::{FactoryError, FactoryResult};
use crate::security::settings::SecurityConfiguration;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Default)]
struct Inner {
    endpoints: HashMap<EndpointHandle, Arc<SecureEndpoint>>,
    closed: bool,
}

/// Live secure endpoints keyed by handle.
///
/// The map lock is never held across an await: binding happens before insertion and
/// closing after removal, so removal under the lock is the point at which a destroy
/// takes effect for every other caller.
#[derive(Clone)]
pub struct EndpointRegistry {
    inner: Arc<Mutex<Inner>>,
    next_handle: Arc<AtomicU64>,
    settings: Arc<EndpointConfig>,
}

impl EndpointRegistry {
    pub fn new(settings: EndpointConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            next_handle: Arc::new(AtomicU64::new(1)),
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &EndpointConfig {
        &self.settings
    }

    /// Bind a new endpoint and register it once it is accepting.
    /// Handles are allocated before binding, so a failed create burns one; they are never reused.
    pub async fn create(
        &self,
        config: SecurityConfiguration,
    ) -> FactoryResult<(EndpointHandle, SocketAddr)> {
        if self.inner.lock().closed {
            return Err(FactoryError::ShuttingDown);
        }
        let handle = EndpointHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let endpoint = Arc::new(SecureEndpoint::start(handle, config, &self.settings).await?);
        let addr = endpoint.local_addr();
        let rejected = {
            let mut inner = self.inner.lock();
            if inner.closed {
                Some(endpoint)
            } else {
                inner.endpoints.insert(handle, endpoint);
                None
            }
        };
        // shutdown began while we were binding
        if let Some(endpoint) = rejected {
            endpoint.close().await;
            return Err(FactoryError::ShuttingDown);
        }
        Ok((handle, addr))
    }

    /// Remove and close. A second destroy of the same handle is `UnknownHandle`.
    pub async fn destroy(&self, handle: EndpointHandle) -> FactoryResult<()> {
        let endpoint = self
            .inner
            .lock()
            .endpoints
            .remove(&handle)
            .ok_or(FactoryError::UnknownHandle(handle))?;
        endpoint.close().await;
        Ok(())
    }

    /// Outcomes recorded so far, in arrival order
    pub fn query(&self, handle: EndpointHandle) -> FactoryResult<Vec<HandshakeOutcome>> {
        Ok(self.get(handle)?.outcomes())
    }

    pub fn describe(&self, handle: EndpointHandle) -> FactoryResult<EndpointInfo> {
        Ok(self.get(handle)?.info())
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().endpoints.len()
    }

    /// Live handles in ascending (creation) order
    pub fn handles(&self) -> Vec<EndpointHandle> {
        let mut handles: Vec<EndpointHandle> =
            self.inner.lock().endpoints.keys().copied().collect();
        handles.sort();
        handles
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().closed
    }

    /// Refuse new endpoints and force-close every live one. Returns how many were closed.
    pub async fn shutdown(&self) -> usize {
        let drained: Vec<Arc<SecureEndpoint>> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.endpoints.drain().map(|(_, ep)| ep).collect()
        };
        let count = drained.len();
        let mut closing = JoinSet::new();
        for endpoint in drained {
            closing.spawn(async move { endpoint.close().await });
        }
        while closing.join_next().await.is_some() {}
        count
    }

    fn get(&self, handle: EndpointHandle) -> FactoryResult<Arc<SecureEndpoint>> {
        self.inner
            .lock()
            .endpoints
            .get(&handle)
            .cloned()
            .ok_or(FactoryError::UnknownHandle(handle))
    }
}
