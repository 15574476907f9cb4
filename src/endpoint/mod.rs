// src/endpoint/mod.rs
//! Secure endpoints: one listening TLS adapter per security configuration.

pub mod connection;
pub mod observer;
pub mod registry;

pub use observer::{HandshakeObserver, HandshakeOutcome, OutcomeResult};
pub use registry::EndpointRegistry;

use crate::config::EndpointConfig;
use crate::error::{FactoryError, FactoryResult};
use crate::events::{
    dispatcher,
    model::{EndpointEvent, LogEvent, LogLevel},
};
use crate::security::settings::{AfterHandshake, SecurityConfiguration, TlsVersion, VerificationMode};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;

/// Opaque, process-unique endpoint identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointHandle(pub u64);

impl fmt::Display for EndpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// `Created` and `Bound` are transient: they only exist inside [`SecureEndpoint::start`]
/// and show up in its `endpoint_created` / `endpoint_bound` events. A started endpoint
/// reports `Accepting` until it is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointState {
    Created,
    Bound,
    Accepting,
    Closing,
    Closed,
}

impl EndpointState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointState::Created => "created",
            EndpointState::Bound => "bound",
            EndpointState::Accepting => "accepting",
            EndpointState::Closing => "closing",
            EndpointState::Closed => "closed",
        }
    }
}

/// Read-only summary returned by `describe`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub handle: EndpointHandle,
    pub address: SocketAddr,
    pub state: EndpointState,
    pub verify: VerificationMode,
    pub protocols: Vec<TlsVersion>,
    pub cipher_suites: Vec<String>,
    pub peer_identity: Option<String>,
    pub after_handshake: AfterHandshake,
    pub handshake_timeout_ms: u64,
    pub attempts: u64,
    pub outcome_count: usize,
}

pub struct SecureEndpoint {
    handle: EndpointHandle,
    config: Arc<SecurityConfiguration>,
    local_addr: SocketAddr,
    state: Mutex<EndpointState>,
    observer: Arc<HandshakeObserver>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    close_timeout: Duration,
}

impl SecureEndpoint {
    /// Bind and start accepting (`CREATED → BOUND → ACCEPTING`).
    /// On bind failure nothing is left running.
    pub async fn start(
        handle: EndpointHandle,
        config: SecurityConfiguration,
        settings: &EndpointConfig,
    ) -> FactoryResult<Self> {
        let config = Arc::new(config);
        let requested = config.bind_addr();
        log_endpoint_event(
            handle,
            LogLevel::Debug,
            "endpoint_created",
            None,
            EndpointState::Created,
            Some(format!("bind={}", requested)),
        );
        let bind_failure = |reason: String| FactoryError::BindFailure {
            addr: requested.to_string(),
            reason,
        };
        let listener =
            match tokio::time::timeout(settings.bind_timeout(), TcpListener::bind(requested)).await {
                Ok(Ok(listener)) => listener,
                Ok(Err(e)) => return Err(bind_failure(e.to_string())),
                Err(_) => return Err(bind_failure("bind timed out".into())),
            };
        let local_addr = listener
            .local_addr()
            .map_err(|e| bind_failure(e.to_string()))?;
        log_endpoint_event(
            handle,
            LogLevel::Debug,
            "endpoint_bound",
            Some(local_addr),
            EndpointState::Bound,
            None,
        );

        let observer = HandshakeObserver::new(handle, settings.outcome_log_capacity());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let acceptor = TlsAcceptor::from(config.server_config());
        let task = tokio::spawn(accept_loop(
            handle,
            listener,
            acceptor,
            config.clone(),
            observer.clone(),
            shutdown_rx,
        ));
        log_endpoint_event(
            handle,
            LogLevel::Info,
            "endpoint_accepting",
            Some(local_addr),
            EndpointState::Accepting,
            Some(format!(
                "verify={:?} protocols={:?}",
                config.verify(),
                config.protocols().iter().map(|p| p.as_str()).collect::<Vec<_>>()
            )),
        );
        Ok(Self {
            handle,
            config,
            local_addr,
            state: Mutex::new(EndpointState::Accepting),
            observer,
            shutdown_tx,
            accept_task: Mutex::new(Some(task)),
            close_timeout: settings.close_timeout(),
        })
    }

    pub fn handle(&self) -> EndpointHandle {
        self.handle
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> EndpointState {
        *self.state.lock()
    }

    pub fn outcomes(&self) -> Vec<HandshakeOutcome> {
        self.observer.outcomes()
    }

    pub fn info(&self) -> EndpointInfo {
        EndpointInfo {
            handle: self.handle,
            address: self.local_addr,
            state: self.state(),
            verify: self.config.verify(),
            protocols: self.config.protocols().to_vec(),
            cipher_suites: self.config.cipher_suites().to_vec(),
            peer_identity: self.config.peer_identity().map(|m| m.pattern().to_string()),
            after_handshake: self.config.after_handshake(),
            handshake_timeout_ms: self.config.handshake_timeout().as_millis() as u64,
            attempts: self.observer.attempts(),
            outcome_count: self.observer.len(),
        }
    }

    /// `ACCEPTING → CLOSING → CLOSED`. In-flight handshakes and promoted sessions are
    /// aborted; unrecorded attempts are recorded as `io-failure` / `aborted`. Idempotent.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock();
            if matches!(*state, EndpointState::Closing | EndpointState::Closed) {
                return;
            }
            *state = EndpointState::Closing;
        }
        log_endpoint_event(
            self.handle,
            LogLevel::Debug,
            "endpoint_closing",
            Some(self.local_addr),
            EndpointState::Closing,
            None,
        );
        let _ = self.shutdown_tx.send(true);
        let task = self.accept_task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(self.close_timeout, &mut task).await.is_err() {
                task.abort();
                log_endpoint_event(
                    self.handle,
                    LogLevel::Warn,
                    "endpoint_close_timeout",
                    Some(self.local_addr),
                    EndpointState::Closing,
                    Some(format!("forced after {:?}", self.close_timeout)),
                );
            }
        }
        *self.state.lock() = EndpointState::Closed;
        log_endpoint_event(
            self.handle,
            LogLevel::Info,
            "endpoint_closed",
            Some(self.local_addr),
            EndpointState::Closed,
            Some(format!("attempts={}", self.observer.attempts())),
        );
    }
}

impl Drop for SecureEndpoint {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.get_mut().take() {
            task.abort();
        }
    }
}

async fn accept_loop(
    handle: EndpointHandle,
    listener: TcpListener,
    acceptor: TlsAcceptor,
    config: Arc<SecurityConfiguration>,
    observer: Arc<HandshakeObserver>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tasks = JoinSet::new();
    loop {
        while tasks.try_join_next().is_some() {}
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    let ticket = observer.ticket(Some(peer_addr));
                    tasks.spawn(connection::serve_connection(
                        stream,
                        ticket,
                        acceptor.clone(),
                        config.clone(),
                    ));
                }
                Err(e) => {
                    log_endpoint_event(
                        handle,
                        LogLevel::Warn,
                        "accept_failed",
                        listener.local_addr().ok(),
                        EndpointState::Accepting,
                        Some(e.to_string()),
                    );
                    // back off so a persistent error (fd exhaustion) does not spin
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }
    drop(listener);
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}
}

fn log_endpoint_event(
    handle: EndpointHandle,
    level: LogLevel,
    action: &str,
    addr: Option<SocketAddr>,
    state: EndpointState,
    detail: Option<String>,
) {
    let mut meta = dispatcher::meta("endpoint", level);
    meta.corr_id = Some(dispatcher::correlation_id());
    dispatcher::emit(LogEvent::Endpoint(EndpointEvent {
        meta,
        handle: handle.0,
        action: action.to_string(),
        addr: addr.map(|a| a.to_string()),
        state: Some(state.as_str().to_string()),
        detail,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::settings::SecurityConfigSpec;

    fn configuration() -> SecurityConfiguration {
        SecurityConfiguration::from_spec(&SecurityConfigSpec::new(), &EndpointConfig::default())
            .expect("valid")
    }

    #[tokio::test]
    async fn start_and_close_walk_the_lifecycle() {
        let ep = SecureEndpoint::start(EndpointHandle(1), configuration(), &EndpointConfig::default())
            .await
            .expect("start");
        assert_eq!(ep.state(), EndpointState::Accepting);
        assert_ne!(ep.local_addr().port(), 0);
        let addr = ep.local_addr();
        ep.close().await;
        assert_eq!(ep.state(), EndpointState::Closed);
        ep.close().await;
        assert_eq!(ep.state(), EndpointState::Closed);
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn occupied_address_is_a_bind_failure() {
        let holder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken = holder.local_addr().unwrap().to_string();
        let cfg = SecurityConfiguration::from_spec(
            &SecurityConfigSpec::new().bind(taken.clone()),
            &EndpointConfig::default(),
        )
        .expect("valid");
        match SecureEndpoint::start(EndpointHandle(2), cfg, &EndpointConfig::default()).await {
            Err(FactoryError::BindFailure { addr, .. }) => assert_eq!(addr, taken),
            other => panic!("expected BindFailure, got {:?}", other.map(|e| e.handle())),
        }
    }

    #[test]
    fn handle_renders_and_serializes_as_number() {
        assert_eq!(EndpointHandle(42).to_string(), "#42");
        assert_eq!(serde_json::to_string(&EndpointHandle(42)).unwrap(), "42");
    }
}
