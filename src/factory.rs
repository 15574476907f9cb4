// src/factory.rs
//! Remotely invokable facade over the endpoint registry.
//!
//! Holds no state of its own beyond the registry handle and the process
//! shutdown signal, so any number of RPC connections may call it concurrently.

use crate::constants::{full_version, PROTOCOL_NAME, PROTOCOL_VERSION};
use crate::endpoint::{EndpointHandle, EndpointInfo, EndpointRegistry, HandshakeOutcome};
use crate::error::{FactoryError, FactoryResult};
use crate::events::{
    dispatcher,
    model::{FactoryEvent, LogEvent, LogLevel},
};
use crate::network::message::{ops, FactoryRequest, FactoryResponse, HandleParams};
use crate::security::settings::{SecurityConfigSpec, SecurityConfiguration};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedServer {
    pub handle: EndpointHandle,
    pub address: SocketAddr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingReply {
    pub protocol: String,
    pub protocol_version: String,
    pub version: String,
    pub live_endpoints: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReply {
    pub closed_endpoints: usize,
}

#[derive(Clone)]
pub struct FactoryService {
    registry: EndpointRegistry,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl FactoryService {
    pub fn new(registry: EndpointRegistry) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry,
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// Resolves to `true` once a remote `shutdown` was accepted
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub async fn create_server(&self, spec: &SecurityConfigSpec) -> FactoryResult<CreatedServer> {
        let result: FactoryResult<CreatedServer> = async {
            let config = SecurityConfiguration::from_spec(spec, self.registry.settings())?;
            let (handle, address) = self.registry.create(config).await?;
            Ok(CreatedServer { handle, address })
        }
        .await;
        match &result {
            Ok(c) => log_factory_event(
                ops::CREATE_SERVER,
                Some(c.handle),
                None,
                Some(c.address.to_string()),
            ),
            Err(e) => log_factory_event(ops::CREATE_SERVER, None, Some(e), None),
        }
        result
    }

    pub async fn destroy_server(&self, handle: EndpointHandle) -> FactoryResult<()> {
        let result = self.registry.destroy(handle).await;
        log_factory_event(ops::DESTROY_SERVER, Some(handle), result.as_ref().err(), None);
        result
    }

    pub fn get_outcomes(&self, handle: EndpointHandle) -> FactoryResult<Vec<HandshakeOutcome>> {
        let result = self.registry.query(handle);
        match &result {
            Ok(list) => log_factory_event(
                ops::GET_OUTCOMES,
                Some(handle),
                None,
                Some(format!("count={}", list.len())),
            ),
            Err(e) => log_factory_event(ops::GET_OUTCOMES, Some(handle), Some(e), None),
        }
        result
    }

    pub fn describe_server(&self, handle: EndpointHandle) -> FactoryResult<EndpointInfo> {
        let result = self.registry.describe(handle);
        log_factory_event(ops::DESCRIBE_SERVER, Some(handle), result.as_ref().err(), None);
        result
    }

    /// Live endpoints in creation order. An endpoint destroyed mid-listing is skipped.
    pub fn list_servers(&self) -> Vec<EndpointInfo> {
        self.registry
            .handles()
            .into_iter()
            .filter_map(|h| self.registry.describe(h).ok())
            .collect()
    }

    pub fn ping(&self) -> PingReply {
        PingReply {
            protocol: PROTOCOL_NAME.to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            version: full_version(),
            live_endpoints: self.registry.live_count(),
        }
    }

    /// Force-destroy every endpoint and ask the hosting process to exit
    pub async fn shutdown(&self) -> ShutdownReply {
        let closed_endpoints = self.registry.shutdown().await;
        self.shutdown_tx.send_replace(true);
        log_factory_event(
            ops::SHUTDOWN,
            None,
            None,
            Some(format!("closed={}", closed_endpoints)),
        );
        ShutdownReply { closed_endpoints }
    }

    /// Decode one RPC request, run it, encode the reply
    pub async fn dispatch(&self, req: FactoryRequest) -> FactoryResponse {
        let id = req.id;
        match self.run(req).await {
            Ok(value) => FactoryResponse::ok(id, value),
            Err(e) => FactoryResponse::err(id, &e),
        }
    }

    async fn run(&self, req: FactoryRequest) -> FactoryResult<Value> {
        match req.op.as_str() {
            ops::CREATE_SERVER => {
                let spec: SecurityConfigSpec = if req.params.is_null() {
                    SecurityConfigSpec::default()
                } else {
                    params(req.params)?
                };
                to_value(self.create_server(&spec).await?)
            }
            ops::DESTROY_SERVER => {
                let p: HandleParams = params(req.params)?;
                self.destroy_server(p.handle).await?;
                Ok(Value::Null)
            }
            ops::GET_OUTCOMES => {
                let p: HandleParams = params(req.params)?;
                to_value(self.get_outcomes(p.handle)?)
            }
            ops::DESCRIBE_SERVER => {
                let p: HandleParams = params(req.params)?;
                to_value(self.describe_server(p.handle)?)
            }
            ops::LIST_SERVERS => to_value(self.list_servers()),
            ops::PING => to_value(self.ping()),
            ops::SHUTDOWN => to_value(self.shutdown().await),
            other => Err(FactoryError::BadRequest(format!("unknown op '{}'", other))),
        }
    }
}

fn params<T: serde::de::DeserializeOwned>(value: Value) -> FactoryResult<T> {
    serde_json::from_value(value).map_err(|e| FactoryError::BadRequest(format!("params: {}", e)))
}

fn to_value<T: Serialize>(value: T) -> FactoryResult<Value> {
    serde_json::to_value(value).map_err(|e| FactoryError::BadRequest(format!("encode: {}", e)))
}

fn log_factory_event(
    op: &str,
    handle: Option<EndpointHandle>,
    error: Option<&FactoryError>,
    detail: Option<String>,
) {
    let level = match error {
        None => LogLevel::Info,
        Some(FactoryError::InvalidConfiguration(_)) | Some(FactoryError::UnknownHandle(_)) => {
            LogLevel::Warn
        }
        Some(_) => LogLevel::Error,
    };
    let mut meta = dispatcher::meta("factory", level);
    meta.corr_id = Some(dispatcher::correlation_id());
    dispatcher::emit(LogEvent::Factory(FactoryEvent {
        meta,
        op: op.to_string(),
        handle: handle.map(|h| h.0),
        ok: error.is_none(),
        detail: error.map(|e| e.to_string()).or(detail),
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use serde_json::json;

    fn service() -> FactoryService {
        FactoryService::new(EndpointRegistry::new(EndpointConfig::default()))
    }

    #[tokio::test]
    async fn dispatch_round_trip() {
        let svc = service();
        let created = svc
            .dispatch(FactoryRequest::new(1, ops::CREATE_SERVER, Value::Null))
            .await;
        assert!(created.err.is_none(), "{:?}", created.err);
        let created: CreatedServer = serde_json::from_value(created.ok.unwrap()).unwrap();

        let outcomes = svc
            .dispatch(FactoryRequest::new(
                2,
                ops::GET_OUTCOMES,
                json!({ "handle": created.handle }),
            ))
            .await;
        assert_eq!(outcomes.ok, Some(json!([])));

        let destroyed = svc
            .dispatch(FactoryRequest::new(
                3,
                ops::DESTROY_SERVER,
                json!({ "handle": created.handle }),
            ))
            .await;
        assert!(destroyed.err.is_none());
        let again = svc
            .dispatch(FactoryRequest::new(
                4,
                ops::DESTROY_SERVER,
                json!({ "handle": created.handle }),
            ))
            .await;
        assert_eq!(
            again.err.map(|e| e.kind),
            Some(crate::error::ErrorKind::UnknownHandle)
        );
    }

    #[tokio::test]
    async fn bad_requests_are_reported_not_fatal() {
        let svc = service();
        let unknown = svc
            .dispatch(FactoryRequest::new(1, "reboot", Value::Null))
            .await;
        assert_eq!(
            unknown.err.map(|e| e.kind),
            Some(crate::error::ErrorKind::BadRequest)
        );
        let missing = svc
            .dispatch(FactoryRequest::new(2, ops::GET_OUTCOMES, json!({})))
            .await;
        assert_eq!(
            missing.err.map(|e| e.kind),
            Some(crate::error::ErrorKind::BadRequest)
        );
        let invalid = svc
            .dispatch(FactoryRequest::new(
                3,
                ops::CREATE_SERVER,
                json!({ "verify": "require" }),
            ))
            .await;
        assert_eq!(
            invalid.err.map(|e| e.kind),
            Some(crate::error::ErrorKind::InvalidConfiguration)
        );
    }

    #[tokio::test]
    async fn shutdown_signals_the_host() {
        let svc = service();
        svc.create_server(&SecurityConfigSpec::new()).await.unwrap();
        let mut signal = svc.shutdown_signal();
        let reply = svc.shutdown().await;
        assert_eq!(reply.closed_endpoints, 1);
        signal.changed().await.unwrap();
        assert!(*signal.borrow());
        assert_eq!(svc.ping().live_endpoints, 0);
    }
}
