// src/network/transport.rs
// Client side of the factory RPC, used by tlsfactory-ctl and integration tests.

use crate::endpoint::{EndpointHandle, EndpointInfo, HandshakeOutcome};
use crate::error::ErrorKind;
use crate::factory::{CreatedServer, PingReply, ShutdownReply};
use crate::network::message::{ops, FactoryRequest, FactoryResponse};
use crate::security::settings::SecurityConfigSpec;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{kind:?}: {message}")]
    Remote { kind: ErrorKind, message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed reply: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("factory closed the connection")]
    Closed,
    #[error("reply id {got} does not answer request {expected}")]
    IdMismatch { expected: u64, got: u64 },
}

impl ClientError {
    /// Error kind reported by the factory, if the failure was remote
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Remote { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

pub struct FactoryClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_id: u64,
}

impl FactoryClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        let (r, w) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(r),
            writer: w,
            next_id: 1,
        })
    }

    /// Untyped call: returns the `ok` value (`Null` for operations without a result)
    pub async fn call(&mut self, op: &str, params: Value) -> Result<Value, ClientError> {
        let id = self.next_id;
        self.next_id += 1;
        let mut line = serde_json::to_string(&FactoryRequest::new(id, op, params))?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;

        let mut reply = String::new();
        if self.reader.read_line(&mut reply).await? == 0 {
            return Err(ClientError::Closed);
        }
        let resp: FactoryResponse = serde_json::from_str(reply.trim())?;
        if resp.id != id {
            return Err(ClientError::IdMismatch {
                expected: id,
                got: resp.id,
            });
        }
        match resp.err {
            Some(err) => Err(ClientError::Remote {
                kind: err.kind,
                message: err.message,
            }),
            None => Ok(resp.ok.unwrap_or(Value::Null)),
        }
    }

    async fn call_typed<T: DeserializeOwned>(
        &mut self,
        op: &str,
        params: Value,
    ) -> Result<T, ClientError> {
        let value = self.call(op, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn create_server(
        &mut self,
        spec: &SecurityConfigSpec,
    ) -> Result<CreatedServer, ClientError> {
        self.call_typed(ops::CREATE_SERVER, serde_json::to_value(spec)?)
            .await
    }

    pub async fn destroy_server(&mut self, handle: EndpointHandle) -> Result<(), ClientError> {
        self.call(ops::DESTROY_SERVER, json!({ "handle": handle }))
            .await
            .map(|_| ())
    }

    pub async fn get_outcomes(
        &mut self,
        handle: EndpointHandle,
    ) -> Result<Vec<HandshakeOutcome>, ClientError> {
        self.call_typed(ops::GET_OUTCOMES, json!({ "handle": handle }))
            .await
    }

    pub async fn describe_server(
        &mut self,
        handle: EndpointHandle,
    ) -> Result<EndpointInfo, ClientError> {
        self.call_typed(ops::DESCRIBE_SERVER, json!({ "handle": handle }))
            .await
    }

    pub async fn list_servers(&mut self) -> Result<Vec<EndpointInfo>, ClientError> {
        self.call_typed(ops::LIST_SERVERS, Value::Null).await
    }

    pub async fn ping(&mut self) -> Result<PingReply, ClientError> {
        self.call_typed(ops::PING, Value::Null).await
    }

    pub async fn shutdown(&mut self) -> Result<ShutdownReply, ClientError> {
        self.call_typed(ops::SHUTDOWN, Value::Null).await
    }
}
