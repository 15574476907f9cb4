//! Error taxonomy surfaced synchronously to factory callers.
//!
//! Handshake failures are not errors here: they are recorded as
//! [`HandshakeOutcome`](crate::endpoint::observer::HandshakeOutcome) data and
//! pulled through `getOutcomes`.

use crate::endpoint::EndpointHandle;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FactoryError {
    /// Malformed or self-contradictory security configuration. Never retried.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Reserving the listening address failed (address in use, timeout, ...)
    #[error("bind failure on {addr}: {reason}")]
    BindFailure { addr: String, reason: String },

    #[error("unknown endpoint handle {0}")]
    UnknownHandle(EndpointHandle),

    /// The registry is being torn down and accepts no new endpoints
    #[error("factory is shutting down")]
    ShuttingDown,

    /// A factory RPC request could not be decoded
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl FactoryError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        FactoryError::InvalidConfiguration(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FactoryError::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            FactoryError::BindFailure { .. } => ErrorKind::BindFailure,
            FactoryError::UnknownHandle(_) => ErrorKind::UnknownHandle,
            FactoryError::ShuttingDown => ErrorKind::ShuttingDown,
            FactoryError::BadRequest(_) => ErrorKind::BadRequest,
        }
    }
}

/// Wire-level error kind carried in factory RPC error replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidConfiguration,
    BindFailure,
    UnknownHandle,
    ShuttingDown,
    BadRequest,
}

pub type FactoryResult<T> = Result<T, FactoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_snake_case() {
        let json = serde_json::to_string(&FactoryError::UnknownHandle(EndpointHandle(7)).kind())
            .expect("serialize");
        assert_eq!(json, "\"unknown_handle\"");
        let bind = FactoryError::BindFailure {
            addr: "127.0.0.1:1".into(),
            reason: "address in use".into(),
        };
        assert_eq!(bind.kind(), ErrorKind::BindFailure);
        assert!(bind.to_string().contains("127.0.0.1:1"));
    }
}
