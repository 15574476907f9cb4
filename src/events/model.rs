use serde::Serialize;
use std::str::FromStr;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn rank(self) -> u8 {
        match self {
            LogLevel::Trace => 0,
            LogLevel::Debug => 1,
            LogLevel::Info => 2,
            LogLevel::Warn => 3,
            LogLevel::Error => 4,
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventMeta {
    pub ts: SystemTime,
    pub level: LogLevel,
    pub corr_id: Option<String>,
    pub session_id: String,
    pub component: &'static str,
    pub suppress_console: bool,
}

/// Secure endpoint lifecycle transition or listener-level incident
#[derive(Debug, Clone, Serialize)]
pub struct EndpointEvent {
    pub meta: EventMeta,
    pub handle: u64,
    pub action: String,
    pub addr: Option<String>,
    pub state: Option<String>,
    pub detail: Option<String>,
}

/// One recorded handshake outcome
#[derive(Debug, Clone, Serialize)]
pub struct HandshakeEvent {
    pub meta: EventMeta,
    pub handle: u64,
    pub seq: u64,
    pub result: String,
    pub failure: Option<String>,
    pub detail: Option<String>,
    pub peer_identity: Option<String>,
    pub fingerprint: Option<String>,
    pub protocol: Option<String>,
    pub cipher: Option<String>,
    pub peer_addr: Option<String>,
}

/// One factory operation as seen by the facade
#[derive(Debug, Clone, Serialize)]
pub struct FactoryEvent {
    pub meta: EventMeta,
    pub op: String,
    pub handle: Option<u64>,
    pub ok: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkEvent {
    pub meta: EventMeta,
    pub action: String,
    pub addr: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemEvent {
    pub meta: EventMeta,
    pub action: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEvent {
    Endpoint(EndpointEvent),
    Handshake(HandshakeEvent),
    Factory(FactoryEvent),
    Network(NetworkEvent),
    System(SystemEvent),
}

impl LogEvent {
    pub fn meta(&self) -> &EventMeta {
        match self {
            LogEvent::Endpoint(e) => &e.meta,
            LogEvent::Handshake(e) => &e.meta,
            LogEvent::Factory(e) => &e.meta,
            LogEvent::Network(e) => &e.meta,
            LogEvent::System(e) => &e.meta,
        }
    }
}
