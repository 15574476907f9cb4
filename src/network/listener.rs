// src/network/listener.rs

use crate::constants::MAX_LINE_BYTES;
use crate::error::FactoryError;
use crate::events::dispatcher;
use crate::events::model::{LogEvent, LogLevel, NetworkEvent};
use crate::factory::FactoryService;
use crate::network::framing::{read_frame, Frame};
use crate::network::message::{FactoryRequest, FactoryResponse};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Grace period for in-flight RPC connections (e.g. the one carrying `shutdown`) to write their reply
const DRAIN_GRACE: Duration = Duration::from_millis(500);

fn log_network_event(
    level: LogLevel,
    action: &str,
    addr: Option<String>,
    detail: Option<String>,
    allow_console: bool,
) {
    let mut meta = dispatcher::meta("listener", level);
    meta.corr_id = Some(dispatcher::correlation_id());
    meta.suppress_console = !allow_console;
    dispatcher::emit(LogEvent::Network(NetworkEvent {
        meta,
        action: action.to_string(),
        addr,
        detail,
    }));
}

pub async fn bind_factory_listener(addr: &str) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    log_network_event(
        LogLevel::Info,
        "listener_bind",
        listener.local_addr().ok().map(|a| a.to_string()),
        None,
        true,
    );
    Ok(listener)
}

/// Serve factory RPC connections until `stop` turns true (or its sender is dropped).
pub async fn serve_factory(
    listener: TcpListener,
    service: FactoryService,
    mut stop: watch::Receiver<bool>,
) {
    let mut conns = JoinSet::new();
    loop {
        while conns.try_join_next().is_some() {}
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    log_network_event(
                        LogLevel::Debug,
                        "incoming_connection",
                        Some(peer_addr.to_string()),
                        None,
                        false,
                    );
                    conns.spawn(handle_connection(stream, peer_addr, service.clone()));
                }
                Err(e) => {
                    log_network_event(
                        LogLevel::Error,
                        "accept_failed",
                        None,
                        Some(e.to_string()),
                        true,
                    );
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }
    drop(listener);
    let drain = async { while conns.join_next().await.is_some() {} };
    if tokio::time::timeout(DRAIN_GRACE, drain).await.is_err() {
        conns.abort_all();
    }
    log_network_event(LogLevel::Info, "listener_stopped", None, None, true);
}

/// One request per line, answered in order.
async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, service: FactoryService) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    loop {
        let line = match read_frame(&mut reader, MAX_LINE_BYTES).await {
            Ok(Frame::Line(line)) => line,
            Ok(Frame::Eof) => break,
            Ok(Frame::Oversized) => {
                log_network_event(
                    LogLevel::Warn,
                    "oversized_request",
                    Some(peer_addr.to_string()),
                    None,
                    false,
                );
                let response = FactoryResponse::err(
                    0,
                    &FactoryError::BadRequest(format!(
                        "request line exceeds {} bytes",
                        MAX_LINE_BYTES
                    )),
                );
                if !write_response(&mut write_half, &response, peer_addr).await {
                    break;
                }
                continue;
            }
            Err(e) => {
                log_network_event(
                    LogLevel::Warn,
                    "read_failed",
                    Some(peer_addr.to_string()),
                    Some(e.to_string()),
                    false,
                );
                break;
            }
        };
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let response = match serde_json::from_slice::<FactoryRequest>(&line) {
            Ok(req) => service.dispatch(req).await,
            Err(e) => {
                log_network_event(
                    LogLevel::Warn,
                    "bad_request",
                    Some(peer_addr.to_string()),
                    Some(e.to_string()),
                    false,
                );
                FactoryResponse::err(
                    salvage_id(&line),
                    &FactoryError::BadRequest(format!("undecodable request: {}", e)),
                )
            }
        };
        if !write_response(&mut write_half, &response, peer_addr).await {
            break;
        }
    }
    log_network_event(
        LogLevel::Debug,
        "connection_closed",
        Some(peer_addr.to_string()),
        None,
        false,
    );
}

/// Encode and send one reply line. Returns false when the connection should be dropped.
async fn write_response(
    write_half: &mut OwnedWriteHalf,
    response: &FactoryResponse,
    peer_addr: SocketAddr,
) -> bool {
    let mut out = match serde_json::to_string(response) {
        Ok(s) => s,
        Err(e) => {
            log_network_event(
                LogLevel::Error,
                "encode_failed",
                Some(peer_addr.to_string()),
                Some(e.to_string()),
                true,
            );
            return false;
        }
    };
    out.push('\n');
    if let Err(e) = write_half.write_all(out.as_bytes()).await {
        log_network_event(
            LogLevel::Warn,
            "write_failed",
            Some(peer_addr.to_string()),
            Some(e.to_string()),
            false,
        );
        return false;
    }
    true
}

/// Best effort: echo the caller's id even when the rest of the request is unusable
fn salvage_id(line: &[u8]) -> u64 {
    serde_json::from_slice::<Value>(line)
        .ok()
        .and_then(|v| v.get("id").and_then(Value::as_u64))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salvages_ids_from_partial_requests() {
        assert_eq!(salvage_id(br#"{"id": 12, "op": 5}"#), 12);
        assert_eq!(salvage_id(b"not json"), 0);
    }
}
