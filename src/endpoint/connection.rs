// src/endpoint/connection.rs

use crate::constants::MAX_LINE_BYTES;
use crate::endpoint::observer::{AttemptTicket, HandshakeOutcome, Negotiated};
use crate::network::framing::{read_frame, Frame};
use crate::security::failure::{classify_io_error, FailureKind, HandshakeFailure};
use crate::security::identity::{spki_fingerprint, PeerIdentity};
use crate::security::settings::{cipher_suite_name, AfterHandshake, SecurityConfiguration, TlsVersion};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

/// Drive one accepted connection: handshake, identity check, record, then close or promote.
/// The ticket is always consumed exactly once (explicitly here, or by drop on abort).
pub(crate) async fn serve_connection(
    stream: TcpStream,
    ticket: AttemptTicket,
    acceptor: TlsAcceptor,
    config: Arc<SecurityConfiguration>,
) {
    let _ = stream.set_nodelay(true);
    let mut tls = match tokio::time::timeout(config.handshake_timeout(), acceptor.accept(stream)).await
    {
        Err(_) => {
            ticket.reject(HandshakeFailure::timeout(), None, Negotiated::default());
            return;
        }
        Ok(Err(e)) => {
            ticket.reject(classify_io_error(&e), None, Negotiated::default());
            return;
        }
        Ok(Ok(tls)) => tls,
    };

    let (negotiated, leaf) = {
        let conn = tls.get_ref().1;
        let negotiated = Negotiated {
            protocol: conn.protocol_version().and_then(TlsVersion::from_protocol),
            cipher: conn.negotiated_cipher_suite().map(|s| cipher_suite_name(&s)),
        };
        let leaf = conn
            .peer_certificates()
            .and_then(|chain| chain.first())
            .map(|c| c.clone().into_owned());
        (negotiated, leaf)
    };
    let peer = leaf.as_ref().and_then(PeerIdentity::from_leaf);
    let fingerprint = leaf.as_ref().map(spki_fingerprint);

    if let Some(matcher) = config.peer_identity() {
        let rejection = match &peer {
            None => Some("no client certificate to match against".to_string()),
            Some(p) if !matcher.matches(p) => Some(format!(
                "peer '{}' does not match '{}'",
                p.subject,
                matcher.pattern()
            )),
            Some(_) => None,
        };
        if let Some(detail) = rejection {
            ticket.reject(
                HandshakeFailure::new(FailureKind::PeerIdentityMismatch, detail),
                fingerprint,
                negotiated,
            );
            close_quietly(&mut tls, &config).await;
            return;
        }
    }

    let outcome = ticket.accept(peer.as_ref(), negotiated);
    match config.after_handshake() {
        AfterHandshake::Close => close_quietly(&mut tls, &config).await,
        AfterHandshake::Promote => promoted_session(tls, outcome).await,
    }
}

async fn close_quietly(tls: &mut TlsStream<TcpStream>, config: &SecurityConfiguration) {
    let _ = tokio::time::timeout(config.handshake_timeout(), tls.shutdown()).await;
}

/// Post-handshake line protocol: `ping` → `pong`, `outcome` → this connection's record as JSON,
/// `quit` closes. Runs until EOF, an I/O error, or the endpoint aborts the task.
async fn promoted_session(tls: TlsStream<TcpStream>, outcome: HandshakeOutcome) {
    let mut stream = BufReader::new(tls);
    loop {
        let line = match read_frame(&mut stream, MAX_LINE_BYTES).await {
            Ok(Frame::Line(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Frame::Oversized) => {
                if write_line(&mut stream, "error line too long").await.is_err() {
                    return;
                }
                continue;
            }
            Ok(Frame::Eof) | Err(_) => break,
        };
        let reply = match line.trim() {
            "ping" => "pong".to_string(),
            "outcome" => match serde_json::to_string(&outcome) {
                Ok(json) => json,
                Err(e) => format!("error {}", e),
            },
            "quit" => break,
            "" => continue,
            other => format!("error unknown command '{}'", other),
        };
        if write_line(&mut stream, &reply).await.is_err() {
            return;
        }
    }
    let _ = stream.get_mut().shutdown().await;
}

async fn write_line(stream: &mut BufReader<TlsStream<TcpStream>>, line: &str) -> std::io::Result<()> {
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await
}
