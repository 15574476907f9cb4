// src/endpoint/observer.rs
//! Per-endpoint handshake outcome log.
//!
//! Every accepted TCP connection takes an [`AttemptTicket`] at arrival. The
//! ticket is move-only and is consumed by recording, so an attempt can be
//! recorded at most once; a ticket dropped unrecorded (task aborted, endpoint
//! closed) records itself as `io-failure` / `aborted`. Together this gives
//! exactly one record per attempt.

use crate::endpoint::EndpointHandle;
use crate::events::{
    dispatcher,
    model::{HandshakeEvent, LogEvent, LogLevel},
};
use crate::security::failure::{FailureKind, HandshakeFailure};
use crate::security::identity::PeerIdentity;
use crate::security::settings::TlsVersion;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeResult {
    Accepted,
    Rejected,
}

/// What the server observed for one connection attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeOutcome {
    /// Arrival order on this endpoint, starting at 1
    pub seq: u64,
    /// UNIX milliseconds at arrival
    pub timestamp_ms: u64,
    pub remote_addr: Option<String>,
    pub result: OutcomeResult,
    /// Subject DN of an accepted client certificate
    pub peer_identity: Option<String>,
    /// SPKI SHA-256 of a presented client certificate
    pub fingerprint: Option<String>,
    pub failure: Option<FailureKind>,
    pub detail: Option<String>,
    pub protocol: Option<TlsVersion>,
    pub cipher: Option<String>,
}

impl HandshakeOutcome {
    pub fn is_accepted(&self) -> bool {
        self.result == OutcomeResult::Accepted
    }
}

/// Negotiated parameters known once the TLS layer completed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Negotiated {
    pub protocol: Option<TlsVersion>,
    pub cipher: Option<String>,
}

pub struct HandshakeObserver {
    handle: EndpointHandle,
    capacity: usize,
    next_seq: AtomicU64,
    log: Mutex<BTreeMap<u64, HandshakeOutcome>>,
}

impl HandshakeObserver {
    pub fn new(handle: EndpointHandle, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            handle,
            capacity: capacity.max(1),
            next_seq: AtomicU64::new(1),
            log: Mutex::new(BTreeMap::new()),
        })
    }

    /// Register a connection attempt; called on the accept path before the handshake starts.
    pub fn ticket(self: &Arc<Self>, remote: Option<SocketAddr>) -> AttemptTicket {
        AttemptTicket {
            observer: self.clone(),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            timestamp_ms: now_ms(),
            remote_addr: remote.map(|a| a.to_string()),
            recorded: false,
        }
    }

    /// Snapshot of retained outcomes in arrival order
    pub fn outcomes(&self) -> Vec<HandshakeOutcome> {
        self.log.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attempts ever ticketed, including evicted and still-pending ones
    pub fn attempts(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst) - 1
    }

    fn insert(&self, outcome: HandshakeOutcome) {
        emit_handshake_event(self.handle, &outcome);
        let mut log = self.log.lock();
        log.insert(outcome.seq, outcome);
        while log.len() > self.capacity {
            log.pop_first();
        }
    }
}

/// Proof that a connection attempt arrived and still needs its record
pub struct AttemptTicket {
    observer: Arc<HandshakeObserver>,
    seq: u64,
    timestamp_ms: u64,
    remote_addr: Option<String>,
    recorded: bool,
}

impl AttemptTicket {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn accept(self, peer: Option<&PeerIdentity>, negotiated: Negotiated) -> HandshakeOutcome {
        self.record(
            OutcomeResult::Accepted,
            peer.map(|p| p.subject.clone()),
            peer.map(|p| p.fingerprint.clone()),
            None,
            negotiated,
        )
    }

    /// `fingerprint` is that of a presented certificate, if the TLS layer got that far
    pub fn reject(
        self,
        failure: HandshakeFailure,
        fingerprint: Option<String>,
        negotiated: Negotiated,
    ) -> HandshakeOutcome {
        self.record(
            OutcomeResult::Rejected,
            None,
            fingerprint,
            Some(failure),
            negotiated,
        )
    }

    fn record(
        mut self,
        result: OutcomeResult,
        peer_identity: Option<String>,
        fingerprint: Option<String>,
        failure: Option<HandshakeFailure>,
        negotiated: Negotiated,
    ) -> HandshakeOutcome {
        self.recorded = true;
        let (failure, detail) = match failure {
            Some(f) => (Some(f.kind), Some(f.detail)),
            None => (None, None),
        };
        let outcome = HandshakeOutcome {
            seq: self.seq,
            timestamp_ms: self.timestamp_ms,
            remote_addr: self.remote_addr.take(),
            result,
            peer_identity,
            fingerprint,
            failure,
            detail,
            protocol: negotiated.protocol,
            cipher: negotiated.cipher,
        };
        self.observer.insert(outcome.clone());
        outcome
    }
}

impl Drop for AttemptTicket {
    fn drop(&mut self) {
        if self.recorded {
            return;
        }
        self.recorded = true;
        let failure = HandshakeFailure::aborted();
        self.observer.insert(HandshakeOutcome {
            seq: self.seq,
            timestamp_ms: self.timestamp_ms,
            remote_addr: self.remote_addr.take(),
            result: OutcomeResult::Rejected,
            peer_identity: None,
            fingerprint: None,
            failure: Some(failure.kind),
            detail: Some(failure.detail),
            protocol: None,
            cipher: None,
        });
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn emit_handshake_event(handle: EndpointHandle, outcome: &HandshakeOutcome) {
    let level = if outcome.is_accepted() {
        LogLevel::Info
    } else {
        LogLevel::Warn
    };
    let mut meta = dispatcher::meta("handshake", level);
    meta.corr_id = Some(dispatcher::correlation_id());
    // one line per attempt would flood the console during matrix runs
    meta.suppress_console = outcome.is_accepted();
    dispatcher::emit(LogEvent::Handshake(HandshakeEvent {
        meta,
        handle: handle.0,
        seq: outcome.seq,
        result: match outcome.result {
            OutcomeResult::Accepted => "accepted".into(),
            OutcomeResult::Rejected => "rejected".into(),
        },
        failure: outcome.failure.map(|f| f.to_string()),
        detail: outcome.detail.clone(),
        peer_identity: outcome.peer_identity.clone(),
        fingerprint: outcome.fingerprint.clone(),
        protocol: outcome.protocol.map(|p| p.as_str().to_string()),
        cipher: outcome.cipher.clone(),
        peer_addr: outcome.remote_addr.clone(),
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Option<SocketAddr> {
        Some("127.0.0.1:40000".parse().unwrap())
    }

    #[test]
    fn sequences_follow_arrival_not_completion() {
        let obs = HandshakeObserver::new(EndpointHandle(1), 16);
        let first = obs.ticket(addr());
        let second = obs.ticket(addr());
        second.reject(
            HandshakeFailure::new(FailureKind::ProtocolMismatch, "no common version"),
            None,
            Negotiated::default(),
        );
        first.accept(None, Negotiated::default());
        let seqs: Vec<u64> = obs.outcomes().iter().map(|o| o.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert!(obs.outcomes()[0].is_accepted());
        assert_eq!(obs.outcomes()[1].failure, Some(FailureKind::ProtocolMismatch));
    }

    #[test]
    fn dropped_ticket_records_aborted() {
        let obs = HandshakeObserver::new(EndpointHandle(1), 16);
        drop(obs.ticket(addr()));
        let out = obs.outcomes();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].result, OutcomeResult::Rejected);
        assert_eq!(out[0].failure, Some(FailureKind::IoFailure));
        assert_eq!(out[0].detail.as_deref(), Some("aborted"));
        assert_eq!(out[0].remote_addr.as_deref(), Some("127.0.0.1:40000"));
    }

    #[test]
    fn full_log_evicts_oldest() {
        let obs = HandshakeObserver::new(EndpointHandle(1), 2);
        for _ in 0..3 {
            obs.ticket(None).accept(None, Negotiated::default());
        }
        let seqs: Vec<u64> = obs.outcomes().iter().map(|o| o.seq).collect();
        assert_eq!(seqs, vec![2, 3]);
        assert_eq!(obs.attempts(), 3);
    }

    #[test]
    fn outcome_json_shape() {
        let obs = HandshakeObserver::new(EndpointHandle(1), 4);
        let out = obs.ticket(None).reject(
            HandshakeFailure::new(FailureKind::CertificateUntrusted, "unknown issuer"),
            Some("ab".into()),
            Negotiated {
                protocol: Some(TlsVersion::Tls13),
                cipher: None,
            },
        );
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["result"], "rejected");
        assert_eq!(json["failure"], "certificate-untrusted");
        assert_eq!(json["protocol"], "TLSv1.3");
        let back: HandshakeOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, out);
    }
}
