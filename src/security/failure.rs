// src/security/failure.rs
// Map TLS / socket errors observed on the server side onto the failure taxonomy callers assert on.

use rustls::AlertDescription;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Peer certificate missing where required, unparsable, or not chaining to a trust anchor
    CertificateUntrusted,
    /// No common protocol version, cipher suite, group or signature scheme
    ProtocolMismatch,
    /// Handshake completed but the peer identity did not satisfy the configured matcher
    PeerIdentityMismatch,
    /// Peer sent bytes that are not a well-formed TLS handshake
    MalformedHandshake,
    /// Connection ended, stalled or was aborted before the handshake finished
    IoFailure,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::CertificateUntrusted => "certificate-untrusted",
            FailureKind::ProtocolMismatch => "protocol-mismatch",
            FailureKind::PeerIdentityMismatch => "peer-identity-mismatch",
            FailureKind::MalformedHandshake => "malformed-handshake",
            FailureKind::IoFailure => "io-failure",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified handshake failure: the kind plus a short diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl HandshakeFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn timeout() -> Self {
        Self::new(FailureKind::IoFailure, "handshake-timeout")
    }

    pub fn aborted() -> Self {
        Self::new(FailureKind::IoFailure, "aborted")
    }
}

/// Classify an error returned by `TlsAcceptor::accept`.
/// tokio-rustls wraps TLS-level errors as `io::ErrorKind::InvalidData` with the rustls error inside.
pub fn classify_io_error(err: &io::Error) -> HandshakeFailure {
    if let Some(tls) = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
    {
        return classify_tls_error(tls);
    }
    let detail = match err.kind() {
        io::ErrorKind::UnexpectedEof => "eof-before-handshake".to_string(),
        io::ErrorKind::ConnectionReset => "connection-reset".to_string(),
        io::ErrorKind::ConnectionAborted => "connection-aborted".to_string(),
        io::ErrorKind::BrokenPipe => "broken-pipe".to_string(),
        io::ErrorKind::TimedOut => "timed-out".to_string(),
        _ => err.to_string(),
    };
    HandshakeFailure::new(FailureKind::IoFailure, detail)
}

pub fn classify_tls_error(err: &rustls::Error) -> HandshakeFailure {
    use rustls::Error;
    let kind = match err {
        Error::InvalidCertificate(_)
        | Error::NoCertificatesPresented
        | Error::InvalidCertRevocationList(_)
        | Error::UnsupportedNameType => FailureKind::CertificateUntrusted,
        Error::PeerIncompatible(_) | Error::NoApplicationProtocol => FailureKind::ProtocolMismatch,
        Error::AlertReceived(alert) => classify_alert(*alert),
        Error::InvalidMessage(_)
        | Error::InappropriateMessage { .. }
        | Error::InappropriateHandshakeMessage { .. }
        | Error::PeerMisbehaved(_)
        | Error::PeerSentOversizedRecord
        | Error::DecryptError => FailureKind::MalformedHandshake,
        _ => FailureKind::MalformedHandshake,
    };
    HandshakeFailure::new(kind, err.to_string())
}

fn classify_alert(alert: AlertDescription) -> FailureKind {
    match alert {
        AlertDescription::BadCertificate
        | AlertDescription::UnsupportedCertificate
        | AlertDescription::CertificateRevoked
        | AlertDescription::CertificateExpired
        | AlertDescription::CertificateUnknown
        | AlertDescription::UnknownCA
        | AlertDescription::AccessDenied
        | AlertDescription::CertificateRequired
        | AlertDescription::NoCertificate => FailureKind::CertificateUntrusted,
        AlertDescription::ProtocolVersion
        | AlertDescription::HandshakeFailure
        | AlertDescription::InsufficientSecurity
        | AlertDescription::InappropriateFallback
        | AlertDescription::NoApplicationProtocol => FailureKind::ProtocolMismatch,
        AlertDescription::CloseNotify | AlertDescription::UserCanceled => FailureKind::IoFailure,
        _ => FailureKind::MalformedHandshake,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::{CertificateError, PeerIncompatible};

    fn wrapped(err: rustls::Error) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }

    #[test]
    fn certificate_errors_are_untrusted() {
        let f = classify_io_error(&wrapped(rustls::Error::InvalidCertificate(
            CertificateError::UnknownIssuer,
        )));
        assert_eq!(f.kind, FailureKind::CertificateUntrusted);
        let f = classify_io_error(&wrapped(rustls::Error::NoCertificatesPresented));
        assert_eq!(f.kind, FailureKind::CertificateUntrusted);
        let f = classify_tls_error(&rustls::Error::AlertReceived(AlertDescription::UnknownCA));
        assert_eq!(f.kind, FailureKind::CertificateUntrusted);
    }

    #[test]
    fn incompatibility_is_protocol_mismatch() {
        let f = classify_io_error(&wrapped(rustls::Error::PeerIncompatible(
            PeerIncompatible::NoCipherSuitesInCommon,
        )));
        assert_eq!(f.kind, FailureKind::ProtocolMismatch);
        let f = classify_tls_error(&rustls::Error::AlertReceived(
            AlertDescription::ProtocolVersion,
        ));
        assert_eq!(f.kind, FailureKind::ProtocolMismatch);
    }

    #[test]
    fn plain_io_errors_are_io_failures() {
        let f = classify_io_error(&io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert_eq!(f.kind, FailureKind::IoFailure);
        assert_eq!(f.detail, "eof-before-handshake");
        assert_eq!(HandshakeFailure::timeout().kind, FailureKind::IoFailure);
    }

    #[test]
    fn kinds_render_kebab_case() {
        assert_eq!(
            serde_json::to_string(&FailureKind::PeerIdentityMismatch).unwrap(),
            "\"peer-identity-mismatch\""
        );
        assert_eq!(FailureKind::MalformedHandshake.to_string(), "malformed-handshake");
    }
}
