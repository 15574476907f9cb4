// src/security/settings.rs
//! Security configuration of one secure endpoint.
//!
//! A remote caller sends a [`SecurityConfigSpec`] (PEM strings and names); it is
//! validated once into an immutable [`SecurityConfiguration`] that already holds
//! the built rustls `ServerConfig`, so nothing about the posture can fail later
//! at handshake time.

use crate::config::EndpointConfig;
use crate::error::{FactoryError, FactoryResult};
use crate::security::identity::{spki_der, PeerIdentityMatcher};
use crate::security::pem::{parse_certs, parse_private_key};
use crate::security::verifier::client_verifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ProtocolVersion, RootCertStore, ServerConfig, SupportedCipherSuite};
use rustls::SupportedProtocolVersion;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Policy for whether/how strictly a client certificate is validated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMode {
    #[default]
    None,
    Optional,
    Require,
}

impl FromStr for VerificationMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "0" => Ok(VerificationMode::None),
            "optional" | "1" => Ok(VerificationMode::Optional),
            "require" | "required" | "2" => Ok(VerificationMode::Require),
            other => Err(format!("unknown verification mode '{}'", other)),
        }
    }
}

/// What an endpoint does with a connection once its outcome is recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AfterHandshake {
    /// Send close_notify and drop the connection (pure handshake testing)
    #[default]
    Close,
    /// Keep the connection and serve the post-handshake line protocol
    Promote,
}

impl FromStr for AfterHandshake {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "close" => Ok(AfterHandshake::Close),
            "promote" | "keep" => Ok(AfterHandshake::Promote),
            other => Err(format!("unknown after-handshake policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "TLSv1.2")]
    Tls12,
    #[serde(rename = "TLSv1.3")]
    Tls13,
}

impl TlsVersion {
    pub const ALL: [TlsVersion; 2] = [TlsVersion::Tls12, TlsVersion::Tls13];

    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }

    pub fn supported(&self) -> &'static SupportedProtocolVersion {
        match self {
            TlsVersion::Tls12 => &rustls::version::TLS12,
            TlsVersion::Tls13 => &rustls::version::TLS13,
        }
    }

    pub fn from_protocol(v: ProtocolVersion) -> Option<Self> {
        match v {
            ProtocolVersion::TLSv1_2 => Some(TlsVersion::Tls12),
            ProtocolVersion::TLSv1_3 => Some(TlsVersion::Tls13),
            _ => None,
        }
    }

    fn matches(&self, v: ProtocolVersion) -> bool {
        Self::from_protocol(v) == Some(*self)
    }
}

impl FromStr for TlsVersion {
    type Err = String;
    /// Accepts `TLSv1.2`, `TLS1.2`, `tls1_2`, `1.2`, `12` and the same forms for 1.3
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let bare = lower
            .strip_prefix("tlsv")
            .or_else(|| lower.strip_prefix("tls"))
            .unwrap_or(lower.as_str());
        match bare {
            "1.2" | "1_2" | "12" => Ok(TlsVersion::Tls12),
            "1.3" | "1_3" | "13" => Ok(TlsVersion::Tls13),
            _ => Err(format!("unknown protocol version '{}'", s.trim())),
        }
    }
}

/// Parse an ordered, de-duplicated version list
pub fn parse_versions(names: &[String]) -> Result<Vec<TlsVersion>, String> {
    let mut out = Vec::new();
    for name in names {
        let v = TlsVersion::from_str(name)?;
        if !out.contains(&v) {
            out.push(v);
        }
    }
    Ok(out)
}

/// IANA-style name of a cipher suite (e.g. `TLS13_AES_128_GCM_SHA256`)
pub fn cipher_suite_name(suite: &SupportedCipherSuite) -> String {
    format!("{:?}", suite.suite())
}

/// Every cipher suite name the crypto provider knows
pub fn available_cipher_suites() -> Vec<String> {
    rustls::crypto::ring::default_provider()
        .cipher_suites
        .iter()
        .map(cipher_suite_name)
        .collect()
}

/// Build a provider restricted to the named cipher suites (in the given order).
/// An empty list keeps the provider defaults.
pub fn restricted_provider(cipher_names: &[String]) -> Result<CryptoProvider, String> {
    let mut provider = rustls::crypto::ring::default_provider();
    if cipher_names.is_empty() {
        return Ok(provider);
    }
    let mut selected: Vec<SupportedCipherSuite> = Vec::new();
    for name in cipher_names {
        let wanted = name.trim();
        let suite = provider
            .cipher_suites
            .iter()
            .find(|s| cipher_suite_name(s).eq_ignore_ascii_case(wanted))
            .copied()
            .ok_or_else(|| format!("unknown cipher suite '{}'", wanted))?;
        if !selected.iter().any(|s| s.suite() == suite.suite()) {
            selected.push(suite);
        }
    }
    provider.cipher_suites = selected;
    Ok(provider)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySpec {
    /// Leaf first, then intermediates
    pub cert_chain_pem: String,
    pub private_key_pem: String,
}

/// Creation request parameters, as carried over the factory RPC
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfigSpec {
    /// Root certificates client chains must lead to (PEM, one or more per entry)
    pub trust_anchors_pem: Vec<String>,
    /// Server identity; an ephemeral self-signed `localhost` identity is generated when absent
    pub identity: Option<IdentitySpec>,
    pub verify: VerificationMode,
    /// Allowed versions (`TLSv1.2`, `TLSv1.3`); absent means every supported version
    pub protocols: Option<Vec<String>>,
    /// Allowed cipher suites by name; empty means the provider defaults
    pub cipher_suites: Vec<String>,
    /// Expected peer identity pattern (see [`PeerIdentityMatcher`])
    pub peer_identity: Option<String>,
    /// Listening address; defaults to an ephemeral port on the configured bind host
    pub bind: Option<String>,
    pub handshake_timeout_ms: Option<u64>,
    pub after_handshake: AfterHandshake,
}

impl SecurityConfigSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verify(mut self, mode: VerificationMode) -> Self {
        self.verify = mode;
        self
    }

    pub fn trust_anchor(mut self, pem: impl Into<String>) -> Self {
        self.trust_anchors_pem.push(pem.into());
        self
    }

    pub fn identity(mut self, cert_chain_pem: impl Into<String>, key_pem: impl Into<String>) -> Self {
        self.identity = Some(IdentitySpec {
            cert_chain_pem: cert_chain_pem.into(),
            private_key_pem: key_pem.into(),
        });
        self
    }

    pub fn protocols(mut self, names: &[&str]) -> Self {
        self.protocols = Some(names.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn cipher_suites(mut self, names: &[&str]) -> Self {
        self.cipher_suites = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn peer_identity(mut self, pattern: impl Into<String>) -> Self {
        self.peer_identity = Some(pattern.into());
        self
    }

    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.bind = Some(addr.into());
        self
    }

    pub fn handshake_timeout_ms(mut self, ms: u64) -> Self {
        self.handshake_timeout_ms = Some(ms);
        self
    }

    pub fn after_handshake(mut self, policy: AfterHandshake) -> Self {
        self.after_handshake = policy;
        self
    }
}

/// Validated, immutable TLS posture of one endpoint
#[derive(Debug, Clone)]
pub struct SecurityConfiguration {
    trust_anchors: Vec<CertificateDer<'static>>,
    identity_chain: Vec<CertificateDer<'static>>,
    identity_generated: bool,
    verify: VerificationMode,
    protocols: Vec<TlsVersion>,
    cipher_suites: Vec<String>,
    peer_identity: Option<PeerIdentityMatcher>,
    bind_addr: SocketAddr,
    handshake_timeout: Duration,
    after_handshake: AfterHandshake,
    server_config: Arc<ServerConfig>,
}

impl SecurityConfiguration {
    /// Validate a creation request. Every failure is `InvalidConfiguration`.
    pub fn from_spec(spec: &SecurityConfigSpec, defaults: &EndpointConfig) -> FactoryResult<Self> {
        if spec.verify == VerificationMode::Require && spec.trust_anchors_pem.is_empty() {
            return Err(FactoryError::invalid(
                "verification mode 'require' needs at least one trust anchor",
            ));
        }

        let protocols = match &spec.protocols {
            None => TlsVersion::ALL.to_vec(),
            Some(names) => parse_versions(names).map_err(FactoryError::invalid)?,
        };
        if protocols.is_empty() {
            return Err(FactoryError::invalid("protocol version set is empty"));
        }

        let provider = restricted_provider(&spec.cipher_suites).map_err(FactoryError::invalid)?;

        let mut roots = RootCertStore::empty();
        let mut trust_anchors = Vec::new();
        for (idx, pem) in spec.trust_anchors_pem.iter().enumerate() {
            let certs = parse_certs(pem)
                .map_err(|e| FactoryError::invalid(format!("trust anchor #{}: {:#}", idx, e)))?;
            for cert in certs {
                roots.add(cert.clone()).map_err(|e| {
                    FactoryError::invalid(format!("trust anchor #{} rejected: {}", idx, e))
                })?;
                trust_anchors.push(cert);
            }
        }

        let (identity_chain, key, identity_generated) = match &spec.identity {
            Some(id) => {
                let chain = parse_certs(&id.cert_chain_pem).map_err(|e| {
                    FactoryError::invalid(format!("malformed local identity certificate: {:#}", e))
                })?;
                let key = parse_private_key(&id.private_key_pem).map_err(|e| {
                    FactoryError::invalid(format!("malformed local identity key: {:#}", e))
                })?;
                (chain, key, false)
            }
            None => {
                let (chain, key) = ephemeral_identity()?;
                (chain, key, true)
            }
        };

        let signing_key = provider
            .key_provider
            .load_private_key(key.clone_key())
            .map_err(|e| FactoryError::invalid(format!("unsupported local identity key: {}", e)))?;
        if let (Some(key_spki), Some(cert_spki)) =
            (signing_key.public_key(), spki_der(&identity_chain[0]))
        {
            if key_spki.as_ref() != cert_spki.as_slice() {
                return Err(FactoryError::invalid(
                    "local identity certificate does not match its private key",
                ));
            }
        }

        let key_algorithm = signing_key.algorithm();
        let usable = provider.cipher_suites.iter().any(|s| {
            protocols.iter().any(|p| p.matches(s.version().version))
                && s.usable_for_signature_algorithm(key_algorithm)
        });
        if !usable {
            return Err(FactoryError::invalid(format!(
                "no allowed cipher suite is usable with protocols {:?} and a {:?} identity key",
                protocols.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
                key_algorithm
            )));
        }
        let cipher_suites = provider.cipher_suites.iter().map(cipher_suite_name).collect();

        let peer_identity = match &spec.peer_identity {
            Some(p) => Some(
                PeerIdentityMatcher::new(p)
                    .ok_or_else(|| FactoryError::invalid("peer identity pattern is empty"))?,
            ),
            None => None,
        };

        let bind_addr = resolve_bind_addr(spec.bind.as_deref(), defaults.default_bind_host())?;

        let handshake_timeout = match spec.handshake_timeout_ms {
            Some(0) => {
                return Err(FactoryError::invalid("handshake_timeout_ms must be positive"));
            }
            Some(ms) => Duration::from_millis(ms),
            None => defaults.handshake_timeout(),
        };

        let provider = Arc::new(provider);
        let versions: Vec<&'static SupportedProtocolVersion> =
            protocols.iter().map(|p| p.supported()).collect();
        let builder = ServerConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&versions)
            .map_err(|e| FactoryError::invalid(format!("protocol/cipher selection: {}", e)))?;
        let builder = match client_verifier(spec.verify, &roots, &provider)
            .map_err(FactoryError::invalid)?
        {
            Some(verifier) => builder.with_client_cert_verifier(verifier),
            None => builder.with_no_client_auth(),
        };
        let server_config = builder
            .with_single_cert(identity_chain.clone(), key)
            .map_err(|e| FactoryError::invalid(format!("local identity rejected: {}", e)))?;

        Ok(Self {
            trust_anchors,
            identity_chain,
            identity_generated,
            verify: spec.verify,
            protocols,
            cipher_suites,
            peer_identity,
            bind_addr,
            handshake_timeout,
            after_handshake: spec.after_handshake,
            server_config: Arc::new(server_config),
        })
    }

    pub fn trust_anchors(&self) -> &[CertificateDer<'static>] {
        &self.trust_anchors
    }
    pub fn identity_chain(&self) -> &[CertificateDer<'static>] {
        &self.identity_chain
    }
    pub fn identity_generated(&self) -> bool {
        self.identity_generated
    }
    pub fn verify(&self) -> VerificationMode {
        self.verify
    }
    pub fn protocols(&self) -> &[TlsVersion] {
        &self.protocols
    }
    pub fn cipher_suites(&self) -> &[String] {
        &self.cipher_suites
    }
    pub fn peer_identity(&self) -> Option<&PeerIdentityMatcher> {
        self.peer_identity.as_ref()
    }
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }
    pub fn after_handshake(&self) -> AfterHandshake {
        self.after_handshake
    }
    pub fn server_config(&self) -> Arc<ServerConfig> {
        self.server_config.clone()
    }
}

fn ephemeral_identity() -> FactoryResult<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let ck = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| FactoryError::invalid(format!("ephemeral identity generation: {}", e)))?;
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(ck.key_pair.serialize_der()));
    Ok((vec![ck.cert.der().clone()], key))
}

fn resolve_bind_addr(requested: Option<&str>, default_host: &str) -> FactoryResult<SocketAddr> {
    match requested {
        Some(addr) => addr
            .trim()
            .parse::<SocketAddr>()
            .map_err(|e| FactoryError::invalid(format!("bind address '{}': {}", addr, e))),
        None => default_host
            .parse::<IpAddr>()
            .map(|ip| SocketAddr::new(ip, 0))
            .map_err(|e| FactoryError::invalid(format!("bind host '{}': {}", default_host, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> EndpointConfig {
        EndpointConfig::default()
    }

    fn expect_invalid(spec: SecurityConfigSpec, needle: &str) {
        match SecurityConfiguration::from_spec(&spec, &defaults()) {
            Err(FactoryError::InvalidConfiguration(msg)) => {
                assert!(msg.contains(needle), "message '{}' lacks '{}'", msg, needle)
            }
            other => panic!("expected InvalidConfiguration, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn default_spec_is_valid_with_generated_identity() {
        let cfg = SecurityConfiguration::from_spec(&SecurityConfigSpec::new(), &defaults())
            .expect("valid");
        assert!(cfg.identity_generated());
        assert!(cfg.trust_anchors().is_empty());
        assert_eq!(cfg.protocols(), &TlsVersion::ALL);
        assert_eq!(cfg.verify(), VerificationMode::None);
        assert_eq!(cfg.bind_addr().port(), 0);
        assert!(!cfg.cipher_suites().is_empty());
    }

    #[test]
    fn require_without_anchor_is_invalid() {
        expect_invalid(
            SecurityConfigSpec::new().verify(VerificationMode::Require),
            "trust anchor",
        );
    }

    #[test]
    fn empty_or_unknown_protocols_are_invalid() {
        expect_invalid(SecurityConfigSpec::new().protocols(&[]), "empty");
        expect_invalid(SecurityConfigSpec::new().protocols(&["SSLv3"]), "unknown protocol");
    }

    #[test]
    fn unknown_or_unusable_ciphers_are_invalid() {
        expect_invalid(
            SecurityConfigSpec::new().cipher_suites(&["TLS_NULL_WITH_NULL_NULL"]),
            "unknown cipher suite",
        );
        // TLS 1.3 suite only, but TLS 1.3 not allowed
        expect_invalid(
            SecurityConfigSpec::new()
                .protocols(&["TLSv1.2"])
                .cipher_suites(&["TLS13_AES_128_GCM_SHA256"]),
            "no allowed cipher suite",
        );
    }

    #[test]
    fn mismatched_identity_is_invalid() {
        let a = rcgen::generate_simple_self_signed(vec!["a.test".into()]).unwrap();
        let b = rcgen::generate_simple_self_signed(vec!["b.test".into()]).unwrap();
        expect_invalid(
            SecurityConfigSpec::new().identity(a.cert.pem(), b.key_pair.serialize_pem()),
            "does not match",
        );
        expect_invalid(
            SecurityConfigSpec::new().identity("garbage", a.key_pair.serialize_pem()),
            "malformed local identity",
        );
    }

    #[test]
    fn matching_identity_is_kept() {
        let a = rcgen::generate_simple_self_signed(vec!["a.test".into()]).unwrap();
        let cfg = SecurityConfiguration::from_spec(
            &SecurityConfigSpec::new().identity(a.cert.pem(), a.key_pair.serialize_pem()),
            &defaults(),
        )
        .expect("valid");
        assert!(!cfg.identity_generated());
        assert_eq!(cfg.identity_chain()[0].as_ref(), a.cert.der().as_ref());
    }

    #[test]
    fn bad_anchor_pattern_bind_and_timeout_are_invalid() {
        expect_invalid(
            SecurityConfigSpec::new()
                .verify(VerificationMode::Require)
                .trust_anchor("not pem"),
            "trust anchor #0",
        );
        expect_invalid(SecurityConfigSpec::new().peer_identity("~"), "pattern");
        expect_invalid(SecurityConfigSpec::new().bind("localhost:99999"), "bind address");
        expect_invalid(SecurityConfigSpec::new().handshake_timeout_ms(0), "positive");
    }

    #[test]
    fn version_names_parse_leniently() {
        assert_eq!(TlsVersion::from_str("TLSv1.3").unwrap(), TlsVersion::Tls13);
        assert_eq!(TlsVersion::from_str("tls1_2").unwrap(), TlsVersion::Tls12);
        assert_eq!(
            parse_versions(&["1.3".into(), "TLSv1.3".into(), "1.2".into()]).unwrap(),
            vec![TlsVersion::Tls13, TlsVersion::Tls12]
        );
        assert_eq!(
            serde_json::to_string(&TlsVersion::Tls12).unwrap(),
            "\"TLSv1.2\""
        );
    }

    #[test]
    fn foreign_or_mangled_version_names_are_rejected() {
        for name in ["DTLSv1.2", "SSLv1.3", "x1y2", "TLSv1.2.1", "TLSv12x", "tlsv", ""] {
            assert!(TlsVersion::from_str(name).is_err(), "{} accepted", name);
        }
        expect_invalid(
            SecurityConfigSpec::new().protocols(&["DTLSv1.2"]),
            "unknown protocol",
        );
        expect_invalid(
            SecurityConfigSpec::new().protocols(&["TLSv1.3", "SSLv1.3"]),
            "unknown protocol",
        );
    }
}
