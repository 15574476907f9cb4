// Shared fixtures for integration tests: an on-the-fly PKI, registry setup and polling helpers.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tlsfactory::config::EndpointConfig;
use tlsfactory::endpoint::{EndpointHandle, EndpointRegistry, HandshakeOutcome};
use tlsfactory::security::pki::{CertificateAuthority, IssuedCert, LeafRole};
use tlsfactory::security::{probe, ProbeConfig, ProbeReport};

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
pub const WAIT: Duration = Duration::from_secs(5);

pub struct Pki {
    pub ca: CertificateAuthority,
    pub rogue_ca: CertificateAuthority,
    pub server: IssuedCert,
    pub client_a: IssuedCert,
    pub client_b: IssuedCert,
    /// Same subject as client-a, issued by the rogue CA
    pub rogue_client: IssuedCert,
}

impl Pki {
    pub fn generate() -> Self {
        let ca = CertificateAuthority::generate("matrix CA").unwrap();
        let rogue_ca = CertificateAuthority::generate("rogue CA").unwrap();
        let server = ca.issue("server", &["localhost"], LeafRole::Server).unwrap();
        let client_a = ca
            .issue("client-a", &["client-a.test"], LeafRole::Client)
            .unwrap();
        let client_b = ca
            .issue("client-b", &["client-b.test"], LeafRole::Client)
            .unwrap();
        let rogue_client = rogue_ca
            .issue("client-a", &["client-a.test"], LeafRole::Client)
            .unwrap();
        Self {
            ca,
            rogue_ca,
            server,
            client_a,
            client_b,
            rogue_client,
        }
    }

    pub fn client(&self, leaf: &IssuedCert) -> ProbeConfig {
        ProbeConfig::new().identity(leaf.cert_pem.clone(), leaf.key_pem.clone())
    }
}

pub fn endpoint_settings() -> EndpointConfig {
    EndpointConfig {
        handshake_timeout_ms: Some(3_000),
        close_timeout_ms: Some(1_000),
        ..EndpointConfig::default()
    }
}

pub fn registry() -> EndpointRegistry {
    EndpointRegistry::new(endpoint_settings())
}

/// One client handshake. The client-side result is informational only: with TLS 1.3 the
/// client may finish before the server rejects it, so assertions use the recorded outcome.
pub async fn attempt(addr: SocketAddr, cfg: &ProbeConfig) -> anyhow::Result<ProbeReport> {
    probe(addr, cfg, PROBE_TIMEOUT).await
}

/// Poll until at least `n` outcomes are recorded or `WAIT` elapses.
pub async fn wait_for_outcomes(
    registry: &EndpointRegistry,
    handle: EndpointHandle,
    n: usize,
) -> Vec<HandshakeOutcome> {
    let deadline = Instant::now() + WAIT;
    loop {
        let outcomes = registry.query(handle).expect("live handle");
        if outcomes.len() >= n || Instant::now() >= deadline {
            return outcomes;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Single-attempt convenience: run the attempt and return the one recorded outcome.
pub async fn single_outcome(
    registry: &EndpointRegistry,
    handle: EndpointHandle,
    addr: SocketAddr,
    cfg: &ProbeConfig,
) -> HandshakeOutcome {
    let _ = attempt(addr, cfg).await;
    let mut outcomes = wait_for_outcomes(registry, handle, 1).await;
    assert_eq!(outcomes.len(), 1, "expected exactly one outcome: {:?}", outcomes);
    outcomes.remove(0)
}
