// src/security/probe.rs
// TLS client used to exercise secure endpoints: one-shot probes and promoted sessions.

use crate::endpoint::HandshakeOutcome;
use crate::security::pem::{parse_certs, parse_private_key};
use crate::security::settings::{
    cipher_suite_name, parse_versions, restricted_provider, IdentitySpec, TlsVersion,
};
use crate::security::verifier::PermissiveServerVerifier;
use anyhow::{anyhow, bail, Context, Result};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore, SupportedProtocolVersion};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

#[derive(Debug, Clone, Default)]
pub struct ProbeConfig {
    /// Client certificate chain and key presented when the server asks for one
    pub identity: Option<IdentitySpec>,
    /// Offered versions; empty offers every supported version
    pub protocols: Vec<String>,
    /// Offered cipher suites; empty offers the provider defaults
    pub cipher_suites: Vec<String>,
    /// Anchors for the server certificate; empty accepts any server certificate
    pub server_anchors_pem: Vec<String>,
    /// SNI / verification name, `localhost` when empty
    pub server_name: String,
}

impl ProbeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(mut self, cert_chain_pem: impl Into<String>, key_pem: impl Into<String>) -> Self {
        self.identity = Some(IdentitySpec {
            cert_chain_pem: cert_chain_pem.into(),
            private_key_pem: key_pem.into(),
        });
        self
    }

    pub fn protocols(mut self, names: &[&str]) -> Self {
        self.protocols = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn cipher_suites(mut self, names: &[&str]) -> Self {
        self.cipher_suites = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn server_anchor(mut self, pem: impl Into<String>) -> Self {
        self.server_anchors_pem.push(pem.into());
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn client_config(&self) -> Result<Arc<ClientConfig>> {
        let provider = Arc::new(restricted_provider(&self.cipher_suites).map_err(|e| anyhow!(e))?);
        let versions = if self.protocols.is_empty() {
            TlsVersion::ALL.to_vec()
        } else {
            parse_versions(&self.protocols).map_err(|e| anyhow!(e))?
        };
        let versions: Vec<&'static SupportedProtocolVersion> =
            versions.iter().map(|v| v.supported()).collect();
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&versions)
            .context("probe protocol/cipher selection")?;
        let builder = if self.server_anchors_pem.is_empty() {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(PermissiveServerVerifier::new(provider)))
        } else {
            let mut roots = RootCertStore::empty();
            for pem in &self.server_anchors_pem {
                for cert in parse_certs(pem)? {
                    roots.add(cert).context("server anchor rejected")?;
                }
            }
            builder.with_root_certificates(roots)
        };
        let cfg = match &self.identity {
            Some(id) => builder
                .with_client_auth_cert(
                    parse_certs(&id.cert_chain_pem)?,
                    parse_private_key(&id.private_key_pem)?,
                )
                .context("invalid client identity")?,
            None => builder.with_no_client_auth(),
        };
        Ok(Arc::new(cfg))
    }

    fn sni(&self) -> Result<ServerName<'static>> {
        let name = if self.server_name.trim().is_empty() {
            "localhost"
        } else {
            self.server_name.trim()
        };
        ServerName::try_from(name.to_string()).map_err(|e| anyhow!("server name '{}': {}", name, e))
    }
}

/// Client-side view of a completed handshake.
///
/// With TLS 1.3 the client finishes before the server has checked its certificate,
/// so a report here does not mean the server accepted; the recorded outcome does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub protocol: Option<TlsVersion>,
    pub cipher: Option<String>,
}

/// Open TLS connection to a secure endpoint
pub struct ProbeSession {
    stream: BufReader<TlsStream<TcpStream>>,
    report: ProbeReport,
}

impl ProbeSession {
    pub async fn connect(addr: SocketAddr, cfg: &ProbeConfig, timeout: Duration) -> Result<Self> {
        let connector = TlsConnector::from(cfg.client_config()?);
        let sni = cfg.sni()?;
        let tcp = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| anyhow!("connect to {} timed out", addr))?
            .with_context(|| format!("connect to {}", addr))?;
        let tls = tokio::time::timeout(timeout, connector.connect(sni, tcp))
            .await
            .map_err(|_| anyhow!("handshake with {} timed out", addr))?
            .with_context(|| format!("handshake with {}", addr))?;
        let conn = tls.get_ref().1;
        let report = ProbeReport {
            protocol: conn.protocol_version().and_then(TlsVersion::from_protocol),
            cipher: conn.negotiated_cipher_suite().map(|s| cipher_suite_name(&s)),
        };
        Ok(Self {
            stream: BufReader::new(tls),
            report,
        })
    }

    pub fn report(&self) -> &ProbeReport {
        &self.report
    }

    /// Client-side socket address, as the endpoint records it in `remote_addr`
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.get_ref().get_ref().0.local_addr().ok()
    }

    /// Send one command line and read one reply line
    pub async fn request(&mut self, line: &str) -> Result<String> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\n").await?;
        self.stream.flush().await?;
        let mut reply = String::new();
        let n = self.stream.read_line(&mut reply).await?;
        if n == 0 {
            bail!("endpoint closed the connection");
        }
        Ok(reply.trim_end().to_string())
    }

    pub async fn ping(&mut self) -> Result<()> {
        match self.request("ping").await?.as_str() {
            "pong" => Ok(()),
            other => bail!("unexpected ping reply '{}'", other),
        }
    }

    /// The outcome the endpoint recorded for this very connection
    pub async fn outcome(&mut self) -> Result<HandshakeOutcome> {
        let reply = self.request("outcome").await?;
        serde_json::from_str(&reply).with_context(|| format!("bad outcome reply '{}'", reply))
    }

    pub async fn close(mut self) -> Result<()> {
        self.stream.get_mut().shutdown().await?;
        Ok(())
    }
}

/// Handshake once and disconnect
pub async fn probe(addr: SocketAddr, cfg: &ProbeConfig, timeout: Duration) -> Result<ProbeReport> {
    let session = ProbeSession::connect(addr, cfg, timeout).await?;
    let report = session.report().clone();
    // best effort: the server may already have closed its side
    let _ = session.close().await;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_a_permissive_client() {
        let cfg = ProbeConfig::new().client_config().expect("client config");
        assert!(!cfg.client_auth_cert_resolver.has_certs());
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!(ProbeConfig::new().protocols(&["SSLv2"]).client_config().is_err());
        assert!(ProbeConfig::new()
            .cipher_suites(&["NOT_A_SUITE"])
            .client_config()
            .is_err());
        assert!(ProbeConfig::new().server_anchor("garbage").client_config().is_err());
    }

    #[test]
    fn client_identity_is_loaded() {
        let ck = rcgen::generate_simple_self_signed(vec!["client.test".into()]).unwrap();
        let cfg = ProbeConfig::new()
            .identity(ck.cert.pem(), ck.key_pair.serialize_pem())
            .client_config()
            .expect("client config");
        assert!(cfg.client_auth_cert_resolver.has_certs());
    }
}
