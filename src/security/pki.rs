// src/security/pki.rs
//! Test PKI generation: a certificate authority that issues server and client leaves.
//! Used by `tlsfactory-cert` and by drivers that build handshake matrices on the fly.

use anyhow::{Context, Result};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::CertificateDer;
use std::str::FromStr;

const ORGANIZATION: &str = "tlsfactory";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafRole {
    Server,
    Client,
    Both,
}

impl FromStr for LeafRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(LeafRole::Server),
            "client" => Ok(LeafRole::Client),
            "both" => Ok(LeafRole::Both),
            other => Err(format!("unknown leaf role '{}'", other)),
        }
    }
}

/// PEM-encoded certificate and key, plus the DER of the certificate
#[derive(Debug, Clone)]
pub struct IssuedCert {
    pub cert_pem: String,
    pub key_pem: String,
    pub der: CertificateDer<'static>,
}

pub struct CertificateAuthority {
    cert: Certificate,
    key: KeyPair,
    cert_pem: String,
}

impl CertificateAuthority {
    pub fn generate(common_name: &str) -> Result<Self> {
        let mut params = CertificateParams::new(Vec::<String>::new())?;
        params.distinguished_name = distinguished_name(common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let key = KeyPair::generate().context("generate CA key")?;
        let cert = params.self_signed(&key).context("self-sign CA")?;
        let cert_pem = cert.pem();
        Ok(Self {
            cert,
            key,
            cert_pem,
        })
    }

    /// Load an existing CA so it can keep issuing leaves
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let params =
            CertificateParams::from_ca_cert_pem(cert_pem).context("parse CA certificate")?;
        let key = KeyPair::from_pem(key_pem).context("parse CA key")?;
        // re-signing yields an equivalent issuer (same subject and key) to sign with
        let cert = params.self_signed(&key).context("rebuild CA issuer")?;
        Ok(Self {
            cert,
            key,
            cert_pem: cert_pem.to_string(),
        })
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> String {
        self.key.serialize_pem()
    }

    pub fn issue(&self, common_name: &str, dns_names: &[&str], role: LeafRole) -> Result<IssuedCert> {
        let sans: Vec<String> = dns_names.iter().map(|s| s.to_string()).collect();
        let mut params = CertificateParams::new(sans).context("leaf subject alt names")?;
        params.distinguished_name = distinguished_name(common_name);
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = match role {
            LeafRole::Server => vec![ExtendedKeyUsagePurpose::ServerAuth],
            LeafRole::Client => vec![ExtendedKeyUsagePurpose::ClientAuth],
            LeafRole::Both => vec![
                ExtendedKeyUsagePurpose::ServerAuth,
                ExtendedKeyUsagePurpose::ClientAuth,
            ],
        };
        let key = KeyPair::generate().context("generate leaf key")?;
        let cert = params
            .signed_by(&key, &self.cert, &self.key)
            .with_context(|| format!("sign leaf '{}'", common_name))?;
        Ok(IssuedCert {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            der: cert.der().clone(),
        })
    }
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, ORGANIZATION);
    dn
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::identity::PeerIdentity;

    #[test]
    fn issued_leaf_carries_subject_and_names() {
        let ca = CertificateAuthority::generate("test CA").unwrap();
        let leaf = ca
            .issue("client-a", &["client-a.test"], LeafRole::Client)
            .unwrap();
        let id = PeerIdentity::from_leaf(&leaf.der).unwrap();
        assert!(id.subject.contains("CN=client-a"), "{}", id.subject);
        assert!(id.issuer.contains("CN=test CA"), "{}", id.issuer);
        assert_eq!(id.dns_names, vec!["client-a.test".to_string()]);
    }

    #[test]
    fn reloaded_ca_keeps_issuing_under_the_same_subject() {
        let ca = CertificateAuthority::generate("reload CA").unwrap();
        let again = CertificateAuthority::from_pem(ca.cert_pem(), &ca.key_pem()).unwrap();
        let leaf = again.issue("srv", &["localhost"], LeafRole::Server).unwrap();
        let id = PeerIdentity::from_leaf(&leaf.der).unwrap();
        assert!(id.issuer.contains("CN=reload CA"));
    }

    #[test]
    fn roles_parse() {
        assert_eq!(LeafRole::from_str("Client").unwrap(), LeafRole::Client);
        assert!(LeafRole::from_str("intermediate").is_err());
    }
}
