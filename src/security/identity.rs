// src/security/identity.rs

use base16ct::lower::encode_string;
use rustls::pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use x509_parser::extensions::GeneralName;

/// Identity facts extracted from a presented leaf certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// Subject distinguished name as rendered by x509-parser (e.g. `CN=client-a, O=Acme`)
    pub subject: String,
    pub issuer: String,
    /// DNS subject alternative names, in certificate order
    pub dns_names: Vec<String>,
    /// Lowercase hex SHA-256 over the SubjectPublicKeyInfo
    pub fingerprint: String,
}

impl PeerIdentity {
    /// Parse the leaf. Returns None when the DER is not an X.509 certificate.
    pub fn from_leaf(cert: &CertificateDer<'_>) -> Option<Self> {
        let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref()).ok()?;
        let mut dns_names = Vec::new();
        if let Ok(Some(san)) = parsed.subject_alternative_name() {
            for name in &san.value.general_names {
                if let GeneralName::DNSName(dns) = name {
                    dns_names.push(dns.to_string());
                }
            }
        }
        Some(Self {
            subject: parsed.subject().to_string(),
            issuer: parsed.issuer().to_string(),
            dns_names,
            fingerprint: spki_fingerprint(cert),
        })
    }
}

/// SHA-256 fingerprint of the certificate SubjectPublicKeyInfo.
/// Falls back to hashing the full DER so unparsable input still gets a stable identifier.
pub fn spki_fingerprint(cert: &CertificateDer<'_>) -> String {
    let der = cert.as_ref();
    let mut h = Sha256::new();
    match x509_parser::parse_x509_certificate(der) {
        Ok((_, parsed)) => h.update(parsed.tbs_certificate.subject_pki.raw),
        Err(_) => h.update(der),
    }
    encode_string(&h.finalize())
}

/// Raw SubjectPublicKeyInfo bytes of a certificate, if it parses
pub fn spki_der(cert: &CertificateDer<'_>) -> Option<Vec<u8>> {
    x509_parser::parse_x509_certificate(cert.as_ref())
        .ok()
        .map(|(_, parsed)| parsed.tbs_certificate.subject_pki.raw.to_vec())
}

/// Expected peer identity.
///
/// * `CN=client, O=Acme` matches the exact subject DN
/// * `~client` matches any subject DN containing `client`
/// * a bare DNS name matches a DNS subject alternative name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentityMatcher {
    pattern: String,
}

impl PeerIdentityMatcher {
    /// Returns None for an empty pattern (including a lone `~`)
    pub fn new(pattern: &str) -> Option<Self> {
        let trimmed = pattern.trim();
        let body = trimmed.strip_prefix('~').unwrap_or(trimmed);
        if body.is_empty() {
            return None;
        }
        Some(Self {
            pattern: trimmed.to_string(),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, peer: &PeerIdentity) -> bool {
        if let Some(needle) = self.pattern.strip_prefix('~') {
            return peer.subject.contains(needle);
        }
        peer.subject == self.pattern
            || peer
                .dns_names
                .iter()
                .any(|d| d.eq_ignore_ascii_case(&self.pattern))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DnType, KeyPair};

    const DUMMY_CERT: &[u8] = b"\x30\x03\x02\x01\x01";

    fn leaf(cn: &str, sans: &[&str]) -> CertificateDer<'static> {
        let mut params =
            CertificateParams::new(sans.iter().map(|s| s.to_string()).collect::<Vec<_>>())
                .unwrap();
        params.distinguished_name = rcgen::DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, cn);
        params.distinguished_name.push(DnType::OrganizationName, "Acme");
        let key = KeyPair::generate().unwrap();
        params.self_signed(&key).unwrap().der().clone()
    }

    #[test]
    fn fingerprint_fallback_is_deterministic() {
        let a = spki_fingerprint(&CertificateDer::from(DUMMY_CERT.to_vec()));
        let b = spki_fingerprint(&CertificateDer::from(DUMMY_CERT.to_vec()));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(PeerIdentity::from_leaf(&CertificateDer::from(DUMMY_CERT.to_vec())).is_none());
    }

    #[test]
    fn extracts_subject_and_dns_names() {
        let cert = leaf("client-a", &["client-a.test"]);
        let id = PeerIdentity::from_leaf(&cert).expect("parse");
        assert!(id.subject.contains("CN=client-a"), "{}", id.subject);
        assert!(id.subject.contains("O=Acme"), "{}", id.subject);
        assert_eq!(id.dns_names, vec!["client-a.test".to_string()]);
        assert_eq!(id.fingerprint, spki_fingerprint(&cert));
    }

    #[test]
    fn matcher_forms() {
        let id = PeerIdentity::from_leaf(&leaf("client-a", &["client-a.test"])).unwrap();
        assert!(PeerIdentityMatcher::new(&id.subject).unwrap().matches(&id));
        assert!(PeerIdentityMatcher::new("~client-a").unwrap().matches(&id));
        assert!(PeerIdentityMatcher::new("CLIENT-A.test").unwrap().matches(&id));
        assert!(!PeerIdentityMatcher::new("~client-b").unwrap().matches(&id));
        assert!(!PeerIdentityMatcher::new("CN=client-a").unwrap().matches(&id));
        assert!(PeerIdentityMatcher::new("  ").is_none());
        assert!(PeerIdentityMatcher::new("~").is_none());
    }
}
