// src/security/pem.rs
// PEM helpers shared by endpoint configuration, the probe and the CLI tools.

use anyhow::{anyhow, Context, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::io::BufReader;
use std::path::Path;

/// Parse every certificate in a PEM blob (leaf first when it is a chain).
pub fn parse_certs(pem: &str) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(pem.as_bytes());
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse certificate PEM")?;
    if certs.is_empty() {
        return Err(anyhow!("no certificate entries found"));
    }
    Ok(certs)
}

/// Parse the first private key (PKCS#8, PKCS#1 or SEC1) in a PEM blob.
pub fn parse_private_key(pem: &str) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(pem.as_bytes());
    rustls_pemfile::private_key(&mut reader)
        .context("failed to read private key PEM")?
        .ok_or_else(|| anyhow!("no private key found in PEM data"))
}

pub fn read_pem_file<P: AsRef<Path>>(path: P) -> Result<String> {
    std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read {}", path.as_ref().display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_garbage_input() {
        assert!(parse_certs("").is_err());
        assert!(parse_certs("not a pem").is_err());
        assert!(parse_private_key("also not a pem").is_err());
    }

    #[test]
    fn parses_generated_material() {
        let ck = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
        let certs = parse_certs(&ck.cert.pem()).unwrap();
        assert_eq!(certs.len(), 1);
        assert_eq!(certs[0].as_ref(), ck.cert.der().as_ref());
        let key = parse_private_key(&ck.key_pair.serialize_pem()).unwrap();
        assert!(matches!(key, PrivateKeyDer::Pkcs8(_)));
    }
}
