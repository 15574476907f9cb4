// src/security/verifier.rs

use crate::security::settings::VerificationMode;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::ClientCertVerifier;
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;

/// Client certificate verifier for an endpoint, or None when no client certificate is requested.
///
/// `Optional` without anchors requests nothing: there is no root a presented chain could be checked against.
pub fn client_verifier(
    mode: VerificationMode,
    roots: &RootCertStore,
    provider: &Arc<CryptoProvider>,
) -> Result<Option<Arc<dyn ClientCertVerifier>>, String> {
    let builder = || {
        WebPkiClientVerifier::builder_with_provider(Arc::new(roots.clone()), provider.clone())
    };
    match mode {
        VerificationMode::None => Ok(None),
        VerificationMode::Optional if roots.is_empty() => Ok(None),
        VerificationMode::Optional => builder()
            .allow_unauthenticated()
            .build()
            .map(Some)
            .map_err(|e| format!("client verifier: {}", e)),
        VerificationMode::Require => builder()
            .build()
            .map(Some)
            .map_err(|e| format!("client verifier: {}", e)),
    }
}

/// Server verifier used by probes that only care about the server's view of the handshake:
/// any certificate is accepted, handshake signatures are still checked.
#[derive(Debug)]
pub struct PermissiveServerVerifier {
    provider: Arc<CryptoProvider>,
}

impl PermissiveServerVerifier {
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for PermissiveServerVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> Arc<CryptoProvider> {
        Arc::new(rustls::crypto::ring::default_provider())
    }

    fn roots_with_one_ca() -> RootCertStore {
        let ck = rcgen::generate_simple_self_signed(vec!["ca.test".into()]).unwrap();
        let mut roots = RootCertStore::empty();
        roots.add(ck.cert.der().clone()).unwrap();
        roots
    }

    #[test]
    fn none_and_anchorless_optional_request_nothing() {
        let empty = RootCertStore::empty();
        assert!(client_verifier(VerificationMode::None, &empty, &provider())
            .unwrap()
            .is_none());
        assert!(client_verifier(VerificationMode::Optional, &empty, &provider())
            .unwrap()
            .is_none());
    }

    #[test]
    fn optional_allows_anonymous_require_does_not() {
        let roots = roots_with_one_ca();
        let optional = client_verifier(VerificationMode::Optional, &roots, &provider())
            .unwrap()
            .expect("verifier");
        assert!(optional.offer_client_auth());
        assert!(!optional.client_auth_mandatory());
        let required = client_verifier(VerificationMode::Require, &roots, &provider())
            .unwrap()
            .expect("verifier");
        assert!(required.client_auth_mandatory());
    }
}
