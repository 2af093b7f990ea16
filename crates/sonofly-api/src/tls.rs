// TLS configuration for the realtime socket.
//
// The dispatch service hands out a bare IP to connect to, while the
// gateway's certificate is issued for its domain, so strict verification
// cannot succeed against the resolved address. `DangerAcceptInvalid`
// mirrors what every production client of this cloud does on that socket
// and is therefore the default; `WebPkiRoots` is available for gateways
// fronted by a proper certificate.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

use crate::error::Error;

/// Certificate verification strategy for the wire-protocol socket.
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Verify against the Mozilla root store.
    WebPkiRoots,
    /// Accept any certificate. Required for bare-IP gateway endpoints.
    #[default]
    DangerAcceptInvalid,
}

/// Build a rustls client config for the given mode.
pub fn client_config(mode: &TlsMode) -> Result<Arc<ClientConfig>, Error> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

    let config = match mode {
        TlsMode::WebPkiRoots => {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            ClientConfig::builder_with_provider(provider)
                .with_safe_default_protocol_versions()
                .map_err(|e| Error::Tls(e.to_string()))?
                .with_root_certificates(roots)
                .with_no_client_auth()
        }
        TlsMode::DangerAcceptInvalid => ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification { provider }))
            .with_no_client_auth(),
    };

    Ok(Arc::new(config))
}

/// Verifier that accepts any server certificate but still checks
/// handshake signatures with the provider's algorithms.
#[derive(Debug)]
struct NoVerification {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NoVerification {
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
        rustls::crypto::verify_tls12_signature(
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
        rustls::crypto::verify_tls13_signature(
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

    #[test]
    fn both_modes_build() {
        assert!(client_config(&TlsMode::WebPkiRoots).is_ok());
        assert!(client_config(&TlsMode::DangerAcceptInvalid).is_ok());
    }

    #[test]
    fn default_mode_accepts_invalid() {
        assert!(matches!(TlsMode::default(), TlsMode::DangerAcceptInvalid));
    }
}
