//! Client TLS configuration for upstream connections.
//!
//! The resulting `rustls::ClientConfig` is treated as opaque by the rest of the
//! proxy: the plain-HTTP client and the WebSocket dialer both receive the same
//! `Arc` and never inspect it.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::config::ClientTlsConfig;

/// Error type for TLS setup.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read CA bundle {path}: {source}")]
    CaFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CA bundle {0} contains no certificates")]
    EmptyCaFile(String),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

/// Build the client TLS configuration shared by every upstream connection.
pub fn build_client_config(config: &ClientTlsConfig) -> Result<Arc<ClientConfig>, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let client_config = if config.insecure_skip_verify {
        tracing::warn!("Upstream TLS certificate verification is disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipVerification(provider)))
            .with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        if let Some(path) = &config.ca_file {
            let added = add_pem_bundle(&mut roots, Path::new(path))?;
            tracing::info!(path = %path, certificates = added, "Loaded upstream CA bundle");
        }
        builder.with_root_certificates(roots).with_no_client_auth()
    };

    Ok(Arc::new(client_config))
}

fn add_pem_bundle(roots: &mut RootCertStore, path: &Path) -> Result<usize, TlsError> {
    let ca_error = |source| TlsError::CaFile {
        path: path.display().to_string(),
        source,
    };
    let file = File::open(path).map_err(ca_error)?;
    let mut reader = BufReader::new(file);

    let mut added = 0;
    for cert in rustls_pemfile::certs(&mut reader) {
        roots.add(cert.map_err(ca_error)?)?;
        added += 1;
    }

    if added == 0 {
        return Err(TlsError::EmptyCaFile(path.display().to_string()));
    }
    Ok(added)
}

/// Accepts any server certificate while still checking handshake signatures.
#[derive(Debug)]
struct SkipVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for SkipVerification {
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
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
