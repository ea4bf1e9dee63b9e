//! TLS client configuration for the broker connection
//!
//! Verification is on unless explicitly disabled. With verification on the
//! broker certificate must chain to the bundled web PKI roots or to the
//! optional CA bundle. With verification off any certificate is accepted,
//! but handshake signatures are still checked so the peer must hold the key
//! of the certificate it presents.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use thiserror::Error;
use tokio_rustls::TlsConnector;

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("Failed to read CA bundle {path}: {source}")]
    CaBundle {
        path: PathBuf,
        #[source]
        source: rustls::pki_types::pem::Error,
    },

    #[error("CA bundle {0} contains no certificates")]
    EmptyCaBundle(PathBuf),

    #[error("TLS error: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Broker TLS settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub verify_certificates: bool,
    pub ca_cert: Option<PathBuf>,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            verify_certificates: true,
            ca_cert: None,
        }
    }
}

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Build the client configuration used to connect to the broker
pub fn build_client_config(settings: &TlsSettings) -> Result<ClientConfig, TlsError> {
    let provider = crypto_provider();
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let config = if settings.verify_certificates {
        let roots = root_store(settings.ca_cert.as_deref())?;
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        tracing::warn!("Broker certificate verification is DISABLED");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
            .with_no_client_auth()
    };

    Ok(config)
}

/// Connector wrapping [`build_client_config`]
pub fn tls_connector(settings: &TlsSettings) -> Result<TlsConnector, TlsError> {
    Ok(TlsConnector::from(Arc::new(build_client_config(settings)?)))
}

fn root_store(ca_cert: Option<&Path>) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = ca_cert {
        let ca_bundle_error = |source| TlsError::CaBundle {
            path: path.to_path_buf(),
            source,
        };

        let mut added = 0usize;
        for cert in CertificateDer::pem_file_iter(path).map_err(ca_bundle_error)? {
            roots.add(cert.map_err(ca_bundle_error)?)?;
            added += 1;
        }

        if added == 0 {
            return Err(TlsError::EmptyCaBundle(path.to_path_buf()));
        }
        tracing::debug!(path = %path.display(), certificates = added, "Loaded broker CA bundle");
    }

    Ok(roots)
}

/// Accepts any server certificate; used only when verification is disabled
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
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
