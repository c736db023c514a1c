//! TLS server configuration for the redemption endpoint.
//!
//! Uses rustls 0.23+ with the ring provider. Clients authenticate with the
//! grant secret, not a certificate, so no client verifier is installed.

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use x509_parser::prelude::*;

/// TLS server configuration wrapper.
pub struct TlsServerConfig {
    pub config: Arc<ServerConfig>,
}

impl TlsServerConfig {
    /// Get the underlying rustls ServerConfig.
    pub fn into_rustls_config(self) -> Arc<ServerConfig> {
        self.config
    }

    /// Build from a PEM certificate chain and PEM private key.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, TlsConfigError> {
        let chain = CertificateDer::pem_slice_iter(cert_pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsConfigError::InvalidCert(e.to_string()))?;
        let Some(leaf) = chain.first() else {
            return Err(TlsConfigError::InvalidCert(
                "no certificate found in PEM".to_string(),
            ));
        };
        verify_certificate_validity(leaf)?;

        let key = PrivateKeyDer::from_pem_slice(key_pem)
            .map_err(|e| TlsConfigError::InvalidKey(e.to_string()))?;

        let mut config =
            ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()
                .map_err(|e| TlsConfigError::Config(e.to_string()))?
                .with_no_client_auth()
                .with_single_cert(chain, key)
                .map_err(|e| TlsConfigError::Config(e.to_string()))?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Build from PEM files on disk.
    pub fn from_files(cert_path: &Path, key_path: &Path) -> Result<Self, TlsConfigError> {
        let cert_pem = std::fs::read(cert_path).map_err(|e| TlsConfigError::Io {
            path: cert_path.display().to_string(),
            source: e,
        })?;
        let key_pem = std::fs::read(key_path).map_err(|e| TlsConfigError::Io {
            path: key_path.display().to_string(),
            source: e,
        })?;
        Self::from_pem(&cert_pem, &key_pem)
    }
}

/// Reject certificates outside their validity window.
fn verify_certificate_validity(cert_der: &[u8]) -> Result<(), TlsConfigError> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| TlsConfigError::InvalidCert(format!("failed to parse certificate: {}", e)))?;

    let validity = cert.validity();
    let now = SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|_| TlsConfigError::InvalidCert("system time error".to_string()))?
        .as_secs() as i64;

    let not_before = validity.not_before.timestamp();
    let not_after = validity.not_after.timestamp();

    if now < not_before {
        return Err(TlsConfigError::CertNotYetValid {
            not_before: not_before as u64,
            now: now as u64,
        });
    }

    if now > not_after {
        return Err(TlsConfigError::CertExpired {
            not_after: not_after as u64,
            now: now as u64,
        });
    }

    Ok(())
}

/// Errors that can occur during TLS configuration.
#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("invalid certificate: {0}")]
    InvalidCert(String),
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    #[error("failed to build config: {0}")]
    Config(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("certificate not yet valid (not_before: {not_before}, now: {now})")]
    CertNotYetValid { not_before: u64, now: u64 },
    #[error("certificate expired (not_after: {not_after}, now: {now})")]
    CertExpired { not_after: u64, now: u64 },
}
