//! TLS acceptor that follows its certificate files.
//!
//! Uses arc-swap so the accept loop never blocks while a rotated
//! certificate is loaded.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use arc_swap::ArcSwap;
use tokio_rustls::TlsAcceptor;

use crate::tls::{TlsConfigError, TlsServerConfig};

type Stamp = (Option<SystemTime>, Option<SystemTime>);

/// TLS acceptor rebuilt whenever the certificate or key file changes.
pub struct ReloadableTlsAcceptor {
    acceptor: ArcSwap<TlsAcceptor>,
    cert_path: PathBuf,
    key_path: PathBuf,
    stamp: Mutex<Stamp>,
}

impl ReloadableTlsAcceptor {
    /// Load the initial configuration. Fails if the files are unusable.
    pub fn load(cert_path: PathBuf, key_path: PathBuf) -> Result<Arc<Self>, TlsConfigError> {
        let stamp = Self::stamp_of(&cert_path, &key_path);
        let config = TlsServerConfig::from_files(&cert_path, &key_path)?;
        Ok(Arc::new(Self {
            acceptor: ArcSwap::from_pointee(TlsAcceptor::from(config.into_rustls_config())),
            cert_path,
            key_path,
            stamp: Mutex::new(stamp),
        }))
    }

    fn stamp_of(cert_path: &PathBuf, key_path: &PathBuf) -> Stamp {
        let modified = |p: &PathBuf| std::fs::metadata(p).and_then(|m| m.modified()).ok();
        (modified(cert_path), modified(key_path))
    }

    /// Current acceptor. Lock-free.
    pub fn current(&self) -> arc_swap::Guard<Arc<TlsAcceptor>> {
        self.acceptor.load()
    }

    /// Rebuild the acceptor if either file changed since the last load.
    ///
    /// On failure the previous configuration stays in service.
    pub fn reload_if_changed(&self) -> Result<bool, TlsConfigError> {
        let stamp = Self::stamp_of(&self.cert_path, &self.key_path);
        let mut last = self.stamp.lock().unwrap_or_else(|e| e.into_inner());
        if *last == stamp {
            return Ok(false);
        }

        let config = TlsServerConfig::from_files(&self.cert_path, &self.key_path)?;
        self.acceptor
            .store(Arc::new(TlsAcceptor::from(config.into_rustls_config())));
        *last = stamp;
        tracing::info!(cert = %self.cert_path.display(), "TLS credentials reloaded");
        Ok(true)
    }
}
