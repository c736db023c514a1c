//! TLS for the redemption endpoint and credential minting.

mod cert;
mod reload;
mod server;

pub use cert::{CertError, CertParams, CertUsage, SiteAuthority, TlsIdentity};
pub use reload::ReloadableTlsAcceptor;
pub use server::{TlsConfigError, TlsServerConfig};
