//! Site certificate authority and credential minting.
//!
//! The authority signs the client credentials handed out on redemption.
//! Its certificate is the `ca.crt` every joining site receives.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SanType,
};

/// What a minted certificate is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertUsage {
    Client,
    Server,
}

/// Parameters for certificate generation.
#[derive(Debug, Clone)]
pub struct CertParams {
    pub common_name: String,
    pub validity_days: u32,
    pub san_dns: Vec<String>,
    pub san_ips: Vec<IpAddr>,
    pub usage: CertUsage,
}

impl CertParams {
    /// Client credential for a link named `name`.
    pub fn client(name: &str) -> Self {
        Self {
            common_name: name.to_string(),
            san_dns: Vec::new(),
            san_ips: Vec::new(),
            usage: CertUsage::Client,
            ..Default::default()
        }
    }
}

impl Default for CertParams {
    fn default() -> Self {
        Self {
            common_name: "sitelink".to_string(),
            validity_days: 90,
            san_dns: vec!["localhost".to_string()],
            san_ips: vec![
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(Ipv6Addr::LOCALHOST),
            ],
            usage: CertUsage::Server,
        }
    }
}

/// Certificate and private key, PEM encoded.
#[derive(Clone)]
pub struct TlsIdentity {
    pub cert_pem: String,
    pub key_pem: String,
    pub cert_der: Vec<u8>,
}

impl std::fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsIdentity")
            .field("cert_der_len", &self.cert_der.len())
            .finish()
    }
}

/// Signing authority for this site.
pub struct SiteAuthority {
    cert: Certificate,
    key: KeyPair,
    /// PEM as distributed; kept verbatim so pinned copies stay valid.
    ca_pem: String,
}

impl std::fmt::Debug for SiteAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteAuthority").finish_non_exhaustive()
    }
}

const CA_CERT_FILE: &str = "ca.crt";
const CA_KEY_FILE: &str = "ca.key";

impl SiteAuthority {
    /// Create a fresh authority.
    pub fn generate(common_name: &str) -> Result<Self, CertError> {
        let key = KeyPair::generate().map_err(|e| CertError::KeyPair(e.to_string()))?;

        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.not_before = time::OffsetDateTime::now_utc();
        params.not_after = params.not_before + time::Duration::days(5 * 365);

        let cert = params
            .self_signed(&key)
            .map_err(|e| CertError::Generation(e.to_string()))?;
        let ca_pem = cert.pem();

        Ok(Self { cert, key, ca_pem })
    }

    /// Restore an authority from its PEM certificate and key.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, CertError> {
        let key = KeyPair::from_pem(key_pem).map_err(|e| CertError::KeyPair(e.to_string()))?;
        let params = CertificateParams::from_ca_cert_pem(cert_pem)
            .map_err(|e| CertError::Parse(e.to_string()))?;
        // Same subject and key, so anything signed here chains to the original.
        let cert = params
            .self_signed(&key)
            .map_err(|e| CertError::Generation(e.to_string()))?;

        Ok(Self {
            cert,
            key,
            ca_pem: cert_pem.to_string(),
        })
    }

    /// Load `ca.crt`/`ca.key` from `dir`, creating them on first use.
    pub fn load_or_generate(dir: &Path, common_name: &str) -> Result<Self, CertError> {
        let cert_path = dir.join(CA_CERT_FILE);
        let key_path = dir.join(CA_KEY_FILE);

        if cert_path.exists() && key_path.exists() {
            let cert_pem = std::fs::read_to_string(&cert_path)?;
            let key_pem = std::fs::read_to_string(&key_path)?;
            return Self::from_pem(&cert_pem, &key_pem);
        }

        let authority = Self::generate(common_name)?;
        std::fs::create_dir_all(dir)?;
        std::fs::write(&cert_path, authority.ca_pem())?;
        std::fs::write(&key_path, authority.key.serialize_pem())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
        }
        tracing::info!(path = %cert_path.display(), "Generated site certificate authority");
        Ok(authority)
    }

    pub fn ca_pem(&self) -> &str {
        &self.ca_pem
    }

    /// Mint a certificate signed by this authority.
    pub fn issue(&self, params: &CertParams) -> Result<TlsIdentity, CertError> {
        let key = KeyPair::generate().map_err(|e| CertError::KeyPair(e.to_string()))?;

        let mut cert_params = CertificateParams::default();
        cert_params.distinguished_name = DistinguishedName::new();
        cert_params
            .distinguished_name
            .push(DnType::CommonName, &params.common_name);
        cert_params.not_before = time::OffsetDateTime::now_utc();
        cert_params.not_after =
            cert_params.not_before + time::Duration::days(params.validity_days as i64);
        cert_params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        cert_params.extended_key_usages = vec![match params.usage {
            CertUsage::Client => ExtendedKeyUsagePurpose::ClientAuth,
            CertUsage::Server => ExtendedKeyUsagePurpose::ServerAuth,
        }];

        for dns in &params.san_dns {
            // rcgen requires Ia5String for DNS names
            if let Ok(san) = dns.clone().try_into() {
                cert_params.subject_alt_names.push(SanType::DnsName(san));
            }
        }
        for ip in &params.san_ips {
            cert_params.subject_alt_names.push(SanType::IpAddress(*ip));
        }

        let cert = cert_params
            .signed_by(&key, &self.cert, &self.key)
            .map_err(|e| CertError::Generation(e.to_string()))?;

        Ok(TlsIdentity {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            cert_der: cert.der().to_vec(),
        })
    }
}

/// Errors that can occur during certificate operations.
#[derive(Debug, thiserror::Error)]
pub enum CertError {
    #[error("failed to create key pair: {0}")]
    KeyPair(String),
    #[error("failed to generate certificate: {0}")]
    Generation(String),
    #[error("failed to parse certificate: {0}")]
    Parse(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
