//! Minting of the credential bundle returned on redemption.

use std::sync::Arc;

use async_trait::async_trait;
use sitelink_core::{CredentialBundle, Endpoint, LinkDescriptor, ObjectMeta, TlsCredential};

use crate::resolver::{AccessPort, AccessResolver, ResolveError};
use crate::tls::{CertError, CertParams, SiteAuthority};

#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("could not resolve site address: {0}")]
    Resolve(#[from] ResolveError),
    #[error("could not mint credential: {0}")]
    Cert(#[from] CertError),
}

/// Produces the link and credential a joining site receives.
#[async_trait]
pub trait TokenGenerator: Send + Sync {
    /// `scope` is the namespace of the redeemed grant, `name` the name the
    /// joiner asked for, `subject` the common name of its certificate.
    async fn generate(
        &self,
        scope: &str,
        name: &str,
        subject: &str,
    ) -> Result<CredentialBundle, GeneratorError>;
}

/// Generator that points the link at this site's router ports and signs a
/// fresh client certificate with the site authority.
pub struct LinkTokenGenerator {
    resolver: Arc<dyn AccessResolver>,
    authority: Arc<SiteAuthority>,
    cost: u32,
}

impl LinkTokenGenerator {
    pub fn new(resolver: Arc<dyn AccessResolver>, authority: Arc<SiteAuthority>) -> Self {
        Self {
            resolver,
            authority,
            cost: 1,
        }
    }

    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }
}

#[async_trait]
impl TokenGenerator for LinkTokenGenerator {
    async fn generate(
        &self,
        scope: &str,
        name: &str,
        subject: &str,
    ) -> Result<CredentialBundle, GeneratorError> {
        let mut endpoints = Vec::with_capacity(2);
        for port in [AccessPort::InterRouter, AccessPort::Edge] {
            let address = self.resolver.resolve(port).await?;
            endpoints.push(Endpoint {
                name: port.name().to_string(),
                host: address.host,
                port: address.port,
            });
        }

        let identity = self.authority.issue(&CertParams::client(subject))?;
        tracing::debug!(
            scope = %scope,
            name = %name,
            subject = %subject,
            "Minted link credential"
        );

        Ok(CredentialBundle {
            link: LinkDescriptor {
                meta: ObjectMeta::new(scope, name),
                endpoints,
                cost: self.cost,
                tls_credentials: name.to_string(),
            },
            credential: TlsCredential {
                meta: ObjectMeta::new(scope, name),
                ca_crt: self.authority.ca_pem().to_string(),
                tls_crt: identity.cert_pem,
                tls_key: identity.key_pem,
            },
        })
    }
}
