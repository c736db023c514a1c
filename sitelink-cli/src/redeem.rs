//! Client side of a redemption.
//!
//! Presents a claim's secret to the issuing site, decodes the returned
//! link and credential, and stores both as owned by the local site under
//! the claim's name. The pair is stored together or not at all.

use std::time::Duration;

use sitelink_core::{BundleError, ClaimDescriptor, CredentialBundle, OwnerReference, SITE_VERSION};

use crate::site_store::{SiteIdentity, SiteStore, SiteStoreError};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum RedeemClientError {
    #[error("invalid CA certificate: {0}")]
    InvalidCa(#[source] reqwest::Error),
    #[error("could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("{0}")]
    Request(#[source] reqwest::Error),
    /// The issuer answered with a non-success status.
    #[error("{status} ({reason}) {body}")]
    Rejected {
        status: u16,
        reason: String,
        body: String,
    },
    #[error(transparent)]
    Decode(#[from] BundleError),
    #[error("could not create received {kind}: {source}")]
    Persist {
        kind: &'static str,
        source: SiteStoreError,
    },
}

pub struct ClaimRedeemer<S> {
    store: S,
    timeout: Duration,
}

impl<S: SiteStore> ClaimRedeemer<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Redeem `claim` for `site`.
    ///
    /// A claim already marked redeemed is left alone. Otherwise its status
    /// is updated exactly once, with `"Ok"` or the failure text.
    pub async fn redeem(
        &self,
        claim: &mut ClaimDescriptor,
        site: &SiteIdentity,
    ) -> Result<(), RedeemClientError> {
        if claim.redeemed {
            tracing::debug!(claim = %claim.name, "Claim already redeemed");
            return Ok(());
        }

        let result = self.exchange(claim, site).await;
        match &result {
            Ok(()) => {
                tracing::info!(claim = %claim.name, "Claim redeemed");
                claim.record_success();
            }
            Err(e) => {
                tracing::warn!(claim = %claim.name, error = %e, "Claim redemption failed");
                claim.record_failure(e.to_string());
            }
        }
        if let Err(e) = self.store.update_claim(claim) {
            tracing::warn!(claim = %claim.name, error = %e, "Could not record claim status");
        }
        result
    }

    async fn exchange(
        &self,
        claim: &ClaimDescriptor,
        site: &SiteIdentity,
    ) -> Result<(), RedeemClientError> {
        let client = self.client(claim.ca.as_deref())?;

        let separator = if claim.url.contains('?') { '&' } else { '?' };
        let url = format!("{}{}site-version={}", claim.url, separator, SITE_VERSION);

        let response = client
            .post(&url)
            .header("name", &claim.name)
            .header("site-name", &site.name)
            .body(claim.secret.expose().to_string())
            .send()
            .await
            .map_err(RedeemClientError::Request)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RedeemClientError::Rejected {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
                body,
            });
        }

        let body = response.bytes().await.map_err(RedeemClientError::Request)?;
        let mut bundle = CredentialBundle::decode(&body)?;
        bundle.rename(&claim.name);
        if let Some(cost) = claim.link_cost {
            bundle.link.cost = cost;
        }
        bundle.set_owner(OwnerReference::site(&site.name, &site.uid));

        self.store
            .create_credential(&bundle.credential)
            .map_err(|source| RedeemClientError::Persist {
                kind: "secret",
                source,
            })?;
        if let Err(source) = self.store.create_link(&bundle.link) {
            if let Err(e) = self.store.remove_credential(&bundle.credential.meta.name) {
                tracing::warn!(
                    claim = %claim.name,
                    error = %e,
                    "Could not remove credential of unstored link"
                );
            }
            return Err(RedeemClientError::Persist {
                kind: "link",
                source,
            });
        }
        Ok(())
    }

    /// HTTP client trusting exactly `ca` when given.
    fn client(&self, ca: Option<&str>) -> Result<reqwest::Client, RedeemClientError> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(self.timeout);

        if let Some(ca) = ca.filter(|c| !c.trim().is_empty()) {
            let cert =
                reqwest::Certificate::from_pem(ca.as_bytes()).map_err(RedeemClientError::InvalidCa)?;
            builder = builder
                .tls_built_in_root_certs(false)
                .add_root_certificate(cert);
        }

        builder.build().map_err(RedeemClientError::Client)
    }
}
