//! Wires the registry, resolver and redemption server together.
//!
//! The manager decides where the redemption URL comes from:
//!
//! - a static base URL from configuration, used as-is;
//! - autoconfigure, where an external access object reports the URL
//!   through [`Manager::access_changed`];
//! - otherwise the resolver's claims address, retried while the address
//!   is still being provisioned and tracked in the background after that.
//!
//! Whenever the URL or CA changes every cached grant is reconciled again.

use std::sync::Arc;

use sitelink_core::{GrantRecord, SiteVersion, VersionPolicy, MINIMUM_CLAIM_VERSION, SITE_VERSION};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::generator::TokenGenerator;
use crate::registry::Registry;
use crate::resolver::{AccessResolver, ResolveError};
use crate::retry::{with_retry, RetryPolicy};
use crate::server;
use crate::store::StoreError;
use crate::services::{RedemptionRateLimiter, RedemptionService};
use crate::tls::ReloadableTlsAcceptor;

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Serve redemptions at all.
    pub enabled: bool,
    /// Wait for an external access object to report the URL.
    pub autoconfigure: bool,
    pub base_url: Option<String>,
    /// CA handed to redeemers alongside the URL.
    pub ca: Option<String>,
    /// Whether the endpoint terminates TLS. Picks the URL scheme.
    pub tls: bool,
    /// Retry while the claims address is not yet assigned.
    pub claims_retry: RetryPolicy,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            autoconfigure: false,
            base_url: None,
            ca: None,
            tls: true,
            claims_retry: RetryPolicy::new(30, std::time::Duration::from_secs(2)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("could not determine redemption URL: {0}")]
    Resolve(#[from] ResolveError),
}

pub struct Manager {
    settings: ManagerSettings,
    registry: Arc<Registry>,
    resolver: Arc<dyn AccessResolver>,
    generator: Arc<dyn TokenGenerator>,
}

impl Manager {
    pub fn new(
        settings: ManagerSettings,
        registry: Arc<Registry>,
        resolver: Arc<dyn AccessResolver>,
        generator: Arc<dyn TokenGenerator>,
    ) -> Self {
        Self {
            settings,
            registry,
            resolver,
            generator,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Redemption handler with the default rate limit and the legacy
    /// claim version check.
    pub fn service(&self) -> RedemptionService {
        let current = SITE_VERSION
            .parse::<SiteVersion>()
            .unwrap_or(MINIMUM_CLAIM_VERSION);
        RedemptionService::new(self.registry.clone(), self.generator.clone())
            .with_rate_limiter(Some(RedemptionRateLimiter::default()))
            .with_compatibility(Arc::new(VersionPolicy::new(current, MINIMUM_CLAIM_VERSION)))
    }

    /// Establish the CA and redemption URL, then reconcile what is cached.
    pub async fn start(&self) -> Result<(), ManagerError> {
        if !self.settings.enabled {
            tracing::info!("Grants are disabled");
            return Ok(());
        }

        self.registry.set_ca(self.settings.ca.clone());

        if let Some(base_url) = &self.settings.base_url {
            self.registry.set_base_url(Some(base_url.clone()));
        } else if self.settings.autoconfigure {
            tracing::info!("Waiting for access configuration to report the redemption URL");
        } else {
            let claims = with_retry(
                self.settings.claims_retry,
                ResolveError::is_retryable,
                |attempt| async move {
                    let result = self.claims_url().await;
                    if let Err(e) = &result {
                        tracing::debug!(attempt, error = %e, "Claims address not available");
                    }
                    result
                },
            )
            .await;

            match claims {
                Ok(url) => {
                    self.registry.set_base_url(Some(url));
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        error = %e,
                        "Claims address not assigned yet, resolving in the background"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        let written = self.registry.recheck().await;
        tracing::info!(updated = written, base_url = ?self.registry.base_url(), "Grant manager started");
        Ok(())
    }

    /// Base URL derived from the resolver's claims address.
    async fn claims_url(&self) -> Result<String, ResolveError> {
        let address = self.resolver.claims().await?;
        let scheme = if self.settings.tls { "https" } else { "http" };
        Ok(format!("{}://{}", scheme, address))
    }

    fn resolves_claims(&self) -> bool {
        self.settings.enabled && self.settings.base_url.is_none() && !self.settings.autoconfigure
    }

    /// Keep asking the resolver for the claims address until `shutdown`.
    ///
    /// Picks up addresses provisioned after [`start`](Self::start) gave up,
    /// and later changes of an assigned one. Returns at once when the URL
    /// comes from configuration or an access object.
    pub async fn track_claims_address(&self, mut shutdown: broadcast::Receiver<()>) {
        if !self.resolves_claims() {
            return;
        }

        let mut ticker = tokio::time::interval(self.settings.claims_retry.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => break,

                _ = ticker.tick() => {
                    match self.claims_url().await {
                        Ok(url) => self.access_changed(Some(url)).await,
                        Err(e) if e.is_retryable() => {
                            tracing::debug!(error = %e, "Claims address not available");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Cannot resolve claims address, giving up");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// A grant was created, updated (`Some`) or deleted (`None`).
    ///
    /// Returns whether a write was made. A failed write leaves the record
    /// un-normalized; the caller reports it again.
    pub async fn grant_changed(
        &self,
        identity: &str,
        record: Option<GrantRecord>,
    ) -> Result<bool, StoreError> {
        match record {
            Some(record) => self.registry.reconcile(identity, record).await,
            None => {
                self.registry.remove(identity);
                Ok(false)
            }
        }
    }

    /// The access object reported a new redemption URL.
    pub async fn access_changed(&self, url: Option<String>) {
        if self.registry.set_base_url(url) {
            self.registry.recheck().await;
        }
    }

    /// The CA handed to redeemers changed.
    pub async fn ca_changed(&self, ca: Option<String>) {
        if self.registry.set_ca(ca) {
            self.registry.recheck().await;
        }
    }

    /// Serve redemptions on `listener` until `shutdown` fires.
    pub async fn run(
        &self,
        listener: TcpListener,
        tls: Option<Arc<ReloadableTlsAcceptor>>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ManagerError> {
        if !self.settings.enabled {
            tracing::info!("Grants are disabled, redemption endpoint not served");
            return Ok(());
        }

        self.start().await?;
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, tls = tls.is_some(), "Redemption endpoint listening");
        }
        let tracking = self.track_claims_address(shutdown.resubscribe());
        let serving = server::serve(listener, self.service(), tls, shutdown);
        tokio::join!(tracking, serving);
        Ok(())
    }
}
