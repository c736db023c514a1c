//! Ingress-controller strategy.
//!
//! With a configured ingress host every port gets a derived host name.
//! Otherwise the hosts come from the ingress object's rules.

use std::sync::Arc;

use async_trait::async_trait;

use super::{
    AccessPort, AccessResolver, ClusterLookup, HostPort, ResolveError, ResolverSettings,
    HTTPS_PORT, INGRESS_NAME,
};

pub struct IngressResolver {
    settings: ResolverSettings,
    lookup: Arc<dyn ClusterLookup>,
}

impl IngressResolver {
    pub fn new(settings: ResolverSettings, lookup: Arc<dyn ClusterLookup>) -> Self {
        Self { settings, lookup }
    }
}

#[async_trait]
impl AccessResolver for IngressResolver {
    async fn resolve(&self, port: AccessPort) -> Result<HostPort, ResolveError> {
        if let Some(base) = self.settings.ingress_host.as_deref().filter(|h| !h.is_empty()) {
            return Ok(HostPort::new(
                self.settings.qualified_host(port, base),
                HTTPS_PORT,
            ));
        }

        self.lookup
            .ingress_routes(INGRESS_NAME)
            .await?
            .into_iter()
            .find(|route| route.service_port == port.default_port() && !route.host.is_empty())
            .map(|route| HostPort::new(route.host, HTTPS_PORT))
            .ok_or_else(|| {
                ResolveError::NotYetAssigned(format!(
                    "ingress rule for {} in {}",
                    port.name(),
                    self.settings.namespace
                ))
            })
    }
}
