//! Load-balancer strategy: each service gets an external address and
//! keeps its native ports.

use std::sync::Arc;

use async_trait::async_trait;

use super::{AccessPort, AccessResolver, ClusterLookup, HostPort, ResolveError, ResolverSettings};

pub struct LoadBalancerResolver {
    settings: ResolverSettings,
    lookup: Arc<dyn ClusterLookup>,
}

impl LoadBalancerResolver {
    pub fn new(settings: ResolverSettings, lookup: Arc<dyn ClusterLookup>) -> Self {
        Self { settings, lookup }
    }
}

#[async_trait]
impl AccessResolver for LoadBalancerResolver {
    async fn resolve(&self, port: AccessPort) -> Result<HostPort, ResolveError> {
        let service = port.service();
        match self.lookup.load_balancer_address(service).await? {
            Some(address) if !address.is_empty() => Ok(HostPort::new(address, port.default_port())),
            _ => Err(ResolveError::NotYetAssigned(format!(
                "load balancer address for service {} in {}",
                service, self.settings.namespace
            ))),
        }
    }
}
