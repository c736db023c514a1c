//! Route strategy: one route per port, all served on 443.

use std::sync::Arc;

use async_trait::async_trait;

use super::{AccessPort, AccessResolver, ClusterLookup, HostPort, ResolveError, ResolverSettings, HTTPS_PORT};

pub struct RouteResolver {
    settings: ResolverSettings,
    lookup: Arc<dyn ClusterLookup>,
}

impl RouteResolver {
    pub fn new(settings: ResolverSettings, lookup: Arc<dyn ClusterLookup>) -> Self {
        Self { settings, lookup }
    }
}

#[async_trait]
impl AccessResolver for RouteResolver {
    async fn resolve(&self, port: AccessPort) -> Result<HostPort, ResolveError> {
        let route = port.prefix();
        match self.lookup.route_host(route).await? {
            Some(host) if !host.is_empty() => Ok(HostPort::new(host, HTTPS_PORT)),
            _ => Err(ResolveError::NotYetAssigned(format!(
                "host for route {} in {}",
                route, self.settings.namespace
            ))),
        }
    }
}
