//! Node-port strategy: a shared node host plus per-service node ports.

use std::sync::Arc;

use async_trait::async_trait;

use super::{
    AccessPort, AccessResolver, ClusterLookup, HostPort, IngressStrategy, ResolveError,
    ResolverSettings,
};

pub struct NodePortResolver {
    settings: ResolverSettings,
    lookup: Arc<dyn ClusterLookup>,
}

impl NodePortResolver {
    pub fn new(settings: ResolverSettings, lookup: Arc<dyn ClusterLookup>) -> Self {
        Self { settings, lookup }
    }
}

#[async_trait]
impl AccessResolver for NodePortResolver {
    async fn resolve(&self, port: AccessPort) -> Result<HostPort, ResolveError> {
        let host = self.settings.require_ingress_host(IngressStrategy::NodePort)?;
        let service = port.service();
        match self.lookup.node_port(service, port.default_port()).await? {
            Some(node_port) => Ok(HostPort::new(host, node_port)),
            None => Err(ResolveError::NotYetAssigned(format!(
                "node port for {} on service {}",
                port.name(),
                service
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{LookupTables, StaticLookup, CONTROLLER_SERVICE};

    #[tokio::test]
    async fn requires_ingress_host() {
        let resolver = NodePortResolver::new(
            ResolverSettings::default(),
            Arc::new(StaticLookup::default()),
        );

        let err = resolver.claims().await.unwrap_err();
        assert!(matches!(err, ResolveError::Config(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn uses_assigned_node_port() {
        let lookup = StaticLookup::from_tables(LookupTables {
            node_ports: [(format!("{}/8081", CONTROLLER_SERVICE), 31081)]
                .into_iter()
                .collect(),
            ..Default::default()
        });
        let resolver = NodePortResolver::new(
            ResolverSettings {
                namespace: "west".to_string(),
                ingress_host: Some("node1.example.com".to_string()),
            },
            Arc::new(lookup),
        );

        assert_eq!(
            resolver.claims().await.unwrap(),
            HostPort::new("node1.example.com", 31081)
        );
        assert!(resolver.edge().await.unwrap_err().is_retryable());
    }
}
