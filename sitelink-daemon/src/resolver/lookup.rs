//! Cluster state consulted by the resolver strategies.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ResolveError;

/// One host rule of an ingress object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressRoute {
    pub host: String,
    pub service_port: u16,
}

/// Read-only view of the provisioned network resources.
///
/// `Ok(None)` means the resource exists but has no address yet.
#[async_trait]
pub trait ClusterLookup: Send + Sync {
    async fn route_host(&self, route: &str) -> Result<Option<String>, ResolveError>;

    async fn load_balancer_address(&self, service: &str) -> Result<Option<String>, ResolveError>;

    async fn node_port(&self, service: &str, port: u16) -> Result<Option<u16>, ResolveError>;

    async fn ingress_routes(&self, ingress: &str) -> Result<Vec<IngressRoute>, ResolveError>;
}

/// Address tables for [`StaticLookup`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupTables {
    /// Route name to host.
    #[serde(default)]
    pub routes: HashMap<String, String>,
    /// Service name to load-balancer host or IP.
    #[serde(default)]
    pub load_balancers: HashMap<String, String>,
    /// `service/port` to node port.
    #[serde(default)]
    pub node_ports: HashMap<String, u16>,
    /// Ingress name to its routes.
    #[serde(default)]
    pub ingresses: HashMap<String, Vec<IngressRoute>>,
}

/// Lookup answered from tables supplied by the operator.
#[derive(Debug, Default)]
pub struct StaticLookup {
    tables: RwLock<LookupTables>,
}

impl StaticLookup {
    pub fn from_tables(tables: LookupTables) -> Self {
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Load tables from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ResolveError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ResolveError::Config(format!("{}: {}", path.display(), e)))?;
        let tables = serde_json::from_str(&contents)
            .map_err(|e| ResolveError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_tables(tables))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, LookupTables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, LookupTables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_route_host(&self, route: &str, host: &str) {
        self.write()
            .routes
            .insert(route.to_string(), host.to_string());
    }

    pub fn set_load_balancer_address(&self, service: &str, address: &str) {
        self.write()
            .load_balancers
            .insert(service.to_string(), address.to_string());
    }

    pub fn set_ingress_routes(&self, ingress: &str, routes: Vec<IngressRoute>) {
        self.write().ingresses.insert(ingress.to_string(), routes);
    }
}

#[async_trait]
impl ClusterLookup for StaticLookup {
    async fn route_host(&self, route: &str) -> Result<Option<String>, ResolveError> {
        Ok(self.read().routes.get(route).cloned())
    }

    async fn load_balancer_address(&self, service: &str) -> Result<Option<String>, ResolveError> {
        Ok(self.read().load_balancers.get(service).cloned())
    }

    async fn node_port(&self, service: &str, port: u16) -> Result<Option<u16>, ResolveError> {
        Ok(self
            .read()
            .node_ports
            .get(&format!("{}/{}", service, port))
            .copied())
    }

    async fn ingress_routes(&self, ingress: &str) -> Result<Vec<IngressRoute>, ResolveError> {
        Ok(self.read().ingresses.get(ingress).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn loads_tables_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"routes": {{"skupper-claims": "claims.apps.example.com"}},
                "nodePorts": {{"sitelink-controller/8081": 31081}}}}"#
        )
        .unwrap();

        let lookup = StaticLookup::from_file(file.path()).unwrap();
        assert_eq!(
            lookup.route_host("skupper-claims").await.unwrap().as_deref(),
            Some("claims.apps.example.com")
        );
        assert_eq!(
            lookup.node_port("sitelink-controller", 8081).await.unwrap(),
            Some(31081)
        );
        assert_eq!(lookup.load_balancer_address("x").await.unwrap(), None);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        assert!(matches!(
            StaticLookup::from_file("/nonexistent/lookup.json"),
            Err(ResolveError::Config(_))
        ));
    }
}
