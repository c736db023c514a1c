//! Externally reachable addresses.
//!
//! A site exposes three logical ports: inter-router, edge and claims.
//! How they are reached from outside depends on the ingress strategy the
//! deployment chose. Each strategy is one variant of [`Resolver`], and all
//! of them answer the same [`AccessResolver`] questions.
//!
//! Strategies that wait on an address provisioned elsewhere (routes,
//! load balancers) report [`ResolveError::NotYetAssigned`] until it
//! appears. Callers retry that error; everything else is configuration.

mod ingress;
mod loadbalancer;
mod local;
mod lookup;
mod nodeport;
mod proxy;
mod route;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

pub use ingress::IngressResolver;
pub use loadbalancer::LoadBalancerResolver;
pub use local::LocalResolver;
pub use lookup::{ClusterLookup, IngressRoute, LookupTables, StaticLookup};
pub use nodeport::NodePortResolver;
pub use proxy::ProxyResolver;
pub use route::RouteResolver;

/// Service carrying the inter-router and edge ports.
pub const ROUTER_SERVICE: &str = "sitelink-router";
/// Service carrying the claims port.
pub const CONTROLLER_SERVICE: &str = "sitelink-controller";
/// Ingress object listing per-port routes.
pub const INGRESS_NAME: &str = "sitelink";
/// Port used by single-entrypoint strategies.
pub const HTTPS_PORT: u16 = 443;

/// A resolved address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The three logical ports a site exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessPort {
    InterRouter,
    Edge,
    Claims,
}

impl AccessPort {
    pub const ALL: [AccessPort; 3] = [AccessPort::InterRouter, AccessPort::Edge, AccessPort::Claims];

    pub fn default_port(self) -> u16 {
        match self {
            AccessPort::InterRouter => 55671,
            AccessPort::Edge => 45671,
            AccessPort::Claims => 8081,
        }
    }

    /// Host prefix used when a strategy names a host per port.
    pub fn prefix(self) -> &'static str {
        match self {
            AccessPort::InterRouter => "skupper-inter-router",
            AccessPort::Edge => "skupper-edge",
            AccessPort::Claims => "skupper-claims",
        }
    }

    pub fn service(self) -> &'static str {
        match self {
            AccessPort::InterRouter | AccessPort::Edge => ROUTER_SERVICE,
            AccessPort::Claims => CONTROLLER_SERVICE,
        }
    }

    /// Name of the endpoint in a link descriptor.
    pub fn name(self) -> &'static str {
        match self {
            AccessPort::InterRouter => "inter-router",
            AccessPort::Edge => "edge",
            AccessPort::Claims => "claims",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// The backing address has not been provisioned yet. Retryable.
    #[error("{0} not yet assigned")]
    NotYetAssigned(String),
    #[error("{0}")]
    Config(String),
    #[error("lookup failed: {0}")]
    Lookup(String),
}

impl ResolveError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResolveError::NotYetAssigned(_))
    }
}

/// Ingress strategy chosen for the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngressStrategy {
    Route,
    LoadBalancer,
    NodePort,
    Ingress,
    Proxy,
    Local,
}

impl FromStr for IngressStrategy {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "route" => Ok(IngressStrategy::Route),
            "loadbalancer" | "load-balancer" => Ok(IngressStrategy::LoadBalancer),
            "nodeport" | "node-port" => Ok(IngressStrategy::NodePort),
            "nginx-ingress-v1" | "ingress" => Ok(IngressStrategy::Ingress),
            "contour-http-proxy" | "proxy" => Ok(IngressStrategy::Proxy),
            "none" | "local" => Ok(IngressStrategy::Local),
            other => Err(ResolveError::Config(format!(
                "unrecognized ingress strategy {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for IngressStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IngressStrategy::Route => "route",
            IngressStrategy::LoadBalancer => "loadbalancer",
            IngressStrategy::NodePort => "nodeport",
            IngressStrategy::Ingress => "ingress",
            IngressStrategy::Proxy => "proxy",
            IngressStrategy::Local => "local",
        })
    }
}

/// Deployment facts shared by all strategies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverSettings {
    pub namespace: String,
    /// Externally visible base host, required by node-port and proxy.
    pub ingress_host: Option<String>,
}

impl ResolverSettings {
    fn require_ingress_host(&self, strategy: IngressStrategy) -> Result<&str, ResolveError> {
        self.ingress_host
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                ResolveError::Config(format!(
                    "ingress host not defined, cannot use {} ingress without it",
                    strategy
                ))
            })
    }

    /// `<prefix>.<namespace>.<base>`
    fn qualified_host(&self, port: AccessPort, base: &str) -> String {
        format!("{}.{}.{}", port.prefix(), self.namespace, base)
    }
}

/// Questions every ingress strategy answers.
#[async_trait]
pub trait AccessResolver: Send + Sync {
    /// True only when nothing outside the site can connect.
    fn is_local_access_only(&self) -> bool {
        false
    }

    async fn resolve(&self, port: AccessPort) -> Result<HostPort, ResolveError>;

    /// Every externally visible host, deduplicated in port order.
    async fn all_hosts(&self) -> Result<Vec<String>, ResolveError> {
        let mut hosts = Vec::new();
        for port in AccessPort::ALL {
            let host = self.resolve(port).await?.host;
            if !hosts.contains(&host) {
                hosts.push(host);
            }
        }
        Ok(hosts)
    }

    async fn inter_router(&self) -> Result<HostPort, ResolveError> {
        self.resolve(AccessPort::InterRouter).await
    }

    async fn edge(&self) -> Result<HostPort, ResolveError> {
        self.resolve(AccessPort::Edge).await
    }

    async fn claims(&self) -> Result<HostPort, ResolveError> {
        self.resolve(AccessPort::Claims).await
    }
}

/// The strategy selected for this deployment.
pub enum Resolver {
    Route(RouteResolver),
    LoadBalancer(LoadBalancerResolver),
    NodePort(NodePortResolver),
    Ingress(IngressResolver),
    Proxy(ProxyResolver),
    Local(LocalResolver),
}

impl Resolver {
    pub fn new(
        strategy: IngressStrategy,
        settings: ResolverSettings,
        lookup: Arc<dyn ClusterLookup>,
    ) -> Self {
        tracing::info!(strategy = %strategy, namespace = %settings.namespace, "Ingress strategy selected");
        match strategy {
            IngressStrategy::Route => Resolver::Route(RouteResolver::new(settings, lookup)),
            IngressStrategy::LoadBalancer => {
                Resolver::LoadBalancer(LoadBalancerResolver::new(settings, lookup))
            }
            IngressStrategy::NodePort => Resolver::NodePort(NodePortResolver::new(settings, lookup)),
            IngressStrategy::Ingress => Resolver::Ingress(IngressResolver::new(settings, lookup)),
            IngressStrategy::Proxy => Resolver::Proxy(ProxyResolver::new(settings)),
            IngressStrategy::Local => Resolver::Local(LocalResolver::new(settings)),
        }
    }

    pub fn strategy(&self) -> IngressStrategy {
        match self {
            Resolver::Route(_) => IngressStrategy::Route,
            Resolver::LoadBalancer(_) => IngressStrategy::LoadBalancer,
            Resolver::NodePort(_) => IngressStrategy::NodePort,
            Resolver::Ingress(_) => IngressStrategy::Ingress,
            Resolver::Proxy(_) => IngressStrategy::Proxy,
            Resolver::Local(_) => IngressStrategy::Local,
        }
    }

    fn inner(&self) -> &dyn AccessResolver {
        match self {
            Resolver::Route(r) => r,
            Resolver::LoadBalancer(r) => r,
            Resolver::NodePort(r) => r,
            Resolver::Ingress(r) => r,
            Resolver::Proxy(r) => r,
            Resolver::Local(r) => r,
        }
    }
}

#[async_trait]
impl AccessResolver for Resolver {
    fn is_local_access_only(&self) -> bool {
        self.inner().is_local_access_only()
    }

    async fn resolve(&self, port: AccessPort) -> Result<HostPort, ResolveError> {
        self.inner().resolve(port).await
    }

    async fn all_hosts(&self) -> Result<Vec<String>, ResolveError> {
        self.inner().all_hosts().await
    }
}
