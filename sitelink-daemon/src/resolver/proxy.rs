//! Proxy-fronted strategy: a single HTTP proxy routes by host name.

use async_trait::async_trait;

use super::{
    AccessPort, AccessResolver, HostPort, IngressStrategy, ResolveError, ResolverSettings,
    HTTPS_PORT,
};

pub struct ProxyResolver {
    settings: ResolverSettings,
}

impl ProxyResolver {
    pub fn new(settings: ResolverSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl AccessResolver for ProxyResolver {
    async fn resolve(&self, port: AccessPort) -> Result<HostPort, ResolveError> {
        let base = self.settings.require_ingress_host(IngressStrategy::Proxy)?;
        Ok(HostPort::new(
            self.settings.qualified_host(port, base),
            HTTPS_PORT,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_port_behind_443() {
        let resolver = ProxyResolver::new(ResolverSettings {
            namespace: "west".to_string(),
            ingress_host: Some("proxy.example.com".to_string()),
        });

        assert_eq!(
            resolver.inter_router().await.unwrap(),
            HostPort::new("skupper-inter-router.west.proxy.example.com", 443)
        );
        assert_eq!(resolver.all_hosts().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn missing_host_is_config_error() {
        let resolver = ProxyResolver::new(ResolverSettings::default());
        assert!(matches!(
            resolver.claims().await,
            Err(ResolveError::Config(_))
        ));
    }
}
