//! No ingress: only in-cluster service addresses.

use async_trait::async_trait;

use super::{AccessPort, AccessResolver, HostPort, ResolveError, ResolverSettings};

pub struct LocalResolver {
    settings: ResolverSettings,
}

impl LocalResolver {
    pub fn new(settings: ResolverSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl AccessResolver for LocalResolver {
    fn is_local_access_only(&self) -> bool {
        true
    }

    async fn resolve(&self, port: AccessPort) -> Result<HostPort, ResolveError> {
        let host = if self.settings.namespace.is_empty() {
            port.service().to_string()
        } else {
            format!("{}.{}", port.service(), self.settings.namespace)
        };
        Ok(HostPort::new(host, port.default_port()))
    }
}
