//! An issuing site on a real socket and a joining site in a temp dir.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sitelink_cli::{DirStore, SiteIdentity};
use sitelink_core::{ClaimDescriptor, GrantRecord, GrantSecret, ObjectMeta};
use sitelink_daemon::generator::LinkTokenGenerator;
use sitelink_daemon::registry::Registry;
use sitelink_daemon::resolver::{LocalResolver, ResolverSettings};
use sitelink_daemon::retry::RetryPolicy;
use sitelink_daemon::server;
use sitelink_daemon::services::RedemptionService;
use sitelink_daemon::store::{MemoryStore, ObjectStore};
use sitelink_daemon::tls::{CertParams, ReloadableTlsAcceptor, SiteAuthority};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

pub const NAMESPACE: &str = "west";

/// Issuing site serving redemptions until dropped.
pub struct TestIssuer {
    pub addr: SocketAddr,
    pub store: Arc<MemoryStore>,
    pub registry: Arc<Registry>,
    pub authority: Arc<SiteAuthority>,
    /// CA the joiner must pin when TLS is on.
    pub ca: Option<String>,
    shutdown: broadcast::Sender<()>,
    _tls_dir: Option<TempDir>,
}

impl TestIssuer {
    pub async fn start() -> Self {
        Self::spawn(false).await
    }

    pub async fn start_tls() -> Self {
        Self::spawn(true).await
    }

    async fn spawn(tls: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let authority = Arc::new(SiteAuthority::generate("west-ca").expect("authority"));
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(Registry::with_retry_policy(
            store.clone(),
            RetryPolicy::new(5, Duration::from_millis(1)),
        ));
        let scheme = if tls { "https" } else { "http" };
        registry.set_base_url(Some(format!("{}://{}", scheme, addr)));

        let (acceptor, tls_dir, ca) = if tls {
            let dir = tempfile::tempdir().expect("tempdir");
            let identity = authority
                .issue(&CertParams::default())
                .expect("server cert");
            let cert_path = dir.path().join("tls.crt");
            let key_path = dir.path().join("tls.key");
            std::fs::write(&cert_path, &identity.cert_pem).expect("write cert");
            std::fs::write(&key_path, &identity.key_pem).expect("write key");
            let acceptor = ReloadableTlsAcceptor::load(cert_path, key_path).expect("acceptor");
            registry.set_ca(Some(authority.ca_pem().to_string()));
            (Some(acceptor), Some(dir), Some(authority.ca_pem().to_string()))
        } else {
            (None, None, None)
        };

        let resolver = Arc::new(LocalResolver::new(ResolverSettings {
            namespace: NAMESPACE.to_string(),
            ingress_host: None,
        }));
        let generator = Arc::new(LinkTokenGenerator::new(resolver, authority.clone()));
        let service =
            RedemptionService::new(registry.clone(), generator).with_rate_limiter(None);

        let (shutdown, rx) = broadcast::channel(1);
        tokio::spawn(server::serve(listener, service, acceptor, rx));

        Self {
            addr,
            store,
            registry,
            authority,
            ca,
            shutdown,
            _tls_dir: tls_dir,
        }
    }

    /// Store and reconcile a grant, returning the descriptor a joiner gets.
    pub async fn issue_grant(&self, name: &str, quota: u32, secret: &str) -> ClaimDescriptor {
        let created = self
            .store
            .create(
                GrantRecord::grant(ObjectMeta::new(NAMESPACE, name))
                    .with_quota(quota)
                    .with_secret(GrantSecret::new(secret)),
            )
            .await
            .expect("create grant");
        let identity = created.identity();
        self.registry
            .reconcile(&identity, created)
            .await
            .expect("reconcile grant");
        let record = self.registry.get(&identity).expect("grant cached");
        ClaimDescriptor::from_grant(&record).expect("grant is ready")
    }

    pub async fn claimed(&self, name: &str) -> u32 {
        self.store
            .get(NAMESPACE, name)
            .await
            .expect("stored grant")
            .claimed
    }
}

impl Drop for TestIssuer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

/// Joining site with its own data directory.
pub struct TestSite {
    pub store: DirStore,
    pub identity: SiteIdentity,
    _dir: TempDir,
}

impl TestSite {
    pub fn new(name: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DirStore::open(dir.path()).expect("site store");
        let identity = store.load_or_create_identity(name).expect("identity");
        Self {
            store,
            identity,
            _dir: dir,
        }
    }
}
