//! Test harnesses for redemption E2E tests.
//!
//! Requests go straight to the service handler (no network).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use http_body_util::{BodyExt, Full};
use hyper::{Request, StatusCode};
use sitelink_core::{
    CredentialBundle, Endpoint, GrantRecord, GrantSecret, LinkDescriptor, ObjectMeta, SiteVersion,
    TlsCredential, VersionPolicy, MINIMUM_CLAIM_VERSION,
};
use sitelink_daemon::generator::{GeneratorError, TokenGenerator};
use sitelink_daemon::registry::Registry;
use sitelink_daemon::resolver::ResolveError;
use sitelink_daemon::retry::RetryPolicy;
use sitelink_daemon::services::{RedemptionRateLimiter, RedemptionService};
use sitelink_daemon::store::{MemoryStore, ObjectStore, StoreError};

pub const BASE_URL: &str = "https://claims.west.example.com:8081";
pub const NAMESPACE: &str = "west";

/// Memory store that can be told to reject updates with a conflict.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    conflicts: AtomicU32,
}

impl FlakyStore {
    pub fn fail_next_updates(&self, count: u32) {
        self.conflicts.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<GrantRecord, StoreError> {
        self.inner.get(namespace, name).await
    }

    async fn list(&self) -> Result<Vec<GrantRecord>, StoreError> {
        self.inner.list().await
    }

    async fn create(&self, record: GrantRecord) -> Result<GrantRecord, StoreError> {
        self.inner.create(record).await
    }

    async fn update(&self, record: &GrantRecord) -> Result<GrantRecord, StoreError> {
        if self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Conflict(record.identity()));
        }
        self.inner.update(record).await
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.inner.delete(namespace, name).await
    }
}

/// Generator returning a fixed bundle named after the request.
#[derive(Default)]
pub struct StubGenerator {
    pub calls: AtomicU32,
    pub fail: bool,
    pub subjects: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl TokenGenerator for StubGenerator {
    async fn generate(
        &self,
        scope: &str,
        name: &str,
        subject: &str,
    ) -> Result<CredentialBundle, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.subjects.lock().unwrap().push(subject.to_string());
        if self.fail {
            return Err(GeneratorError::Resolve(ResolveError::Config(
                "no router address".to_string(),
            )));
        }
        Ok(CredentialBundle {
            link: LinkDescriptor {
                meta: ObjectMeta::new(scope, name),
                endpoints: vec![Endpoint {
                    name: "inter-router".to_string(),
                    host: "west.example.com".to_string(),
                    port: 55671,
                }],
                cost: 1,
                tls_credentials: name.to_string(),
            },
            credential: TlsCredential {
                meta: ObjectMeta::new(scope, name),
                ca_crt: "CA".to_string(),
                tls_crt: "CERT".to_string(),
                tls_key: "KEY".to_string(),
            },
        })
    }
}

/// Response status, content type and body.
pub struct Reply {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl Reply {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Issuer with in-memory storage and a stub generator.
pub struct TestIssuer {
    pub store: Arc<FlakyStore>,
    pub registry: Arc<Registry>,
    pub generator: Arc<StubGenerator>,
    pub service: RedemptionService,
}

impl TestIssuer {
    pub fn new() -> Self {
        Self::with_generator(StubGenerator::default())
    }

    pub fn with_generator(generator: StubGenerator) -> Self {
        let store = Arc::new(FlakyStore::default());
        let registry = Arc::new(Registry::with_retry_policy(
            store.clone(),
            RetryPolicy::new(5, Duration::from_millis(1)),
        ));
        registry.set_base_url(Some(BASE_URL.to_string()));

        let generator = Arc::new(generator);
        let service = RedemptionService::new(registry.clone(), generator.clone())
            .with_rate_limiter(None)
            .with_compatibility(Arc::new(VersionPolicy::new(
                SiteVersion::new(0, 9, 0),
                MINIMUM_CLAIM_VERSION,
            )));

        Self {
            store,
            registry,
            generator,
            service,
        }
    }

    pub fn with_rate_limit(mut self, limiter: RedemptionRateLimiter) -> Self {
        self.service = self.service.with_rate_limiter(Some(limiter));
        self
    }

    /// Store `record` and run it through reconciliation, as the watcher would.
    pub async fn add(&self, record: GrantRecord) -> GrantRecord {
        let created = self.store.create(record).await.expect("create grant");
        let identity = created.identity();
        self.registry
            .reconcile(&identity, created)
            .await
            .expect("reconcile grant");
        self.registry.get(&identity).expect("grant cached")
    }

    pub async fn add_grant(&self, name: &str, quota: u32, secret: &str) -> GrantRecord {
        self.add(
            GrantRecord::grant(ObjectMeta::new(NAMESPACE, name))
                .with_quota(quota)
                .with_secret(GrantSecret::new(secret)),
        )
        .await
    }

    pub async fn add_claim(&self, name: &str, secret: &str) -> GrantRecord {
        self.add(
            GrantRecord::claim(ObjectMeta::new(NAMESPACE, name))
                .with_quota(1)
                .with_secret(GrantSecret::new(secret)),
        )
        .await
    }

    /// Move a grant's expiry into the past.
    pub async fn expire(&self, record: &GrantRecord) -> GrantRecord {
        let mut stored = self
            .store
            .get(&record.meta.namespace, &record.meta.name)
            .await
            .expect("stored grant");
        stored.expiry = Some(Utc::now() - chrono::Duration::hours(1));
        let updated = self.store.update(&stored).await.expect("update grant");
        self.registry
            .reconcile(&updated.identity(), updated.clone())
            .await
            .expect("reconcile grant");
        self.registry.get(&updated.identity()).expect("grant cached")
    }

    pub async fn stored(&self, record: &GrantRecord) -> GrantRecord {
        self.store
            .get(&record.meta.namespace, &record.meta.name)
            .await
            .expect("stored grant")
    }

    pub async fn post(&self, record: &GrantRecord, secret: &str) -> Reply {
        self.send(
            Request::post(format!("/{}", record.meta.uid))
                .header("name", "to-west")
                .header("site-name", "east")
                .body(Full::new(Bytes::from(secret.to_string())))
                .expect("request"),
        )
        .await
    }

    pub async fn send(&self, req: Request<Full<Bytes>>) -> Reply {
        let response = self.service.handle(req).await;
        let status = response.status();
        let content_type = response
            .headers()
            .get(hyper::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        Reply {
            status,
            content_type,
            body,
        }
    }
}
