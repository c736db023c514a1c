//! HTTP handler for `POST /<key>` redemptions.
//!
//! The body is the grant secret. A successful redemption answers with the
//! encoded [`CredentialBundle`](sitelink_core::CredentialBundle); failures
//! answer with a short fixed text and never say more than the status does.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use sitelink_core::{BundleError, GrantSchema, VersionError, VersionPolicy, BUNDLE_CONTENT_TYPE};

use crate::generator::{GeneratorError, TokenGenerator};
use crate::registry::{RedeemError, Registry};
use crate::services::RedemptionRateLimiter;

/// Header carrying the name the joiner wants for its link.
pub const NAME_HEADER: &str = "name";
/// Header carrying the joiner's site name. Logged, never trusted.
pub const SITE_NAME_HEADER: &str = "site-name";
/// Header carrying the certificate subject. Defaults to the link name.
pub const SUBJECT_HEADER: &str = "subject";
/// Query parameter carrying the joiner's version.
pub const SITE_VERSION_PARAM: &str = "site-version";

/// Decides whether a joining site's version may redeem legacy claims.
pub trait SiteCompatibility: Send + Sync {
    fn verify(&self, remote: Option<&str>) -> Result<(), VersionError>;
}

impl SiteCompatibility for VersionPolicy {
    fn verify(&self, remote: Option<&str>) -> Result<(), VersionError> {
        VersionPolicy::verify(self, remote)
    }
}

/// Failure of one redemption request, as seen by the caller.
#[derive(Debug, thiserror::Error)]
pub enum RedemptionError {
    #[error("Only POST is supported")]
    MethodNotAllowed,
    #[error("Too many requests")]
    TooManyRequests,
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Redeem(#[from] RedeemError),
    #[error("Internal error")]
    Generator(#[from] GeneratorError),
    #[error("Internal error")]
    Encode(#[from] BundleError),
}

impl RedemptionError {
    pub fn status(&self) -> StatusCode {
        match self {
            RedemptionError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            RedemptionError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            RedemptionError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RedemptionError::Redeem(RedeemError::NotFound) => StatusCode::NOT_FOUND,
            RedemptionError::Redeem(RedeemError::Forbidden) => StatusCode::FORBIDDEN,
            RedemptionError::Redeem(RedeemError::Corrupted) => StatusCode::INTERNAL_SERVER_ERROR,
            RedemptionError::Redeem(RedeemError::Unavailable) => StatusCode::SERVICE_UNAVAILABLE,
            RedemptionError::Generator(_) | RedemptionError::Encode(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Clone)]
pub struct RedemptionService {
    registry: Arc<Registry>,
    generator: Arc<dyn TokenGenerator>,
    limiter: Option<RedemptionRateLimiter>,
    compatibility: Option<Arc<dyn SiteCompatibility>>,
}

impl RedemptionService {
    /// Service with the default rate limit and no version check.
    pub fn new(registry: Arc<Registry>, generator: Arc<dyn TokenGenerator>) -> Self {
        Self {
            registry,
            generator,
            limiter: Some(RedemptionRateLimiter::default()),
            compatibility: None,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Option<RedemptionRateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_compatibility(mut self, compatibility: Arc<dyn SiteCompatibility>) -> Self {
        self.compatibility = Some(compatibility);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Answer one request. Never fails; errors become responses.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        match self.process(req).await {
            Ok(body) => {
                let mut response = Response::new(Full::new(Bytes::from(body)));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(BUNDLE_CONTENT_TYPE));
                response
            }
            Err(e) => text_response(e.status(), &e.to_string()),
        }
    }

    async fn process<B>(&self, req: Request<B>) -> Result<Vec<u8>, RedemptionError>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        if req.method() != Method::POST {
            return Err(RedemptionError::MethodNotAllowed);
        }
        if let Some(limiter) = &self.limiter {
            limiter
                .check()
                .map_err(|_| RedemptionError::TooManyRequests)?;
        }

        let (parts, body) = req.into_parts();
        let key = parts.uri.path().replace('/', "");
        let requested_name = header(&parts.headers, NAME_HEADER);
        let requested_subject = header(&parts.headers, SUBJECT_HEADER);
        let site_name = header(&parts.headers, SITE_NAME_HEADER);
        let site_version = parts.uri.query().and_then(|q| query_param(q, SITE_VERSION_PARAM));

        if let (Some(GrantSchema::Claim), Some(compatibility)) =
            (self.registry.schema_of(&key), &self.compatibility)
        {
            if let Err(e) = compatibility.verify(site_version) {
                tracing::info!(key = %key, site = ?site_name, error = %e, "Incompatible site refused");
                return Err(RedemptionError::BadRequest(e.to_string()));
            }
        }

        let secret = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "Could not read request body");
                return Err(RedemptionError::BadRequest(
                    "Request body not valid".to_string(),
                ));
            }
        };

        let record = match self.registry.redeem(&key, &secret).await {
            Ok(record) => record,
            Err(e) => {
                tracing::info!(key = %key, site = ?site_name, reason = %e, "Redemption refused");
                return Err(e.into());
            }
        };

        let name = requested_name.unwrap_or(record.meta.name.as_str());
        let subject = requested_subject.unwrap_or(name);
        let bundle = match self
            .generator
            .generate(&record.meta.namespace, name, subject)
            .await
        {
            Ok(bundle) => bundle,
            Err(e) => {
                tracing::error!(
                    grant = %record.identity(),
                    error = %e,
                    "Redeemed grant but could not generate credentials"
                );
                return Err(e.into());
            }
        };

        tracing::info!(
            grant = %record.identity(),
            site = ?site_name,
            link = %name,
            "Grant redeemed by site"
        );
        Ok(bundle.encode()?)
    }
}

fn header<'a>(headers: &'a hyper::HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

fn query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
        .filter(|v| !v.is_empty())
}

fn text_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
