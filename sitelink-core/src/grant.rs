//! The unified grant record.
//!
//! Both the `Grant` schema and the legacy `Claim` schema are held as a
//! [`GrantRecord`]. All state transitions live here so the registry only
//! has to decide *when* to apply them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::duration::parse_validity;
use crate::meta::ObjectMeta;
use crate::secret::GrantSecret;

pub const STATUS_OK: &str = "Ok";
pub const STATUS_URL_PENDING: &str = "Url pending";
pub const STATUS_EXPIRED: &str = "Expired";
pub const STATUS_EXHAUSTED: &str = "Redemptions exhausted";

/// Validity applied to grants that do not name one.
pub const DEFAULT_VALIDITY: &str = "10m";

/// Which external representation a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrantSchema {
    Grant,
    Claim,
}

impl std::fmt::Display for GrantSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GrantSchema::Grant => f.write_str("Grant"),
            GrantSchema::Claim => f.write_str("Claim"),
        }
    }
}

/// Observable lifecycle of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantPhase {
    /// No secret or URL yet.
    Pending,
    Active,
    Exhausted,
    Expired,
}

impl GrantPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, GrantPhase::Exhausted | GrantPhase::Expired)
    }
}

/// Why a redemption attempt was refused.
///
/// `NotFound` deliberately covers unknown, pending, expired and exhausted
/// records so an unauthenticated caller cannot tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Refusal {
    #[error("No such claim")]
    NotFound,
    #[error("Claim refused")]
    Forbidden,
    #[error("Corrupted claim")]
    Corrupted,
}

/// Inputs owned by the issuer rather than by the record itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Normalization {
    /// Base redemption URL. The record's uid is appended.
    pub base_url: Option<String>,
    /// CA the joiner should pin.
    pub ca: Option<String>,
}

/// A grant or claim, whichever schema it was created with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRecord {
    pub meta: ObjectMeta,
    pub schema: GrantSchema,
    /// Secret supplied by the issuer, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_secret: Option<GrantSecret>,
    /// Textual validity window (`Grant` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity: Option<String>,
    /// Maximum successful redemptions. `None` is unbounded.
    #[serde(default)]
    pub quota: Option<u32>,
    /// Effective secret. Set once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<GrantSecret>,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
    #[serde(default)]
    pub claimed: u32,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: String,
}

impl GrantRecord {
    /// A fresh `Grant` awaiting normalization.
    pub fn grant(meta: ObjectMeta) -> Self {
        Self::empty(meta, GrantSchema::Grant)
    }

    /// A fresh legacy `Claim`.
    pub fn claim(meta: ObjectMeta) -> Self {
        Self::empty(meta, GrantSchema::Claim)
    }

    fn empty(meta: ObjectMeta, schema: GrantSchema) -> Self {
        Self {
            meta,
            schema,
            requested_secret: None,
            validity: None,
            quota: None,
            secret: None,
            url: String::new(),
            ca: None,
            claimed: 0,
            expiry: None,
            status: String::new(),
        }
    }

    pub fn with_quota(mut self, quota: u32) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn with_validity(mut self, validity: impl Into<String>) -> Self {
        self.validity = Some(validity.into());
        self
    }

    pub fn with_secret(mut self, secret: GrantSecret) -> Self {
        self.requested_secret = Some(secret);
        self
    }

    /// `namespace/name`.
    pub fn identity(&self) -> String {
        self.meta.key()
    }

    pub fn uid(&self) -> &str {
        &self.meta.uid
    }

    /// Quota after schema defaults. `None` is unbounded.
    pub fn effective_quota(&self) -> Option<u32> {
        match self.schema {
            GrantSchema::Grant => Some(self.quota.filter(|q| *q > 0).unwrap_or(1)),
            GrantSchema::Claim => self.quota.filter(|q| *q > 0),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|e| e <= now)
    }

    pub fn phase(&self, now: DateTime<Utc>) -> GrantPhase {
        if self.is_expired(now) {
            GrantPhase::Expired
        } else if self.effective_quota().is_some_and(|q| self.claimed >= q) {
            GrantPhase::Exhausted
        } else if self.secret.is_none() || self.url.is_empty() {
            GrantPhase::Pending
        } else {
            GrantPhase::Active
        }
    }

    /// Validate a redemption attempt.
    ///
    /// `in_flight` counts redemptions already reserved but not yet durable.
    ///
    /// # Security
    ///
    /// Availability checks run before the secret comparison, so terminal
    /// records answer `NotFound` whatever secret is presented.
    pub fn check_redeemable(
        &self,
        presented: &[u8],
        in_flight: u32,
        now: DateTime<Utc>,
    ) -> Result<(), Refusal> {
        let Some(secret) = self.secret.as_ref() else {
            return Err(Refusal::NotFound);
        };
        if self.url.is_empty() {
            return Err(Refusal::NotFound);
        }
        if self.is_expired(now) {
            return Err(Refusal::NotFound);
        }
        if self.schema == GrantSchema::Grant && self.expiry.is_none() {
            return Err(Refusal::Corrupted);
        }
        if let Some(quota) = self.effective_quota() {
            if self.claimed > quota {
                return Err(Refusal::Corrupted);
            }
            if self.claimed.saturating_add(in_flight) >= quota {
                return Err(Refusal::NotFound);
            }
        }
        if !secret.matches(presented) {
            return Err(Refusal::Forbidden);
        }
        Ok(())
    }

    /// Fill in derived fields. Returns whether anything changed.
    ///
    /// Existing secret and expiry are never replaced.
    pub fn normalize(&mut self, inputs: &Normalization, now: DateTime<Utc>) -> bool {
        let before = self.clone();

        if self.schema == GrantSchema::Grant && self.quota.unwrap_or(0) == 0 {
            self.quota = Some(1);
        }

        if self.secret.is_none() {
            self.secret = Some(
                self.requested_secret
                    .clone()
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(GrantSecret::generate),
            );
        }

        let mut validity_error = None;
        if self.schema == GrantSchema::Grant && self.expiry.is_none() {
            match parse_validity(self.validity.as_deref().unwrap_or(DEFAULT_VALIDITY)) {
                Ok(window) => self.expiry = now.checked_add_signed(window),
                Err(e) => validity_error = Some(e.to_string()),
            }
        }

        if let Some(base) = inputs.base_url.as_deref() {
            if !self.meta.uid.is_empty() {
                let url = format!("{}/{}", base.trim_end_matches('/'), self.meta.uid);
                if self.url != url {
                    self.url = url;
                }
            }
        }

        if inputs.ca.is_some() && self.ca != inputs.ca {
            self.ca = inputs.ca.clone();
        }

        self.status = match validity_error {
            Some(message) => message,
            None => self.status_text(now).to_string(),
        };

        *self != before
    }

    fn status_text(&self, now: DateTime<Utc>) -> &'static str {
        if self.url.is_empty() {
            return STATUS_URL_PENDING;
        }
        match self.phase(now) {
            GrantPhase::Expired => STATUS_EXPIRED,
            GrantPhase::Exhausted => STATUS_EXHAUSTED,
            GrantPhase::Pending | GrantPhase::Active => STATUS_OK,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn stored(name: &str) -> GrantRecord {
        let mut meta = ObjectMeta::new("west", name);
        meta.uid = format!("uid-{}", name);
        meta.resource_version = 1;
        GrantRecord::grant(meta)
    }

    fn inputs() -> Normalization {
        Normalization {
            base_url: Some("https://claims.example.com:8081/".to_string()),
            ca: Some("CA-PEM".to_string()),
        }
    }

    fn active(name: &str, secret: &str, quota: u32) -> GrantRecord {
        let mut record = stored(name)
            .with_quota(quota)
            .with_secret(GrantSecret::new(secret));
        record.normalize(&inputs(), Utc::now());
        record
    }

    #[test]
    fn normalize_fills_defaults() {
        let now = Utc::now();
        let mut record = stored("g1");

        assert!(record.normalize(&inputs(), now));
        assert_eq!(record.quota, Some(1));
        assert!(record.secret.is_some());
        assert_eq!(record.url, "https://claims.example.com:8081/uid-g1");
        assert_eq!(record.ca.as_deref(), Some("CA-PEM"));
        assert_eq!(record.expiry, Some(now + Duration::minutes(10)));
        assert_eq!(record.status, STATUS_OK);
    }

    #[test]
    fn normalize_is_idempotent() {
        let now = Utc::now();
        let mut record = stored("g1").with_validity("1h");

        assert!(record.normalize(&inputs(), now));
        let snapshot = record.clone();
        assert!(!record.normalize(&inputs(), now + Duration::seconds(5)));
        assert_eq!(record, snapshot);
    }

    #[test]
    fn normalize_keeps_requested_secret() {
        let mut record = stored("g1").with_secret(GrantSecret::new("chosen-by-issuer"));
        record.normalize(&inputs(), Utc::now());

        assert!(record.secret.unwrap().matches(b"chosen-by-issuer"));
    }

    #[test]
    fn normalize_without_base_url_is_pending() {
        let mut record = stored("g1");
        record.normalize(&Normalization::default(), Utc::now());

        assert!(record.url.is_empty());
        assert_eq!(record.status, STATUS_URL_PENDING);
    }

    #[test]
    fn invalid_validity_is_reported_in_status() {
        let mut record = stored("g1").with_validity("xyz");
        record.normalize(&inputs(), Utc::now());

        assert_eq!(record.expiry, None);
        assert_eq!(record.status, r#"Invalid duration "xyz": expected a number"#);
    }

    #[test]
    fn claim_schema_has_no_default_expiry_or_quota() {
        let mut meta = ObjectMeta::new("west", "legacy");
        meta.uid = "u".to_string();
        let mut record = GrantRecord::claim(meta);
        record.normalize(&inputs(), Utc::now());

        assert_eq!(record.expiry, None);
        assert_eq!(record.effective_quota(), None);
        assert!(record.check_redeemable(record.secret.clone().unwrap().as_bytes(), 100, Utc::now()).is_ok());
    }

    #[test]
    fn correct_secret_is_accepted() {
        let record = active("g1", "s3cr3t", 1);
        assert_eq!(record.check_redeemable(b"s3cr3t", 0, Utc::now()), Ok(()));
    }

    #[test]
    fn wrong_secret_is_forbidden() {
        let record = active("g1", "s3cr3t", 1);
        assert_eq!(
            record.check_redeemable(b"guess", 0, Utc::now()),
            Err(Refusal::Forbidden)
        );
    }

    #[test]
    fn expired_is_not_found_even_with_quota_left() {
        let mut record = active("g1", "s3cr3t", 5);
        record.expiry = Some(Utc::now() - Duration::hours(1));

        assert_eq!(
            record.check_redeemable(b"s3cr3t", 0, Utc::now()),
            Err(Refusal::NotFound)
        );
        assert_eq!(
            record.check_redeemable(b"wrong", 0, Utc::now()),
            Err(Refusal::NotFound)
        );
    }

    #[test]
    fn in_flight_reservations_count_against_quota() {
        let mut record = active("g1", "s3cr3t", 2);
        record.claimed = 1;

        assert!(record.check_redeemable(b"s3cr3t", 0, Utc::now()).is_ok());
        assert_eq!(
            record.check_redeemable(b"s3cr3t", 1, Utc::now()),
            Err(Refusal::NotFound)
        );
    }

    #[test]
    fn overdrawn_record_is_corrupted() {
        let mut record = active("g1", "s3cr3t", 1);
        record.claimed = 3;

        assert_eq!(
            record.check_redeemable(b"s3cr3t", 0, Utc::now()),
            Err(Refusal::Corrupted)
        );
    }

    #[test]
    fn pending_record_is_not_found() {
        let record = stored("g1");
        assert_eq!(
            record.check_redeemable(b"anything", 0, Utc::now()),
            Err(Refusal::NotFound)
        );
    }

    #[test]
    fn url_pending_record_is_not_found() {
        let mut record = stored("g1").with_secret(GrantSecret::new("s3cr3t"));
        record.normalize(&Normalization::default(), Utc::now());
        assert_eq!(record.status, STATUS_URL_PENDING);

        assert_eq!(
            record.check_redeemable(b"s3cr3t", 0, Utc::now()),
            Err(Refusal::NotFound)
        );
    }

    #[test]
    fn phase_tracks_lifecycle() {
        let now = Utc::now();
        let mut record = stored("g1");
        assert_eq!(record.phase(now), GrantPhase::Pending);

        record.normalize(&inputs(), now);
        assert_eq!(record.phase(now), GrantPhase::Active);

        record.claimed = 1;
        assert_eq!(record.phase(now), GrantPhase::Exhausted);
        assert!(record.phase(now).is_terminal());

        assert_eq!(record.phase(now + Duration::hours(1)), GrantPhase::Expired);
    }

    #[test]
    fn exhausted_status_after_normalize() {
        let mut record = active("g1", "s3cr3t", 1);
        record.claimed = 1;
        record.normalize(&inputs(), Utc::now());

        assert_eq!(record.status, STATUS_EXHAUSTED);
    }
}
