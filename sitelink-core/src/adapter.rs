//! External representations of grants.
//!
//! Issuers hand the daemon either an `AccessGrant` document or a legacy
//! claim record (annotations plus a password data entry). Both convert to
//! and from [`GrantRecord`] here so the state machine exists once.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::grant::{GrantRecord, GrantSchema};
use crate::meta::ObjectMeta;
use crate::secret::GrantSecret;

pub const ANNOTATION_EXPIRATION: &str = "sitelink.io/claim-expiration";
pub const ANNOTATION_REMAINING: &str = "sitelink.io/claims-remaining";
pub const ANNOTATION_MADE: &str = "sitelink.io/claims-made";
pub const ANNOTATION_URL: &str = "sitelink.io/url";
pub const ANNOTATION_STATUS: &str = "sitelink.io/status";
pub const DATA_PASSWORD: &str = "password";
pub const DATA_CA: &str = "ca.crt";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error("Corrupted claim: {field}: {reason}")]
    Corrupted { field: &'static str, reason: String },

    #[error("Expected a {expected} record, found {found}")]
    WrongSchema {
        expected: GrantSchema,
        found: GrantSchema,
    },
}

fn corrupted(field: &'static str, reason: impl ToString) -> AdapterError {
    AdapterError::Corrupted {
        field,
        reason: reason.to_string(),
    }
}

fn parse_time(field: &'static str, value: &str) -> Result<DateTime<Utc>, AdapterError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupted(field, e))
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrantSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redemptions_allowed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_window: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<GrantSecret>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrantStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<GrantSecret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
    #[serde(default)]
    pub redemptions: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
}

/// The typed `Grant` schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: AccessGrantSpec,
    #[serde(default)]
    pub status: AccessGrantStatus,
}

impl TryFrom<AccessGrant> for GrantRecord {
    type Error = AdapterError;

    fn try_from(grant: AccessGrant) -> Result<Self, Self::Error> {
        let expiry = grant
            .status
            .expiration_time
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| parse_time("expirationTime", s))
            .transpose()?;

        Ok(GrantRecord {
            meta: grant.metadata,
            schema: GrantSchema::Grant,
            requested_secret: grant.spec.code,
            validity: grant.spec.expiration_window,
            quota: grant.spec.redemptions_allowed,
            secret: grant.status.code,
            url: grant.status.url,
            ca: grant.status.ca,
            claimed: grant.status.redemptions,
            expiry,
            status: grant.status.status,
        })
    }
}

impl TryFrom<&GrantRecord> for AccessGrant {
    type Error = AdapterError;

    fn try_from(record: &GrantRecord) -> Result<Self, Self::Error> {
        if record.schema != GrantSchema::Grant {
            return Err(AdapterError::WrongSchema {
                expected: GrantSchema::Grant,
                found: record.schema,
            });
        }
        Ok(AccessGrant {
            metadata: record.meta.clone(),
            spec: AccessGrantSpec {
                redemptions_allowed: record.quota,
                expiration_window: record.validity.clone(),
                code: record.requested_secret.clone(),
            },
            status: AccessGrantStatus {
                url: record.url.clone(),
                code: record.secret.clone(),
                ca: record.ca.clone(),
                redemptions: record.claimed,
                expiration_time: record.expiry.map(format_time),
                status: record.status.clone(),
            },
        })
    }
}

/// The legacy `Claim` schema: a generic secret-like object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyClaimRecord {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl LegacyClaimRecord {
    fn annotation_u32(&self, key: &'static str) -> Result<Option<u32>, AdapterError> {
        self.annotations
            .get(key)
            .map(|v| v.trim().parse::<u32>().map_err(|e| corrupted(key, e)))
            .transpose()
    }
}

impl TryFrom<LegacyClaimRecord> for GrantRecord {
    type Error = AdapterError;

    fn try_from(claim: LegacyClaimRecord) -> Result<Self, Self::Error> {
        let expiry = claim
            .annotations
            .get(ANNOTATION_EXPIRATION)
            .map(|v| parse_time(ANNOTATION_EXPIRATION, v))
            .transpose()?;
        let remaining = claim.annotation_u32(ANNOTATION_REMAINING)?;
        let made = claim.annotation_u32(ANNOTATION_MADE)?.unwrap_or(0);
        let secret = claim
            .data
            .get(DATA_PASSWORD)
            .filter(|p| !p.is_empty())
            .map(GrantSecret::new)
            .ok_or_else(|| corrupted(DATA_PASSWORD, "no password"))?;

        Ok(GrantRecord {
            schema: GrantSchema::Claim,
            requested_secret: None,
            validity: None,
            quota: remaining.map(|r| r.saturating_add(made)),
            secret: Some(secret),
            url: claim
                .annotations
                .get(ANNOTATION_URL)
                .cloned()
                .unwrap_or_default(),
            ca: claim.data.get(DATA_CA).cloned(),
            claimed: made,
            expiry,
            status: claim
                .annotations
                .get(ANNOTATION_STATUS)
                .cloned()
                .unwrap_or_default(),
            meta: claim.metadata,
        })
    }
}

impl TryFrom<&GrantRecord> for LegacyClaimRecord {
    type Error = AdapterError;

    fn try_from(record: &GrantRecord) -> Result<Self, Self::Error> {
        if record.schema != GrantSchema::Claim {
            return Err(AdapterError::WrongSchema {
                expected: GrantSchema::Claim,
                found: record.schema,
            });
        }

        let mut annotations = BTreeMap::new();
        if let Some(expiry) = record.expiry {
            annotations.insert(ANNOTATION_EXPIRATION.to_string(), format_time(expiry));
        }
        if let Some(quota) = record.quota {
            annotations.insert(
                ANNOTATION_REMAINING.to_string(),
                quota.saturating_sub(record.claimed).to_string(),
            );
        }
        annotations.insert(ANNOTATION_MADE.to_string(), record.claimed.to_string());
        if !record.url.is_empty() {
            annotations.insert(ANNOTATION_URL.to_string(), record.url.clone());
        }
        if !record.status.is_empty() {
            annotations.insert(ANNOTATION_STATUS.to_string(), record.status.clone());
        }

        let mut data = BTreeMap::new();
        if let Some(secret) = &record.secret {
            data.insert(DATA_PASSWORD.to_string(), secret.expose().to_string());
        }
        if let Some(ca) = &record.ca {
            data.insert(DATA_CA.to_string(), ca.clone());
        }

        Ok(LegacyClaimRecord {
            metadata: record.meta.clone(),
            annotations,
            data,
        })
    }
}

/// Either external schema, tagged by `"kind"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ExternalGrant {
    AccessGrant(AccessGrant),
    Claim(LegacyClaimRecord),
}

impl TryFrom<ExternalGrant> for GrantRecord {
    type Error = AdapterError;

    fn try_from(external: ExternalGrant) -> Result<Self, Self::Error> {
        match external {
            ExternalGrant::AccessGrant(grant) => grant.try_into(),
            ExternalGrant::Claim(claim) => claim.try_into(),
        }
    }
}

impl TryFrom<&GrantRecord> for ExternalGrant {
    type Error = AdapterError;

    fn try_from(record: &GrantRecord) -> Result<Self, Self::Error> {
        match record.schema {
            GrantSchema::Grant => Ok(ExternalGrant::AccessGrant(record.try_into()?)),
            GrantSchema::Claim => Ok(ExternalGrant::Claim(record.try_into()?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_grant_document_converts() {
        let json = r#"{
            "kind": "AccessGrant",
            "metadata": {"name": "g1", "namespace": "west", "uid": "u1", "resourceVersion": 4},
            "spec": {"redemptionsAllowed": 3, "expirationWindow": "1h", "code": "abc"},
            "status": {"url": "https://west/u1", "redemptions": 1, "expirationTime": "2030-01-01T00:00:00Z"}
        }"#;
        let external: ExternalGrant = serde_json::from_str(json).unwrap();
        let record = GrantRecord::try_from(external).unwrap();

        assert_eq!(record.schema, GrantSchema::Grant);
        assert_eq!(record.identity(), "west/g1");
        assert_eq!(record.quota, Some(3));
        assert_eq!(record.claimed, 1);
        assert_eq!(record.validity.as_deref(), Some("1h"));
        assert!(record.requested_secret.unwrap().matches(b"abc"));
        assert_eq!(record.expiry.unwrap().to_rfc3339(), "2030-01-01T00:00:00+00:00");
    }

    #[test]
    fn bad_expiration_time_is_corrupted() {
        let grant = AccessGrant {
            metadata: ObjectMeta::new("west", "g1"),
            spec: AccessGrantSpec::default(),
            status: AccessGrantStatus {
                expiration_time: Some("tomorrow".to_string()),
                ..Default::default()
            },
        };

        assert!(matches!(
            GrantRecord::try_from(grant),
            Err(AdapterError::Corrupted {
                field: "expirationTime",
                ..
            })
        ));
    }

    #[test]
    fn legacy_claim_maps_counters_to_quota() {
        let mut claim = LegacyClaimRecord {
            metadata: ObjectMeta::new("west", "legacy"),
            ..Default::default()
        };
        claim
            .annotations
            .insert(ANNOTATION_REMAINING.to_string(), "2".to_string());
        claim
            .annotations
            .insert(ANNOTATION_MADE.to_string(), "3".to_string());
        claim
            .data
            .insert(DATA_PASSWORD.to_string(), "pw".to_string());

        let record = GrantRecord::try_from(claim.clone()).unwrap();
        assert_eq!(record.quota, Some(5));
        assert_eq!(record.claimed, 3);

        let back = LegacyClaimRecord::try_from(&record).unwrap();
        assert_eq!(back.annotations.get(ANNOTATION_REMAINING).unwrap(), "2");
        assert_eq!(back.data.get(DATA_PASSWORD).unwrap(), "pw");
    }

    #[test]
    fn legacy_claim_without_remaining_is_unbounded() {
        let mut claim = LegacyClaimRecord {
            metadata: ObjectMeta::new("west", "legacy"),
            ..Default::default()
        };
        claim
            .data
            .insert(DATA_PASSWORD.to_string(), "pw".to_string());

        let record = GrantRecord::try_from(claim).unwrap();
        assert_eq!(record.effective_quota(), None);
    }

    #[test]
    fn legacy_claim_rejects_garbage_counters_and_missing_password() {
        let mut claim = LegacyClaimRecord::default();
        claim
            .data
            .insert(DATA_PASSWORD.to_string(), "pw".to_string());
        claim
            .annotations
            .insert(ANNOTATION_REMAINING.to_string(), "many".to_string());
        assert!(GrantRecord::try_from(claim).is_err());

        assert!(matches!(
            GrantRecord::try_from(LegacyClaimRecord::default()),
            Err(AdapterError::Corrupted {
                field: DATA_PASSWORD,
                ..
            })
        ));
    }

    #[test]
    fn schema_mismatch_is_rejected() {
        let record = GrantRecord::grant(ObjectMeta::new("west", "g1"));
        assert!(matches!(
            LegacyClaimRecord::try_from(&record),
            Err(AdapterError::WrongSchema { .. })
        ));
        assert!(matches!(
            ExternalGrant::try_from(&record),
            Ok(ExternalGrant::AccessGrant(_))
        ));
    }
}
