//! The descriptor a joining site receives out of band.

use serde::{Deserialize, Serialize};

use crate::grant::{GrantRecord, STATUS_OK};
use crate::secret::GrantSecret;

/// Everything needed to redeem a grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimDescriptor {
    /// Name requested for the resulting link and credential.
    pub name: String,
    pub url: String,
    pub secret: GrantSecret,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_cost: Option<u32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default)]
    pub redeemed: bool,
}

impl ClaimDescriptor {
    /// Build a descriptor from a normalized record.
    ///
    /// Returns `None` while the record still lacks a secret or URL.
    pub fn from_grant(record: &GrantRecord) -> Option<Self> {
        let secret = record.secret.clone()?;
        if record.url.is_empty() {
            return None;
        }
        Some(Self {
            name: record.meta.name.clone(),
            url: record.url.clone(),
            secret,
            ca: record.ca.clone(),
            link_cost: None,
            status: String::new(),
            redeemed: false,
        })
    }

    pub fn record_success(&mut self) {
        self.status = STATUS_OK.to_string();
        self.redeemed = true;
    }

    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.status = message.into();
        self.redeemed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grant::Normalization;
    use crate::meta::ObjectMeta;
    use chrono::Utc;

    #[test]
    fn from_grant_requires_url() {
        let mut meta = ObjectMeta::new("west", "g1");
        meta.uid = "abc".to_string();
        let mut record = GrantRecord::grant(meta);
        record.normalize(&Normalization::default(), Utc::now());
        assert!(ClaimDescriptor::from_grant(&record).is_none());

        record.normalize(
            &Normalization {
                base_url: Some("https://west:8081".to_string()),
                ca: Some("CA".to_string()),
            },
            Utc::now(),
        );
        let claim = ClaimDescriptor::from_grant(&record).unwrap();
        assert_eq!(claim.name, "g1");
        assert_eq!(claim.url, "https://west:8081/abc");
        assert_eq!(claim.ca.as_deref(), Some("CA"));
        assert!(!claim.redeemed);
    }

    #[test]
    fn status_transitions() {
        let mut claim = ClaimDescriptor {
            name: "g1".to_string(),
            url: "https://west/abc".to_string(),
            secret: GrantSecret::new("s"),
            ca: None,
            link_cost: Some(3),
            status: String::new(),
            redeemed: false,
        };

        claim.record_failure("404 (Not Found) No such claim");
        assert_eq!(claim.status, "404 (Not Found) No such claim");
        assert!(!claim.redeemed);

        claim.record_success();
        assert_eq!(claim.status, "Ok");
        assert!(claim.redeemed);
    }
}
