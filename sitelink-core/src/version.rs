//! Site version compatibility.
//!
//! Legacy claims carry the redeeming site's version. An older site is
//! refused only when it also falls below the issuer's minimum.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A `major.minor.patch` version. Pre-release and build suffixes are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SiteVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SiteVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for SiteVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("invalid version {0:?}")]
    Invalid(String),

    #[error("minimum version required {0}")]
    BelowMinimum(SiteVersion),
}

impl FromStr for SiteVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionError::Invalid(s.to_string());
        let core = s
            .trim()
            .trim_start_matches('v')
            .split(['-', '+'])
            .next()
            .unwrap_or_default();

        let mut parts = core.split('.');
        let mut next = |required: bool| -> Result<u64, VersionError> {
            match parts.next() {
                Some(p) => p.parse().map_err(|_| invalid()),
                None if required => Err(invalid()),
                None => Ok(0),
            }
        };
        let version = SiteVersion::new(next(true)?, next(false)?, next(false)?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

/// Oldest site version allowed to redeem legacy claims.
pub const MINIMUM_CLAIM_VERSION: SiteVersion = SiteVersion::new(0, 8, 0);

/// Decides whether a remote site may redeem against this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionPolicy {
    pub current: SiteVersion,
    pub minimum: SiteVersion,
}

impl VersionPolicy {
    pub fn new(current: SiteVersion, minimum: SiteVersion) -> Self {
        Self { current, minimum }
    }

    /// Check a remote site's advertised version.
    ///
    /// Missing or unparsable versions are accepted; older peers that
    /// predate version reporting send nothing useful.
    pub fn verify(&self, remote: Option<&str>) -> Result<(), VersionError> {
        let Some(remote) = remote.and_then(|r| r.parse::<SiteVersion>().ok()) else {
            return Ok(());
        };
        if remote.cmp(&self.current) == Ordering::Less && remote < self.minimum {
            return Err(VersionError::BelowMinimum(self.minimum));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(current: &str, minimum: &str) -> VersionPolicy {
        VersionPolicy::new(current.parse().unwrap(), minimum.parse().unwrap())
    }

    #[test]
    fn parses_common_forms() {
        assert_eq!("1.2.3".parse::<SiteVersion>().unwrap(), SiteVersion::new(1, 2, 3));
        assert_eq!("v0.8".parse::<SiteVersion>().unwrap(), SiteVersion::new(0, 8, 0));
        assert_eq!(
            "2.0.1-rc1+abc".parse::<SiteVersion>().unwrap(),
            SiteVersion::new(2, 0, 1)
        );
        assert!("undefined".parse::<SiteVersion>().is_err());
        assert!("1.2.3.4".parse::<SiteVersion>().is_err());
    }

    #[test]
    fn compatibility_matrix() {
        let p = policy("0.8.0", "0.8.0");
        assert_eq!(p.verify(Some("0.9.0")), Ok(()));
        assert_eq!(p.verify(Some("0.8.0")), Ok(()));
        assert_eq!(p.verify(Some("undefined")), Ok(()));
        assert_eq!(p.verify(None), Ok(()));

        let err = p.verify(Some("0.7.0")).unwrap_err();
        assert_eq!(err.to_string(), "minimum version required 0.8.0");
        assert!(p.verify(Some("0.6.0")).is_err());
    }

    #[test]
    fn older_peer_above_minimum_is_allowed() {
        let p = policy("0.9.0", "0.8.0");
        assert_eq!(p.verify(Some("0.8.5")), Ok(()));
    }
}
