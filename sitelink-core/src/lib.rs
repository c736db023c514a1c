//! # Sitelink Core
//!
//! Pure domain types for issuing and redeeming site grants.
//!
//! ## Design Principles
//!
//! This crate is intentionally **IO-free**:
//! - No filesystem operations
//! - No network calls
//! - No database interactions
//! - No logging
//!
//! The issuer daemon (`sitelink-daemon`) and the joining side
//! (`sitelink-cli`) own all IO and share the types defined here.
//!
//! ## Modules
//!
//! - [`meta`] - Object identity and owner references
//! - [`secret`] - Grant secrets with constant-time comparison
//! - [`duration`] - Validity window parsing (`"1h30m"`)
//! - [`grant`] - The unified grant record and its state machine
//! - [`adapter`] - External `AccessGrant` / legacy claim representations
//! - [`claim`] - The descriptor a joining site redeems
//! - [`bundle`] - Credential bundle wire format
//! - [`version`] - Site version compatibility policy

pub mod adapter;
pub mod bundle;
pub mod claim;
pub mod duration;
pub mod grant;
pub mod meta;
pub mod secret;
pub mod version;

pub use adapter::{AccessGrant, AdapterError, ExternalGrant, LegacyClaimRecord};
pub use bundle::{
    BundleError, CredentialBundle, Endpoint, LinkDescriptor, TlsCredential, BUNDLE_CONTENT_TYPE,
};
pub use claim::ClaimDescriptor;
pub use grant::{GrantPhase, GrantRecord, GrantSchema, Normalization, Refusal};
pub use meta::{ObjectMeta, OwnerReference};
pub use secret::GrantSecret;
pub use version::{SiteVersion, VersionError, VersionPolicy, MINIMUM_CLAIM_VERSION};

/// Version of this site, advertised to issuers during redemption.
pub const SITE_VERSION: &str = env!("CARGO_PKG_VERSION");
