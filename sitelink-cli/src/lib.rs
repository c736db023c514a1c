//! Joining side of sitelink.
//!
//! A site that was handed a claim redeems it against the issuing site and
//! keeps the link and credential it gets back.

pub mod redeem;
pub mod site_store;

pub use redeem::{ClaimRedeemer, RedeemClientError};
pub use site_store::{DirStore, SiteIdentity, SiteStore, SiteStoreError};
