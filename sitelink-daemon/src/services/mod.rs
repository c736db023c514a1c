//! HTTP services.

mod rate_limit;
mod redemption;

pub use rate_limit::{RateLimited, RedemptionRateLimiter};
pub use redemption::{
    RedemptionError, RedemptionService, SiteCompatibility, NAME_HEADER, SITE_NAME_HEADER,
    SITE_VERSION_PARAM, SUBJECT_HEADER,
};
