//! Connection rate limiting using the token bucket algorithm.
//!
//! [`RateLimitFilter`] plugs into an upgrade controller's filter pipeline and
//! throttles upgrade attempts per peer IP.

mod filter;
mod token_bucket;

pub use filter::{RateLimitFilter, RATE_LIMITED};
pub use token_bucket::TokenBucket;
