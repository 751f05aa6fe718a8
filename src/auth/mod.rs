//! Credential handling for upgrade requests.
//!
//! - `resolver`: the [`AccountabilityResolver`] seam and its errors
//! - `jwt`: JWT-backed resolver
//! - `gate`: per-mode authentication decision

mod accountability;
mod claims;
mod extract;
mod gate;
mod jwt;
mod resolver;

pub use accountability::AccountabilityContext;
pub use claims::{Claims, ADMIN_ROLE};
pub use extract::{extract_token, TOKEN_QUERY_PARAM};
pub use gate::{AuthRejection, AuthenticationGate};
pub use jwt::JwtResolver;
pub use resolver::{AccountabilityResolver, ResolveError};
