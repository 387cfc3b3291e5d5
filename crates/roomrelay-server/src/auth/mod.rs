//! Connection authentication: bearer token verification and attempt limits.

pub mod jwt;
pub mod rate_limit;

pub use jwt::JwtVerifier;
pub use rate_limit::RateLimiter;

use futures_util::future::BoxFuture;
use roomrelay_core::{RelayResult, UserId};

/// Turns a bearer token into the identifier of the user it was issued to.
///
/// Implementations may be latent (remote introspection, key fetches); the
/// session handler never holds the membership lock while awaiting one.
pub trait IdentityVerifier: Send + Sync {
    /// Verify `token`, returning the user id or [`roomrelay_core::RelayError::Auth`].
    fn verify<'a>(&'a self, token: &'a str) -> BoxFuture<'a, RelayResult<UserId>>;
}
