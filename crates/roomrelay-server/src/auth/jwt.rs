//! HS256 JSON Web Token verification.
//!
//! Tokens are signed with a shared secret and carry the user id in a
//! `userId` claim (string or integer). `exp` is checked when present but
//! not required.

use super::IdentityVerifier;
use futures_util::future::{BoxFuture, FutureExt};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use roomrelay_core::{RelayError, RelayResult, UserId};
use serde_json::{Map, Value};
use tracing::debug;

/// Claim holding the user identifier.
const USER_ID_CLAIM: &str = "userId";

/// Verifies HS256 tokens against a shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Decode and check `token`, extracting the `userId` claim.
    pub fn verify_token(&self, token: &str) -> RelayResult<UserId> {
        let data = jsonwebtoken::decode::<Map<String, Value>>(token, &self.key, &self.validation)
            .map_err(|e| {
                debug!(error = %e, "token rejected");
                RelayError::Auth(e.to_string())
            })?;

        match data.claims.get(USER_ID_CLAIM) {
            Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
            Some(Value::Number(id)) => Ok(id.to_string()),
            _ => Err(RelayError::Auth("token has no userId claim".into())),
        }
    }
}

impl IdentityVerifier for JwtVerifier {
    fn verify<'a>(&'a self, token: &'a str) -> BoxFuture<'a, RelayResult<UserId>> {
        async move { self.verify_token(token) }.boxed()
    }
}
