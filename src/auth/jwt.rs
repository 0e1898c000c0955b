//! Access-token signing and verification.
//!
//! HS256 tokens carrying the user id and email; lifetime comes from
//! configuration. The signing keys are derived once at construction so the
//! secret string is not kept around.

use crate::auth::models::{Claims, User};
use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;

pub struct JwtHandler {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry: Duration,
}

impl JwtHandler {
    pub fn new(secret: String, expiration_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry: Duration::hours(expiration_hours),
        }
    }

    /// Issue a token for `user`. Returns the signed token together with its
    /// lifetime in seconds (what the login response reports as `expires_in`).
    pub fn generate_token(&self, user: &User) -> Result<(String, usize)> {
        let expires_at = Utc::now() + self.expiry;
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            exp: expires_at.timestamp() as usize,
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key).context("sign jwt")?;
        debug!(user = %user.email, %expires_at, "issued access token");

        Ok((token, self.expiry.num_seconds() as usize))
    }

    /// Verify a bearer token's signature and expiry, returning its claims.
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| anyhow!("token rejected: {e}"))?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_user(email: &str) -> User {
        User {
            id: Uuid::new_v4(),
            name: "Sample".to_string(),
            email: email.to_string(),
            password_hash: String::new(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn issued_tokens_carry_the_user_identity() {
        let handler = JwtHandler::new("hmac-key-for-tests".to_string(), 2);
        let user = sample_user("ops@ledgerlens.test");

        let (token, lifetime) = handler.generate_token(&user).unwrap();
        assert_eq!(lifetime, 2 * 3600);

        let claims = handler.validate_token(&token).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.email, user.email);
        assert!(claims.exp > Utc::now().timestamp() as usize);
    }

    #[test]
    fn expired_tokens_fail_validation() {
        // Negative lifetime puts `exp` well past the default leeway.
        let handler = JwtHandler::new("hmac-key-for-tests".to_string(), -2);
        let (token, _) = handler.generate_token(&sample_user("old@example.com")).unwrap();
        assert!(handler.validate_token(&token).is_err());
    }

    #[test]
    fn forged_payload_is_rejected() {
        let handler = JwtHandler::new("hmac-key-for-tests".to_string(), 2);
        let (token_a, _) = handler.generate_token(&sample_user("alice@example.com")).unwrap();
        let (token_b, _) = handler.generate_token(&sample_user("bob@example.com")).unwrap();

        // Payload from one token stitched onto another token's signature.
        let a: Vec<&str> = token_a.split('.').collect();
        let b: Vec<&str> = token_b.split('.').collect();
        let spliced = format!("{}.{}.{}", a[0], b[1], a[2]);
        assert!(handler.validate_token(&spliced).is_err());
    }

    #[test]
    fn junk_strings_are_not_tokens() {
        let handler = JwtHandler::new("hmac-key-for-tests".to_string(), 2);
        for junk in ["", "abc", "a.b.c", "🦀🦀🦀"] {
            assert!(handler.validate_token(junk).is_err(), "accepted {junk:?}");
        }
    }
}
