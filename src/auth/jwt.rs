//! JWT validation with signing-key rotation.
//!
//! This service never issues tokens; an external identity provider does.
//! `JwtHandler` only validates, accepting either the current signing secret
//! or the previous one so a key rotation doesn't invalidate tokens issued
//! moments before the rollover.

use crate::auth::models::Claims;
use anyhow::{Context, Result};
use jsonwebtoken::{decode, DecodingKey, Validation};
use tracing::debug;

pub struct JwtHandler {
    current_secret: String,
    previous_secret: Option<String>,
}

impl JwtHandler {
    pub fn new(current_secret: String, previous_secret: Option<String>) -> Self {
        Self {
            current_secret,
            previous_secret,
        }
    }

    /// Validate a token against the current secret, falling back to the
    /// previous one. Returns the claims of whichever key verified.
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let validation = Validation::default();

        if let Ok(decoded) = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.current_secret.as_bytes()),
            &validation,
        ) {
            return Ok(decoded.claims);
        }

        if let Some(previous) = &self.previous_secret {
            let decoded = decode::<Claims>(
                token,
                &DecodingKey::from_secret(previous.as_bytes()),
                &validation,
            )
            .context("invalid or expired token")?;
            debug!(sub = %decoded.claims.sub, "validated token against previous signing secret");
            return Ok(decoded.claims);
        }

        anyhow::bail!("invalid or expired token")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use uuid::Uuid;

    fn sign(secret: &str, sub: &str, exp_offset_secs: i64) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            name: "trader".to_string(),
            iat: now,
            exp: now + exp_offset_secs,
            nonce: Uuid::new_v4().to_string(),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn validates_token_signed_with_current_secret() {
        let handler = JwtHandler::new("current-secret".to_string(), None);
        let token = sign("current-secret", "user-1", 3600);
        let claims = handler.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
    }

    #[test]
    fn validates_token_signed_with_previous_secret_during_rotation() {
        let handler = JwtHandler::new(
            "new-secret".to_string(),
            Some("old-secret".to_string()),
        );
        let token = sign("old-secret", "user-2", 3600);
        let claims = handler.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "user-2");
    }

    #[test]
    fn rejects_token_signed_with_neither_secret() {
        let handler = JwtHandler::new(
            "new-secret".to_string(),
            Some("old-secret".to_string()),
        );
        let token = sign("rogue-secret", "user-3", 3600);
        assert!(handler.validate_token(&token).is_err());
    }

    #[test]
    fn rejects_expired_token() {
        let handler = JwtHandler::new("current-secret".to_string(), None);
        let token = sign("current-secret", "user-4", -10);
        assert!(handler.validate_token(&token).is_err());
    }
}
