//! Session token verification.
//!
//! Lounge does not issue sessions. Tokens are minted by the account service
//! and only verified here.

use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use lounge_common::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Identity attached to an authenticated request or connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub user_id: String,
    /// Name suggested by the token, used when a join omits one.
    pub display_name: Option<String>,
}

/// Turns a bearer token into a [`SessionUser`].
#[async_trait]
pub trait SessionVerifier: Send + Sync {
    /// Verify `token`. Every failure is `Unauthorized`.
    async fn verify(&self, token: &str) -> AppResult<SessionUser>;
}

/// Type alias for a shared verifier.
pub type SessionVerifierService = Arc<dyn SessionVerifier>;

/// Token claims.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    pub exp: i64,
}

/// HS256 verifier with a shared secret.
#[derive(Clone)]
pub struct JwtSessionVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtSessionVerifier {
    /// Create a verifier. When `issuer` is set, tokens must carry it.
    #[must_use]
    pub fn new(secret: &str, issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Sign claims with `secret`. Used by tests and local tooling.
    pub fn sign(secret: &str, claims: &Claims) -> AppResult<String> {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("Failed to sign token: {e}")))
    }
}

#[async_trait]
impl SessionVerifier for JwtSessionVerifier {
    async fn verify(&self, token: &str) -> AppResult<SessionUser> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "Rejected session token");
            AppError::Unauthorized
        })?;

        if data.claims.sub.is_empty() {
            return Err(AppError::Unauthorized);
        }

        Ok(SessionUser {
            user_id: data.claims.sub,
            display_name: data.claims.name.filter(|n| !n.trim().is_empty()),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    const SECRET: &str = "test-secret";

    fn claims(sub: &str, exp_offset: i64, iss: Option<&str>) -> Claims {
        Claims {
            sub: sub.to_string(),
            name: Some("Alice".to_string()),
            iss: iss.map(str::to_string),
            exp: Utc::now().timestamp() + exp_offset,
        }
    }

    #[tokio::test]
    async fn test_verify_valid_token() {
        let verifier = JwtSessionVerifier::new(SECRET, None);
        let token = JwtSessionVerifier::sign(SECRET, &claims("alice", 600, None)).unwrap();

        let user = verifier.verify(&token).await.unwrap();
        assert_eq!(user.user_id, "alice");
        assert_eq!(user.display_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_secret() {
        let verifier = JwtSessionVerifier::new(SECRET, None);
        let token = JwtSessionVerifier::sign("other", &claims("alice", 600, None)).unwrap();

        assert!(matches!(verifier.verify(&token).await, Err(AppError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_verify_rejects_expired() {
        let verifier = JwtSessionVerifier::new(SECRET, None);
        let token = JwtSessionVerifier::sign(SECRET, &claims("alice", -3600, None)).unwrap();

        assert!(matches!(verifier.verify(&token).await, Err(AppError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_verify_checks_issuer() {
        let verifier = JwtSessionVerifier::new(SECRET, Some("accounts"));
        let wrong = JwtSessionVerifier::sign(SECRET, &claims("alice", 600, Some("x"))).unwrap();
        let right =
            JwtSessionVerifier::sign(SECRET, &claims("alice", 600, Some("accounts"))).unwrap();

        assert!(verifier.verify(&wrong).await.is_err());
        assert!(verifier.verify(&right).await.is_ok());
    }

    #[tokio::test]
    async fn test_verify_rejects_garbage() {
        let verifier = JwtSessionVerifier::new(SECRET, None);
        assert!(verifier.verify("not-a-token").await.is_err());
    }
}
