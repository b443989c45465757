//! Bearer tokens and password hashing.
//!
//! Tokens are compact HS256 JWTs: `base64url(header).base64url(claims).base64url(mac)`.
//! Every token carries the customer's `token_version`; bumping the version on
//! the customer invalidates every token issued before.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::domain::aggregates::Customer;
use crate::{Result, ShopError};

type HmacSha256 = Hmac<Sha256>;

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub token_type: TokenType,
    pub user_id: i64,
    pub email: String,
    pub name: String,
    pub token_version: i32,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> { DateTime::from_timestamp(self.exp, 0).unwrap_or_default() }
}

/// Access and refresh tokens issued together at login.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
    pub access_claims: Claims,
    pub refresh_claims: Claims,
}

#[derive(Clone)]
pub struct TokenService {
    secret: Vec<u8>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self { secret: secret.as_bytes().to_vec(), access_ttl, refresh_ttl }
    }

    fn claims(&self, customer: &Customer, token_type: TokenType, now: DateTime<Utc>) -> Claims {
        let ttl = match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };
        Claims {
            token_type,
            user_id: customer.id,
            email: customer.email.clone(),
            name: customer.full_name(),
            token_version: customer.token_version,
            jti: Uuid::new_v4().simple().to_string(),
            iat: now.timestamp(),
            exp: now.timestamp() + ttl.as_secs() as i64,
        }
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| ShopError::Internal(e.to_string()))
    }

    fn encode(&self, claims: &Claims) -> Result<String> {
        let payload = serde_json::to_vec(claims).map_err(|e| ShopError::Internal(e.to_string()))?;
        let signing_input = format!("{}.{}", URL_SAFE_NO_PAD.encode(HEADER), URL_SAFE_NO_PAD.encode(payload));
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{signing_input}.{signature}"))
    }

    pub fn issue_pair(&self, customer: &Customer, now: DateTime<Utc>) -> Result<TokenPair> {
        let access_claims = self.claims(customer, TokenType::Access, now);
        let refresh_claims = self.claims(customer, TokenType::Refresh, now);
        Ok(TokenPair {
            access: self.encode(&access_claims)?,
            refresh: self.encode(&refresh_claims)?,
            access_claims,
            refresh_claims,
        })
    }

    pub fn issue_access(&self, customer: &Customer, now: DateTime<Utc>) -> Result<(String, Claims)> {
        let claims = self.claims(customer, TokenType::Access, now);
        Ok((self.encode(&claims)?, claims))
    }

    /// Checks signature, expiry and type. Version and account state are the caller's job.
    pub fn verify(&self, token: &str, expected: TokenType, now: DateTime<Utc>) -> Result<Claims> {
        let invalid = || ShopError::Unauthorized("Token is invalid or expired".to_string());

        let (signing_input, signature) = token.trim().rsplit_once('.').ok_or_else(invalid)?;
        let (_, payload) = signing_input.split_once('.').ok_or_else(invalid)?;
        let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| invalid())?;

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature).map_err(|_| invalid())?;

        let payload = URL_SAFE_NO_PAD.decode(payload).map_err(|_| invalid())?;
        let claims: Claims = serde_json::from_slice(&payload).map_err(|_| invalid())?;
        if claims.token_type != expected || claims.exp <= now.timestamp() {
            return Err(invalid());
        }
        Ok(claims)
    }
}

/// Argon2id hash in PHC string form. Runs on the blocking pool.
pub async fn hash_password(password: &str) -> Result<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || {
        use argon2::password_hash::rand_core::OsRng;
        use argon2::password_hash::{PasswordHasher, SaltString};
        use argon2::Argon2;

        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ShopError::Internal(format!("password hashing failed: {e}")))
    })
    .await
    .map_err(|e| ShopError::Internal(e.to_string()))?
}

/// False for a wrong password and for a hash that does not parse.
pub async fn verify_password(password: &str, encoded: &str) -> bool {
    let password = password.to_string();
    let encoded = encoded.to_string();
    tokio::task::spawn_blocking(move || {
        use argon2::password_hash::{PasswordHash, PasswordVerifier};
        use argon2::Argon2;

        PasswordHash::new(&encoded)
            .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
            .unwrap_or(false)
    })
    .await
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::LoginMethod;

    fn customer() -> Customer {
        let now = Utc::now();
        Customer {
            id: 42,
            email: "sara@example.com".into(),
            username: "sara".into(),
            first_name: "Sara".into(),
            last_name: "Ahmadi".into(),
            phone_number: String::new(),
            password_hash: String::new(),
            is_active: true,
            is_staff: false,
            is_email_verified: true,
            email_verification_token: Uuid::new_v4(),
            password_reset_token: None,
            password_reset_sent_at: None,
            token_version: 3,
            login_method: LoginMethod::Email,
            last_login: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn service() -> TokenService {
        TokenService::new("test-secret", Duration::from_secs(3600), Duration::from_secs(7 * 86_400))
    }

    #[test]
    fn test_issue_and_verify() {
        let now = Utc::now();
        let pair = service().issue_pair(&customer(), now).unwrap();
        let claims = service().verify(&pair.access, TokenType::Access, now).unwrap();
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.token_version, 3);
        assert_eq!(claims.name, "Sara Ahmadi");
        assert_ne!(pair.access_claims.jti, pair.refresh_claims.jti);
        assert!(service().verify(&pair.refresh, TokenType::Refresh, now).is_ok());
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let now = Utc::now();
        let pair = service().issue_pair(&customer(), now).unwrap();
        assert!(service().verify(&pair.refresh, TokenType::Access, now).is_err());
    }

    #[test]
    fn test_expired_and_tampered() {
        let now = Utc::now();
        let (token, _) = service().issue_access(&customer(), now).unwrap();
        assert!(service().verify(&token, TokenType::Access, now + chrono::Duration::hours(2)).is_err());

        let other = TokenService::new("other", Duration::from_secs(60), Duration::from_secs(60));
        assert!(other.verify(&token, TokenType::Access, now).is_err());
        assert!(service().verify("not.a.token", TokenType::Access, now).is_err());
    }

    #[tokio::test]
    async fn test_password_hash_roundtrip() {
        let hash = hash_password("s3cret-pass").await.unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("s3cret-pass", &hash).await);
        assert!(!verify_password("wrong", &hash).await);
        assert!(!verify_password("s3cret-pass", "garbage").await);
    }
}
