//! Device sessions: one row per logged-in device, keyed by the access token jti.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::aggregates::session::revoke_reason;
use crate::domain::aggregates::{Customer, DeviceInfo, DeviceType, UserSession};
use crate::services::{Claims, TokenPair};
use crate::store::Store;
use crate::{Result, ShopError};

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn Store>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: i64,
    pub device: String,
    pub device_type: DeviceType,
    pub os_version: String,
    pub app_version: String,
    pub ip_address: String,
    pub location: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_current: bool,
}

impl SessionView {
    fn new(session: &UserSession, is_current: bool) -> Self {
        Self {
            id: session.id,
            device: session.device_display(),
            device_type: session.device_type,
            os_version: session.os_version.clone(),
            app_version: session.app_version.clone(),
            ip_address: session.ip_address.clone(),
            location: session.location_display(),
            created_at: session.created_at,
            last_activity: session.last_activity,
            expires_at: session.expires_at,
            is_current,
        }
    }
}

impl SessionService {
    pub fn new(store: Arc<dyn Store>) -> Self { Self { store } }

    /// Reuses the customer's active session on the same device id, else opens a new one.
    pub async fn create_or_update(&self, customer: &Customer, tokens: &TokenPair, device: DeviceInfo, ip: &str) -> Result<UserSession> {
        let now = Utc::now();
        let expires_at = tokens.refresh_claims.expires_at();

        if !device.device_id.is_empty() {
            if let Some(mut session) = self.store.active_session_for_device(customer.id, &device.device_id).await? {
                session.session_key = tokens.access_claims.jti.clone();
                session.refresh_jti = tokens.refresh_claims.jti.clone();
                session.ip_address = ip.to_string();
                session.user_agent = device.user_agent;
                session.last_activity = now;
                session.expires_at = expires_at;
                self.store.update_session(&session).await?;
                tracing::info!(customer = customer.id, session = session.id, device = %session.device_display(), "session updated");
                return Ok(session);
            }
        }

        let session = UserSession {
            id: 0,
            customer_id: customer.id,
            session_key: tokens.access_claims.jti.clone(),
            refresh_jti: tokens.refresh_claims.jti.clone(),
            device_name: device.name,
            device_type: device.device_type,
            device_id: device.device_id,
            app_version: device.app_version,
            os_version: device.os_version,
            ip_address: ip.to_string(),
            user_agent: device.user_agent,
            location: String::new(),
            is_active: true,
            created_at: now,
            last_activity: now,
            expires_at,
            revoked_at: None,
            revoked_reason: None,
        };
        let session = self.store.insert_session(session).await?;
        tracing::info!(customer = customer.id, session = session.id, device = %session.device_display(), "session created");
        Ok(session)
    }

    /// After a refresh: the session keeps its row but answers to the new access jti.
    pub async fn touch_refresh(&self, refresh_jti: &str, access: &Claims, ip: &str) -> Result<()> {
        if let Some(mut session) = self.store.session_by_refresh_jti(refresh_jti).await? {
            if session.is_active {
                session.session_key = access.jti.clone();
                session.ip_address = ip.to_string();
                session.last_activity = Utc::now();
                self.store.update_session(&session).await?;
            }
        }
        Ok(())
    }

    /// A token whose session was revoked must not authenticate. Untracked tokens pass.
    pub async fn is_revoked(&self, access_jti: &str) -> Result<bool> {
        Ok(self.store.session_by_key(access_jti).await?.is_some_and(|s| !s.is_active))
    }

    /// The session the caller is using: matched on the access jti, else on the IP.
    fn current_of<'a>(sessions: &'a [UserSession], jti: &str, ip: &str) -> Option<&'a UserSession> {
        sessions.iter().find(|s| s.session_key == jti).or_else(|| sessions.iter().find(|s| s.ip_address == ip))
    }

    pub async fn list(&self, customer_id: i64, jti: &str, ip: &str) -> Result<Vec<SessionView>> {
        let sessions = self.store.active_sessions(customer_id).await?;
        let current = Self::current_of(&sessions, jti, ip).map(|s| s.id);
        Ok(sessions.iter().map(|s| SessionView::new(s, Some(s.id) == current)).collect())
    }

    pub async fn current(&self, customer_id: i64, jti: &str, ip: &str) -> Result<(Option<SessionView>, usize)> {
        let sessions = self.store.active_sessions(customer_id).await?;
        let current = Self::current_of(&sessions, jti, ip).map(|s| SessionView::new(s, true));
        Ok((current, sessions.len()))
    }

    pub async fn revoke(&self, customer_id: i64, session_id: i64) -> Result<UserSession> {
        let mut session = match self.store.session(session_id).await? {
            Some(s) if s.customer_id == customer_id && s.is_active => s,
            _ => return Err(ShopError::NotFound("Session")),
        };
        session.revoke(revoke_reason::USER_ACTION, Utc::now());
        self.store.update_session(&session).await?;
        tracing::warn!(customer = customer_id, session = session.id, device = %session.device_display(), "session revoked");
        Ok(session)
    }

    /// Revokes every other session; with `include_current` the caller's too, and all tokens die.
    pub async fn revoke_all(&self, customer: &Customer, jti: &str, ip: &str, include_current: bool) -> Result<u64> {
        let now = Utc::now();
        let sessions = self.store.active_sessions(customer.id).await?;
        let keep = if include_current { None } else { Self::current_of(&sessions, jti, ip).map(|s| s.id) };
        let revoked = self.store.revoke_sessions(customer.id, keep, revoke_reason::USER_REVOKE_ALL, now).await?;
        if include_current {
            self.invalidate_all_tokens(customer).await?;
        }
        tracing::warn!(customer = customer.id, revoked, include_current, "revoked all sessions");
        Ok(revoked)
    }

    /// Bumps the token version and closes every active session.
    pub async fn invalidate_all_tokens(&self, customer: &Customer) -> Result<u64> {
        let mut customer = customer.clone();
        customer.bump_token_version();
        self.store.update_customer(&customer).await?;
        self.store.revoke_sessions(customer.id, None, revoke_reason::TOKENS_INVALIDATED, Utc::now()).await
    }

    pub async fn cleanup(&self) -> Result<u64> {
        let count = self.store.expire_sessions(Utc::now()).await?;
        if count > 0 {
            tracing::info!(count, "expired sessions cleaned up");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{DeviceInfoInput, LoginMethod};
    use crate::services::TokenService;
    use crate::store::{AccountStore, MemoryStore, SessionStore};
    use std::time::Duration;
    use uuid::Uuid;

    async fn setup() -> (SessionService, MemoryStore, Customer, TokenService) {
        let store = MemoryStore::new();
        let now = Utc::now();
        let customer = store
            .insert_customer(Customer {
                id: 0,
                email: "m@example.com".into(),
                username: "m".into(),
                first_name: String::new(),
                last_name: String::new(),
                phone_number: String::new(),
                password_hash: String::new(),
                is_active: true,
                is_staff: false,
                is_email_verified: true,
                email_verification_token: Uuid::new_v4(),
            password_reset_token: None,
            password_reset_sent_at: None,
                token_version: 0,
                login_method: LoginMethod::Email,
                last_login: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        let tokens = TokenService::new("s", Duration::from_secs(600), Duration::from_secs(6000));
        (SessionService::new(Arc::new(store.clone())), store, customer, tokens)
    }

    fn phone() -> DeviceInfo {
        DeviceInfo::resolve(
            Some(DeviceInfoInput { name: "Pixel".into(), platform: "android".into(), id: "dev-1".into(), ..Default::default() }),
            "okhttp",
        )
    }

    #[tokio::test]
    async fn test_same_device_reuses_session() {
        let (service, _, customer, tokens) = setup().await;
        let first = service.create_or_update(&customer, &tokens.issue_pair(&customer, Utc::now()).unwrap(), phone(), "1.1.1.1").await.unwrap();
        let pair = tokens.issue_pair(&customer, Utc::now()).unwrap();
        let second = service.create_or_update(&customer, &pair, phone(), "2.2.2.2").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.session_key, pair.access_claims.jti);
        assert_eq!(second.ip_address, "2.2.2.2");

        let web = DeviceInfo::resolve(None, "Mozilla/5.0");
        let web_pair = tokens.issue_pair(&customer, Utc::now()).unwrap();
        let third = service.create_or_update(&customer, &web_pair, web, "3.3.3.3").await.unwrap();
        assert_ne!(third.id, first.id);
    }

    #[tokio::test]
    async fn test_list_marks_current_and_revoke_all_keeps_it() {
        let (service, store, customer, tokens) = setup().await;
        let mine = tokens.issue_pair(&customer, Utc::now()).unwrap();
        service.create_or_update(&customer, &mine, phone(), "1.1.1.1").await.unwrap();
        let other = tokens.issue_pair(&customer, Utc::now()).unwrap();
        service.create_or_update(&customer, &other, DeviceInfo::resolve(None, "Mozilla/5.0"), "9.9.9.9").await.unwrap();

        let listed = service.list(customer.id, &mine.access_claims.jti, "5.5.5.5").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed.iter().filter(|s| s.is_current).count(), 1);

        let revoked = service.revoke_all(&customer, &mine.access_claims.jti, "5.5.5.5", false).await.unwrap();
        assert_eq!(revoked, 1);
        assert!(!service.is_revoked(&mine.access_claims.jti).await.unwrap());
        assert!(service.is_revoked(&other.access_claims.jti).await.unwrap());
        assert_eq!(store.customer(customer.id).await.unwrap().unwrap().token_version, 0);

        service.revoke_all(&customer, &mine.access_claims.jti, "5.5.5.5", true).await.unwrap();
        assert_eq!(store.customer(customer.id).await.unwrap().unwrap().token_version, 1);
        assert!(store.active_sessions(customer.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revoke_foreign_session_is_not_found() {
        let (service, _, customer, tokens) = setup().await;
        let pair = tokens.issue_pair(&customer, Utc::now()).unwrap();
        let session = service.create_or_update(&customer, &pair, phone(), "1.1.1.1").await.unwrap();
        assert!(matches!(service.revoke(customer.id + 100, session.id).await, Err(ShopError::NotFound(_))));
        let revoked = service.revoke(customer.id, session.id).await.unwrap();
        assert_eq!(revoked.revoked_reason.as_deref(), Some("user_action"));
        assert!(matches!(service.revoke(customer.id, session.id).await, Err(ShopError::NotFound(_))));
    }
}
