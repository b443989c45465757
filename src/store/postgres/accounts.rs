use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::PgStore;
use crate::domain::aggregates::session::revoke_reason;
use crate::domain::aggregates::{AccountLock, Address, Customer, LoginAttempt, UserSession, VerificationCode};
use crate::store::{AccountStore, SecurityStore, SessionStore};
use crate::Result;

#[async_trait]
impl AccountStore for PgStore {
    async fn insert_customer(&self, c: Customer) -> Result<Customer> {
        Ok(sqlx::query_as::<_, Customer>(
            "INSERT INTO customers (email, username, first_name, last_name, phone_number, password_hash, is_active, is_staff, is_email_verified, email_verification_token, password_reset_token, password_reset_sent_at, token_version, login_method, last_login, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) RETURNING *",
        )
        .bind(&c.email).bind(&c.username).bind(&c.first_name).bind(&c.last_name).bind(&c.phone_number)
        .bind(&c.password_hash).bind(c.is_active).bind(c.is_staff).bind(c.is_email_verified)
        .bind(c.email_verification_token).bind(c.password_reset_token).bind(c.password_reset_sent_at)
        .bind(c.token_version).bind(c.login_method.as_str()).bind(c.last_login)
        .bind(c.created_at).bind(c.updated_at)
        .fetch_one(&self.pool).await?)
    }

    async fn customer(&self, id: i64) -> Result<Option<Customer>> {
        Ok(sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = $1").bind(id).fetch_optional(&self.pool).await?)
    }

    async fn customer_by_email(&self, email: &str) -> Result<Option<Customer>> {
        Ok(sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE email = $1").bind(email).fetch_optional(&self.pool).await?)
    }

    async fn customer_by_verification_token(&self, token: Uuid) -> Result<Option<Customer>> {
        Ok(sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE email_verification_token = $1")
            .bind(token).fetch_optional(&self.pool).await?)
    }

    async fn customer_by_reset_token(&self, token: Uuid) -> Result<Option<Customer>> {
        Ok(sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE password_reset_token = $1")
            .bind(token).fetch_optional(&self.pool).await?)
    }

    async fn username_taken(&self, username: &str) -> Result<bool> {
        Ok(sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM customers WHERE username = $1)")
            .bind(username).fetch_one(&self.pool).await?)
    }

    async fn update_customer(&self, c: &Customer) -> Result<()> {
        sqlx::query(
            "UPDATE customers SET email = $2, username = $3, first_name = $4, last_name = $5, phone_number = $6, password_hash = $7, \
             is_active = $8, is_staff = $9, is_email_verified = $10, token_version = $11, login_method = $12, last_login = $13, updated_at = $14, \
             password_reset_token = $15, password_reset_sent_at = $16 WHERE id = $1",
        )
        .bind(c.id).bind(&c.email).bind(&c.username).bind(&c.first_name).bind(&c.last_name).bind(&c.phone_number)
        .bind(&c.password_hash).bind(c.is_active).bind(c.is_staff).bind(c.is_email_verified).bind(c.token_version)
        .bind(c.login_method.as_str()).bind(c.last_login).bind(c.updated_at)
        .bind(c.password_reset_token).bind(c.password_reset_sent_at)
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_customer(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM customers WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn addresses(&self, customer_id: i64) -> Result<Vec<Address>> {
        Ok(sqlx::query_as::<_, Address>("SELECT * FROM addresses WHERE customer_id = $1 ORDER BY created_at DESC, id DESC")
            .bind(customer_id).fetch_all(&self.pool).await?)
    }

    async fn insert_address(&self, a: Address) -> Result<Address> {
        let f = &a.fields;
        Ok(sqlx::query_as::<_, Address>(
            "INSERT INTO addresses (customer_id, label, receiver_name, street_address, city, province, vahed, phone, country, postal_code, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING *",
        )
        .bind(a.customer_id).bind(&f.label).bind(&f.receiver_name).bind(&f.street_address).bind(&f.city).bind(&f.province)
        .bind(&f.vahed).bind(&f.phone).bind(&f.country).bind(&f.postal_code).bind(a.created_at).bind(a.updated_at)
        .fetch_one(&self.pool).await?)
    }

    async fn update_address(&self, a: &Address) -> Result<()> {
        let f = &a.fields;
        sqlx::query(
            "UPDATE addresses SET label = $2, receiver_name = $3, street_address = $4, city = $5, province = $6, vahed = $7, \
             phone = $8, country = $9, postal_code = $10, updated_at = $11 WHERE id = $1",
        )
        .bind(a.id).bind(&f.label).bind(&f.receiver_name).bind(&f.street_address).bind(&f.city).bind(&f.province)
        .bind(&f.vahed).bind(&f.phone).bind(&f.country).bind(&f.postal_code).bind(a.updated_at)
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_address(&self, customer_id: i64, id: i64) -> Result<bool> {
        let done = sqlx::query("DELETE FROM addresses WHERE id = $1 AND customer_id = $2")
            .bind(id).bind(customer_id).execute(&self.pool).await?;
        Ok(done.rows_affected() > 0)
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session(&self, s: UserSession) -> Result<UserSession> {
        Ok(sqlx::query_as::<_, UserSession>(
            "INSERT INTO user_sessions (customer_id, session_key, refresh_jti, device_name, device_type, device_id, app_version, os_version, \
             ip_address, user_agent, location, is_active, created_at, last_activity, expires_at, revoked_at, revoked_reason) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) RETURNING *",
        )
        .bind(s.customer_id).bind(&s.session_key).bind(&s.refresh_jti).bind(&s.device_name).bind(s.device_type.as_str())
        .bind(&s.device_id).bind(&s.app_version).bind(&s.os_version).bind(&s.ip_address).bind(&s.user_agent)
        .bind(&s.location).bind(s.is_active).bind(s.created_at).bind(s.last_activity).bind(s.expires_at)
        .bind(s.revoked_at).bind(&s.revoked_reason)
        .fetch_one(&self.pool).await?)
    }

    async fn update_session(&self, s: &UserSession) -> Result<()> {
        sqlx::query(
            "UPDATE user_sessions SET session_key = $2, refresh_jti = $3, device_name = $4, device_type = $5, app_version = $6, os_version = $7, \
             ip_address = $8, user_agent = $9, location = $10, is_active = $11, last_activity = $12, expires_at = $13, revoked_at = $14, revoked_reason = $15 \
             WHERE id = $1",
        )
        .bind(s.id).bind(&s.session_key).bind(&s.refresh_jti).bind(&s.device_name).bind(s.device_type.as_str())
        .bind(&s.app_version).bind(&s.os_version).bind(&s.ip_address).bind(&s.user_agent).bind(&s.location)
        .bind(s.is_active).bind(s.last_activity).bind(s.expires_at).bind(s.revoked_at).bind(&s.revoked_reason)
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn session(&self, id: i64) -> Result<Option<UserSession>> {
        Ok(sqlx::query_as::<_, UserSession>("SELECT * FROM user_sessions WHERE id = $1").bind(id).fetch_optional(&self.pool).await?)
    }

    async fn session_by_key(&self, session_key: &str) -> Result<Option<UserSession>> {
        Ok(sqlx::query_as::<_, UserSession>("SELECT * FROM user_sessions WHERE session_key = $1")
            .bind(session_key).fetch_optional(&self.pool).await?)
    }

    async fn session_by_refresh_jti(&self, jti: &str) -> Result<Option<UserSession>> {
        Ok(sqlx::query_as::<_, UserSession>("SELECT * FROM user_sessions WHERE refresh_jti = $1 ORDER BY id DESC LIMIT 1")
            .bind(jti).fetch_optional(&self.pool).await?)
    }

    async fn active_session_for_device(&self, customer_id: i64, device_id: &str) -> Result<Option<UserSession>> {
        Ok(sqlx::query_as::<_, UserSession>(
            "SELECT * FROM user_sessions WHERE customer_id = $1 AND device_id = $2 AND is_active ORDER BY last_activity DESC LIMIT 1",
        )
        .bind(customer_id).bind(device_id).fetch_optional(&self.pool).await?)
    }

    async fn active_sessions(&self, customer_id: i64) -> Result<Vec<UserSession>> {
        Ok(sqlx::query_as::<_, UserSession>(
            "SELECT * FROM user_sessions WHERE customer_id = $1 AND is_active ORDER BY last_activity DESC",
        )
        .bind(customer_id).fetch_all(&self.pool).await?)
    }

    async fn revoke_sessions(&self, customer_id: i64, keep: Option<i64>, reason: &str, now: DateTime<Utc>) -> Result<u64> {
        let done = sqlx::query(
            "UPDATE user_sessions SET is_active = FALSE, revoked_at = $3, revoked_reason = $4 \
             WHERE customer_id = $1 AND is_active AND ($2::BIGINT IS NULL OR id <> $2)",
        )
        .bind(customer_id).bind(keep).bind(now).bind(reason)
        .execute(&self.pool).await?;
        Ok(done.rows_affected())
    }

    async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let done = sqlx::query(
            "UPDATE user_sessions SET is_active = FALSE, revoked_at = $1, revoked_reason = $2 WHERE is_active AND expires_at <= $1",
        )
        .bind(now).bind(revoke_reason::EXPIRED)
        .execute(&self.pool).await?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl SecurityStore for PgStore {
    async fn record_attempt(&self, a: LoginAttempt) -> Result<LoginAttempt> {
        Ok(sqlx::query_as::<_, LoginAttempt>(
            "INSERT INTO login_attempts (email, ip_address, user_agent, success, failure_reason, security_tier, response_time_ms, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
        )
        .bind(&a.email).bind(&a.ip_address).bind(&a.user_agent).bind(a.success).bind(&a.failure_reason)
        .bind(a.security_tier).bind(a.response_time_ms).bind(a.created_at)
        .fetch_one(&self.pool).await?)
    }

    async fn failed_attempts(&self, email: &str, since: DateTime<Utc>) -> Result<Vec<LoginAttempt>> {
        Ok(sqlx::query_as::<_, LoginAttempt>(
            "SELECT * FROM login_attempts WHERE email = $1 AND NOT success AND created_at >= $2 ORDER BY created_at DESC",
        )
        .bind(email).bind(since).fetch_all(&self.pool).await?)
    }

    async fn attempts_since(&self, since: DateTime<Utc>) -> Result<Vec<LoginAttempt>> {
        Ok(sqlx::query_as::<_, LoginAttempt>("SELECT * FROM login_attempts WHERE created_at >= $1 ORDER BY created_at DESC")
            .bind(since).fetch_all(&self.pool).await?)
    }

    async fn anonymize_attempts(&self, email: &str, replacement: &str) -> Result<u64> {
        let done = sqlx::query("UPDATE login_attempts SET email = $2, user_agent = '[deleted]' WHERE email = $1")
            .bind(email).bind(replacement).execute(&self.pool).await?;
        Ok(done.rows_affected())
    }

    async fn active_lock(&self, email: &str) -> Result<Option<AccountLock>> {
        Ok(sqlx::query_as::<_, AccountLock>(
            "SELECT * FROM account_locks WHERE email = $1 AND is_active ORDER BY locked_at DESC LIMIT 1",
        )
        .bind(email).fetch_optional(&self.pool).await?)
    }

    async fn lock_by_token(&self, token: &str) -> Result<Option<AccountLock>> {
        Ok(sqlx::query_as::<_, AccountLock>("SELECT * FROM account_locks WHERE unlock_token = $1")
            .bind(token).fetch_optional(&self.pool).await?)
    }

    async fn insert_lock(&self, l: AccountLock) -> Result<AccountLock> {
        Ok(sqlx::query_as::<_, AccountLock>(
            "INSERT INTO account_locks (email, customer_id, reason, attempt_count, ip_addresses, locked_at, expires_at, unlock_token, \
             unlock_token_expires, is_active, unlocked_at, unlocked_by) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING *",
        )
        .bind(&l.email).bind(l.customer_id).bind(&l.reason).bind(l.attempt_count).bind(&l.ip_addresses)
        .bind(l.locked_at).bind(l.expires_at).bind(&l.unlock_token).bind(l.unlock_token_expires)
        .bind(l.is_active).bind(l.unlocked_at).bind(&l.unlocked_by)
        .fetch_one(&self.pool).await?)
    }

    async fn update_lock(&self, l: &AccountLock) -> Result<()> {
        sqlx::query("UPDATE account_locks SET is_active = $2, unlocked_at = $3, unlocked_by = $4 WHERE id = $1")
            .bind(l.id).bind(l.is_active).bind(l.unlocked_at).bind(&l.unlocked_by)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn active_locks(&self) -> Result<Vec<AccountLock>> {
        Ok(sqlx::query_as::<_, AccountLock>("SELECT * FROM account_locks WHERE is_active ORDER BY locked_at DESC")
            .fetch_all(&self.pool).await?)
    }

    async fn delete_locks(&self, email: &str) -> Result<()> {
        sqlx::query("DELETE FROM account_locks WHERE email = $1").bind(email).execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_code(&self, c: VerificationCode) -> Result<VerificationCode> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE verification_codes SET is_used = TRUE WHERE email = $1 AND NOT is_used")
            .bind(&c.email).execute(&mut *tx).await?;
        let saved = sqlx::query_as::<_, VerificationCode>(
            "INSERT INTO verification_codes (email, code, ip_address, created_at, expires_at, attempts, max_attempts, is_used) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
        )
        .bind(&c.email).bind(&c.code).bind(&c.ip_address).bind(c.created_at).bind(c.expires_at)
        .bind(c.attempts).bind(c.max_attempts).bind(c.is_used)
        .fetch_one(&mut *tx).await?;
        tx.commit().await?;
        Ok(saved)
    }

    async fn latest_code(&self, email: &str) -> Result<Option<VerificationCode>> {
        Ok(sqlx::query_as::<_, VerificationCode>(
            "SELECT * FROM verification_codes WHERE email = $1 AND NOT is_used ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(email).fetch_optional(&self.pool).await?)
    }

    async fn update_code(&self, c: &VerificationCode) -> Result<()> {
        sqlx::query("UPDATE verification_codes SET attempts = $2, is_used = $3 WHERE id = $1")
            .bind(c.id).bind(c.attempts).bind(c.is_used).execute(&self.pool).await?;
        Ok(())
    }

    async fn codes_created_since(&self, email: &str, since: DateTime<Utc>) -> Result<i64> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM verification_codes WHERE email = $1 AND created_at >= $2")
            .bind(email).bind(since).fetch_one(&self.pool).await?)
    }

    async fn delete_codes(&self, email: &str) -> Result<()> {
        sqlx::query("DELETE FROM verification_codes WHERE email = $1").bind(email).execute(&self.pool).await?;
        Ok(())
    }
}
