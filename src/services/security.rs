//! Login protection service.
//!
//! Feeds the attempt history into [`SecurityPolicy`] and persists what the
//! assessment asks for: attempts, locks and verification codes. Mail goes
//! out through [`Mailer`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::aggregates::security::{distinct_ips, unlocked_by};
use crate::domain::aggregates::{AccountLock, CodeCheck, LoginAttempt, SecurityAssessment, SecurityPolicy, Tier};
use crate::domain::events::{AccountEvent, DomainEvent};
use crate::services::{ClientInfo, EventPublisher, Mailer};
use crate::store::Store;
use crate::{Result, ShopError};

#[derive(Clone)]
pub struct LoginSecurity {
    store: Arc<dyn Store>,
    policy: SecurityPolicy,
    mailer: Mailer,
    events: EventPublisher,
}

/// What [`LoginSecurity::handle_failed_login`] did.
#[derive(Debug, Clone)]
pub struct FailedLogin {
    pub assessment: SecurityAssessment,
    pub lock: Option<AccountLock>,
    pub code_sent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockOutcome {
    Unlocked { email: String },
    AlreadyUnlocked { email: String },
}

impl UnlockOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Unlocked { .. } => "Your account has been successfully unlocked!",
            Self::AlreadyUnlocked { .. } => "Your account has already been unlocked automatically.",
        }
    }

    pub fn email(&self) -> &str {
        match self {
            Self::Unlocked { email } | Self::AlreadyUnlocked { email } => email,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LockDetails {
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reason: String,
    pub attempt_count: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityStatus {
    pub email: String,
    pub is_locked: bool,
    pub minutes_remaining: i64,
    pub security_tier: Tier,
    pub failed_attempts_24h: usize,
    pub requires_verification: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_details: Option<LockDetails>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WindowStats {
    pub total_attempts: usize,
    pub failed_attempts: usize,
    pub successful_logins: usize,
    pub tier_5_triggers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentFailure {
    pub email: String,
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
    pub security_tier: i16,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveLockSummary {
    pub email: String,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempt_count: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityDashboard {
    pub last_hour: WindowStats,
    pub last_24_hours: WindowStats,
    pub accounts_locked_24h: usize,
    pub active_locks: usize,
    pub recent_failed_attempts: Vec<RecentFailure>,
    pub active_locks_detail: Vec<ActiveLockSummary>,
}

impl LoginSecurity {
    pub fn new(store: Arc<dyn Store>, policy: SecurityPolicy, mailer: Mailer, events: EventPublisher) -> Self {
        Self { store, policy, mailer, events }
    }

    pub fn policy(&self) -> &SecurityPolicy { &self.policy }

    /// The active lock on the email, releasing it first if it has run out.
    pub async fn active_lock(&self, email: &str, now: DateTime<Utc>) -> Result<Option<AccountLock>> {
        let Some(mut lock) = self.store.active_lock(email).await? else {
            return Ok(None);
        };
        if lock.is_expired(now) {
            lock.release(unlocked_by::AUTO_EXPIRE, now);
            self.store.update_lock(&lock).await?;
            tracing::info!(email, "account lock expired");
            self.events
                .publish(DomainEvent::Account(AccountEvent::Unlocked {
                    email: email.to_string(),
                    unlocked_by: unlocked_by::AUTO_EXPIRE.to_string(),
                }))
                .await;
            return Ok(None);
        }
        Ok(Some(lock))
    }

    pub async fn check(&self, email: &str, ip: &str) -> Result<SecurityAssessment> {
        let now = Utc::now();
        if let Some(lock) = self.active_lock(email, now).await? {
            return Ok(self.policy.locked(lock.minutes_remaining(now)));
        }
        let failures = self.store.failed_attempts(email, now - self.policy.day_window).await?;
        Ok(self.policy.assess(now, ip, &failures))
    }

    pub async fn record_attempt(&self, email: &str, client: &ClientInfo, success: bool, reason: &str, tier: Tier) -> Result<()> {
        let attempt = LoginAttempt {
            id: 0,
            email: email.to_string(),
            ip_address: client.ip.clone(),
            user_agent: client.user_agent.chars().take(500).collect(),
            success,
            failure_reason: reason.to_string(),
            security_tier: tier.level(),
            response_time_ms: Some(client.elapsed_ms()),
            created_at: Utc::now(),
        };
        self.store.record_attempt(attempt).await?;
        Ok(())
    }

    pub async fn record_success(&self, email: &str, client: &ClientInfo) -> Result<()> {
        self.record_attempt(email, client, true, "", Tier::Normal).await?;
        tracing::info!(email, ip = %client.ip, "successful login");
        Ok(())
    }

    /// Delays, records the failure and escalates to a lock or a code as the tier demands.
    pub async fn handle_failed_login(&self, email: &str, client: &ClientInfo, reason: &str) -> Result<FailedLogin> {
        let assessment = self.check(email, &client.ip).await?;
        if self.policy.apply_delays && !assessment.delay.is_zero() {
            tokio::time::sleep(assessment.delay).await;
        }
        self.record_attempt(email, client, false, reason, assessment.tier).await?;
        tracing::warn!(email, ip = %client.ip, tier = assessment.tier.level(), failed = assessment.failed_count, "failed login");

        let mut outcome = FailedLogin { assessment, lock: None, code_sent: false };
        if outcome.assessment.tier == Tier::Lockout || outcome.assessment.should_lock {
            outcome.lock = Some(self.lock_account(email, outcome.assessment.failed_count).await?);
        } else if outcome.assessment.requires_verification {
            self.issue_code(email, &client.ip).await?;
            outcome.code_sent = true;
        }
        Ok(outcome)
    }

    async fn lock_account(&self, email: &str, attempt_count: usize) -> Result<AccountLock> {
        let now = Utc::now();
        let recent = self.store.failed_attempts(email, now - self.policy.hour_window).await?;
        let customer_id = self.store.customer_by_email(email).await?.map(|c| c.id);
        let lock = self.policy.new_lock(email, customer_id, attempt_count, distinct_ips(&recent), now);
        let lock = self.store.insert_lock(lock).await?;
        tracing::error!(email, attempts = lock.attempt_count, ips = ?lock.ip_addresses, "ACCOUNT LOCKED");
        self.mailer.send_account_locked(&lock, now).await;
        self.events
            .publish(DomainEvent::Account(AccountEvent::Locked { email: email.to_string(), attempt_count: lock.attempt_count }))
            .await;
        Ok(lock)
    }

    /// Creates a fresh code, superseding older ones, and emails it.
    pub async fn issue_code(&self, email: &str, ip: &str) -> Result<()> {
        let now = Utc::now();
        let code = self.store.insert_code(self.policy.new_code(email, ip, now)).await?;
        tracing::info!(email, "verification code generated");
        self.mailer.send_verification_code(&code, now).await;
        Ok(())
    }

    /// `(verified, message)`; every check consumes an attempt.
    pub async fn verify_code(&self, email: &str, input: &str) -> Result<(bool, String)> {
        let Some(mut code) = self.store.latest_code(email).await? else {
            return Ok((false, "No verification code found. Please request a new one.".to_string()));
        };
        let check = code.check(input, Utc::now());
        if matches!(check, CodeCheck::Verified | CodeCheck::Wrong { .. }) {
            self.store.update_code(&code).await?;
        }
        if check == CodeCheck::Verified {
            tracing::info!(email, "verification successful");
        }
        Ok((check == CodeCheck::Verified, check.message()))
    }

    pub async fn resend_code(&self, email: &str, ip: &str) -> Result<()> {
        let now = Utc::now();
        if self.active_lock(email, now).await?.is_some() {
            return Err(ShopError::Forbidden("Account is locked. Check your email for unlock instructions.".to_string()));
        }
        let recent = self.store.codes_created_since(email, now - self.policy.resend_window).await?;
        if recent >= self.policy.resend_max {
            return Err(ShopError::RateLimited("Too many code requests. Please wait 5 minutes.".to_string()));
        }
        self.issue_code(email, ip).await
    }

    pub async fn unlock(&self, token: &str) -> Result<UnlockOutcome> {
        let now = Utc::now();
        let mut lock = match self.store.lock_by_token(token).await? {
            Some(lock) if lock.is_active => lock,
            _ => return Err(ShopError::Validation("Invalid or expired unlock link.".to_string())),
        };
        if now > lock.unlock_token_expires {
            return Err(ShopError::Validation("This unlock link has expired.".to_string()));
        }

        let (by, outcome) = if lock.is_expired(now) {
            (unlocked_by::AUTO_EXPIRE, UnlockOutcome::AlreadyUnlocked { email: lock.email.clone() })
        } else {
            (unlocked_by::EMAIL_LINK, UnlockOutcome::Unlocked { email: lock.email.clone() })
        };
        lock.release(by, now);
        self.store.update_lock(&lock).await?;
        tracing::info!(email = %lock.email, unlocked_by = by, "account unlocked");

        self.mailer.send_unlock_success(&lock.email, now).await;
        self.events
            .publish(DomainEvent::Account(AccountEvent::Unlocked { email: lock.email.clone(), unlocked_by: by.to_string() }))
            .await;
        Ok(outcome)
    }

    pub async fn status(&self, email: &str, ip: &str) -> Result<SecurityStatus> {
        let now = Utc::now();
        let lock = self.active_lock(email, now).await?;
        let failures = self.store.failed_attempts(email, now - self.policy.day_window).await?;
        let assessment = match &lock {
            Some(lock) => self.policy.locked(lock.minutes_remaining(now)),
            None => self.policy.assess(now, ip, &failures),
        };
        Ok(SecurityStatus {
            email: email.to_string(),
            is_locked: lock.is_some(),
            minutes_remaining: lock.as_ref().map_or(0, |l| l.minutes_remaining(now)),
            security_tier: assessment.tier,
            failed_attempts_24h: failures.len(),
            requires_verification: assessment.requires_verification,
            message: assessment.message,
            lock_details: lock.map(|l| LockDetails {
                locked_at: l.locked_at,
                expires_at: l.expires_at,
                reason: l.reason,
                attempt_count: l.attempt_count,
            }),
        })
    }

    pub async fn dashboard(&self) -> Result<SecurityDashboard> {
        let now = Utc::now();
        let day = self.store.attempts_since(now - self.policy.day_window).await?;
        let hour_start = now - self.policy.hour_window;
        let hour: Vec<LoginAttempt> = day.iter().filter(|a| a.created_at >= hour_start).cloned().collect();
        let locks = self.store.active_locks().await?;
        let day_start = now - self.policy.day_window;

        Ok(SecurityDashboard {
            last_hour: window_stats(&hour),
            last_24_hours: window_stats(&day),
            accounts_locked_24h: locks.iter().filter(|l| l.locked_at >= day_start).count(),
            active_locks: locks.len(),
            recent_failed_attempts: hour
                .iter()
                .filter(|a| !a.success)
                .take(20)
                .map(|a| RecentFailure {
                    email: a.email.clone(),
                    ip_address: a.ip_address.clone(),
                    created_at: a.created_at,
                    security_tier: a.security_tier,
                })
                .collect(),
            active_locks_detail: locks
                .iter()
                .take(10)
                .map(|l| ActiveLockSummary {
                    email: l.email.clone(),
                    locked_at: l.locked_at,
                    expires_at: l.expires_at,
                    attempt_count: l.attempt_count,
                })
                .collect(),
        })
    }
}

fn window_stats(attempts: &[LoginAttempt]) -> WindowStats {
    WindowStats {
        total_attempts: attempts.len(),
        failed_attempts: attempts.iter().filter(|a| !a.success).count(),
        successful_logins: attempts.iter().filter(|a| a.success).count(),
        tier_5_triggers: attempts.iter().filter(|a| a.security_tier == Tier::Lockout.level()).count(),
    }
}
