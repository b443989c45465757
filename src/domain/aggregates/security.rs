//! Progressive login protection.
//!
//! Failed logins for an email are counted over a sliding 24 hour window and
//! mapped onto five tiers:
//!
//! | tier | failures | effect |
//! |------|----------|--------|
//! | 1 | 0-3 | generic error |
//! | 2 | 4-5 | warning + short delay |
//! | 3 | 6-8 | longer delay |
//! | 4 | 9-10 | emailed verification code required |
//! | 5 | 11+ | account locked for an hour |
//!
//! Ten failures inside two minutes jump straight to tier 5. Independently of
//! the tier, five failures in a minute or thirty from one IP in an hour
//! refuse the attempt outright.
//!
//! Everything here is pure: the service feeds in the attempt history and
//! persists what the assessment asks for.

use std::time::Duration as StdDuration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand::{Rng, RngCore};
use serde::{Serialize, Serializer};

pub mod failure_reason {
    pub const INVALID_CREDENTIALS: &str = "invalid_credentials";
    pub const VERIFICATION_REQUIRED: &str = "verification_required";
    pub const TOO_MANY_ATTEMPTS: &str = "too_many_attempts";
}

pub mod unlocked_by {
    pub const AUTO_EXPIRE: &str = "auto_expire";
    pub const EMAIL_LINK: &str = "email_link";
}

#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    pub tier1_max: usize,
    pub tier2_max: usize,
    pub tier3_max: usize,
    pub tier4_max: usize,
    pub minute_window: Duration,
    pub hour_window: Duration,
    pub day_window: Duration,
    pub tier2_delay: StdDuration,
    pub tier3_delay: StdDuration,
    pub tier4_delay: StdDuration,
    pub apply_delays: bool,
    pub lock_duration: Duration,
    pub unlock_token_ttl: Duration,
    pub max_per_minute: usize,
    pub max_per_hour: usize,
    pub fast_attack_threshold: usize,
    pub fast_attack_window: Duration,
    pub code_length: usize,
    pub code_ttl: Duration,
    pub code_max_attempts: i32,
    pub resend_window: Duration,
    pub resend_max: i64,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            tier1_max: 3,
            tier2_max: 5,
            tier3_max: 8,
            tier4_max: 10,
            minute_window: Duration::seconds(60),
            hour_window: Duration::seconds(3600),
            day_window: Duration::seconds(86_400),
            tier2_delay: StdDuration::from_secs(2),
            tier3_delay: StdDuration::from_secs(5),
            tier4_delay: StdDuration::from_secs(10),
            apply_delays: true,
            lock_duration: Duration::hours(1),
            unlock_token_ttl: Duration::hours(24),
            max_per_minute: 5,
            max_per_hour: 30,
            fast_attack_threshold: 10,
            fast_attack_window: Duration::seconds(120),
            code_length: 6,
            code_ttl: Duration::minutes(10),
            code_max_attempts: 3,
            resend_window: Duration::minutes(5),
            resend_max: 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier { Normal = 1, Warning = 2, Elevated = 3, Verification = 4, Lockout = 5 }

impl Tier {
    pub fn level(self) -> i16 { self as i16 }
}

impl Serialize for Tier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> { serializer.serialize_i16(self.level()) }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityAssessment {
    pub allowed: bool,
    pub tier: Tier,
    pub delay: StdDuration,
    pub message: String,
    pub requires_verification: bool,
    pub should_lock: bool,
    pub failed_count: usize,
}

impl SecurityAssessment {
    fn refused(message: &str, failed_count: usize) -> Self {
        Self {
            allowed: false,
            tier: Tier::Normal,
            delay: StdDuration::ZERO,
            message: message.to_string(),
            requires_verification: false,
            should_lock: false,
            failed_count,
        }
    }
}

impl SecurityPolicy {
    /// Outcome for an account under an active lock.
    pub fn locked(&self, minutes_remaining: i64) -> SecurityAssessment {
        SecurityAssessment {
            allowed: false,
            tier: Tier::Lockout,
            delay: StdDuration::ZERO,
            message: format!("Account temporarily locked for security. Try again in {minutes_remaining} minute(s)."),
            requires_verification: false,
            should_lock: true,
            failed_count: 0,
        }
    }

    /// Assess the next attempt from the email's failed attempts.
    pub fn assess(&self, now: DateTime<Utc>, ip: &str, failures: &[LoginAttempt]) -> SecurityAssessment {
        let within = |a: &LoginAttempt, window: Duration| !a.success && now - a.created_at <= window;
        let day = failures.iter().filter(|a| within(a, self.day_window)).count();
        let minute = failures.iter().filter(|a| within(a, self.minute_window)).count();
        let ip_hour = failures.iter().filter(|a| a.ip_address == ip && within(a, self.hour_window)).count();
        let fast = failures.iter().filter(|a| within(a, self.fast_attack_window)).count();

        if minute >= self.max_per_minute {
            return SecurityAssessment::refused("Too many login attempts. Please wait a minute.", day);
        }
        if ip_hour >= self.max_per_hour {
            return SecurityAssessment::refused("Too many failed attempts from your IP. Please try again later.", day);
        }

        let (tier, delay) = if fast >= self.fast_attack_threshold {
            (Tier::Lockout, StdDuration::ZERO)
        } else if day <= self.tier1_max {
            (Tier::Normal, StdDuration::ZERO)
        } else if day <= self.tier2_max {
            (Tier::Warning, self.tier2_delay)
        } else if day <= self.tier3_max {
            (Tier::Elevated, self.tier3_delay)
        } else if day <= self.tier4_max {
            (Tier::Verification, self.tier4_delay)
        } else {
            (Tier::Lockout, StdDuration::ZERO)
        };

        let mut assessment = SecurityAssessment {
            allowed: true,
            tier,
            delay,
            message: "Invalid email or password.".to_string(),
            requires_verification: false,
            should_lock: false,
            failed_count: day,
        };
        match tier {
            Tier::Warning => {
                let remaining = self.tier2_max.saturating_sub(day);
                assessment.message = format!(
                    "Invalid email or password. {remaining} attempt(s) remaining before additional security measures."
                );
            }
            Tier::Verification => {
                assessment.requires_verification = true;
                assessment.message = "For your security, we need to verify your identity. A verification code has been sent to your email.".to_string();
            }
            Tier::Lockout => {
                assessment.should_lock = true;
                assessment.message = "Too many failed login attempts. Your account has been locked for 1 hour. Check your email for unlock instructions.".to_string();
            }
            Tier::Normal | Tier::Elevated => {}
        }
        assessment
    }

    pub fn new_lock(&self, email: &str, customer_id: Option<i64>, attempt_count: usize, ip_addresses: Vec<String>, now: DateTime<Utc>) -> AccountLock {
        AccountLock {
            id: 0,
            email: email.to_string(),
            customer_id,
            reason: failure_reason::TOO_MANY_ATTEMPTS.to_string(),
            attempt_count: attempt_count as i32,
            ip_addresses,
            locked_at: now,
            expires_at: now + self.lock_duration,
            unlock_token: generate_unlock_token(),
            unlock_token_expires: now + self.unlock_token_ttl,
            is_active: true,
            unlocked_at: None,
            unlocked_by: None,
        }
    }

    pub fn new_code(&self, email: &str, ip_address: &str, now: DateTime<Utc>) -> VerificationCode {
        VerificationCode {
            id: 0,
            email: email.to_string(),
            code: generate_code(self.code_length),
            ip_address: ip_address.to_string(),
            created_at: now,
            expires_at: now + self.code_ttl,
            attempts: 0,
            max_attempts: self.code_max_attempts,
            is_used: false,
        }
    }
}

/// Distinct IPs in order of first appearance.
pub fn distinct_ips(attempts: &[LoginAttempt]) -> Vec<String> {
    let mut ips: Vec<String> = Vec::new();
    for attempt in attempts {
        if !ips.contains(&attempt.ip_address) {
            ips.push(attempt.ip_address.clone());
        }
    }
    ips
}

fn generate_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| char::from(b'0' + rng.gen_range(0..10u8))).collect()
}

fn generate_unlock_token() -> String {
    let mut bytes = [0u8; 48];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LoginAttempt {
    pub id: i64,
    pub email: String,
    pub ip_address: String,
    pub user_agent: String,
    pub success: bool,
    pub failure_reason: String,
    pub security_tier: i16,
    pub response_time_ms: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AccountLock {
    pub id: i64,
    pub email: String,
    pub customer_id: Option<i64>,
    pub reason: String,
    pub attempt_count: i32,
    pub ip_addresses: Vec<String>,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub unlock_token: String,
    pub unlock_token_expires: DateTime<Utc>,
    pub is_active: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub unlocked_by: Option<String>,
}

impl AccountLock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool { now >= self.expires_at }

    pub fn minutes_remaining(&self, now: DateTime<Utc>) -> i64 {
        ((self.expires_at - now).num_seconds() / 60).max(1)
    }

    pub fn release(&mut self, by: &str, now: DateTime<Utc>) {
        self.is_active = false;
        self.unlocked_at = Some(now);
        self.unlocked_by = Some(by.to_string());
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct VerificationCode {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub code: String,
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub is_used: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeCheck { Verified, Expired, Exhausted, Wrong { remaining: i32 } }

impl CodeCheck {
    pub fn message(&self) -> String {
        match self {
            Self::Verified => "Verification successful".to_string(),
            Self::Expired => "Verification code expired. Please request a new one.".to_string(),
            Self::Exhausted => "Too many verification attempts. Please request a new code.".to_string(),
            Self::Wrong { remaining } => format!("Invalid code. {remaining} attempt(s) remaining."),
        }
    }
}

impl VerificationCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool { now > self.expires_at }

    /// Consumes one attempt unless the code is already dead.
    pub fn check(&mut self, input: &str, now: DateTime<Utc>) -> CodeCheck {
        if self.is_expired(now) { return CodeCheck::Expired; }
        if self.attempts >= self.max_attempts { return CodeCheck::Exhausted; }
        self.attempts += 1;
        if self.code == input.trim() {
            self.is_used = true;
            CodeCheck::Verified
        } else {
            CodeCheck::Wrong { remaining: self.max_attempts - self.attempts }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failures(now: DateTime<Utc>, ages_secs: &[i64], ip: &str) -> Vec<LoginAttempt> {
        ages_secs
            .iter()
            .enumerate()
            .map(|(i, age)| LoginAttempt {
                id: i as i64 + 1,
                email: "a@b.com".into(),
                ip_address: ip.into(),
                user_agent: String::new(),
                success: false,
                failure_reason: failure_reason::INVALID_CREDENTIALS.into(),
                security_tier: 1,
                response_time_ms: None,
                created_at: now - Duration::seconds(*age),
            })
            .collect()
    }

    /// Failures spread out enough to dodge the minute and fast-attack checks.
    fn spread(now: DateTime<Utc>, n: usize) -> Vec<LoginAttempt> {
        let ages: Vec<i64> = (0..n as i64).map(|i| 600 + i * 600).collect();
        failures(now, &ages, "1.1.1.1")
    }

    #[test]
    fn test_tiers_follow_daily_count() {
        let policy = SecurityPolicy::default();
        let now = Utc::now();
        let expect = [(0, Tier::Normal), (3, Tier::Normal), (4, Tier::Warning), (5, Tier::Warning),
            (6, Tier::Elevated), (8, Tier::Elevated), (9, Tier::Verification), (10, Tier::Verification), (11, Tier::Lockout)];
        for (count, tier) in expect {
            let a = policy.assess(now, "1.1.1.1", &spread(now, count));
            assert_eq!(a.tier, tier, "count {count}");
            assert!(a.allowed);
        }
    }

    #[test]
    fn test_tier_messages() {
        let policy = SecurityPolicy::default();
        let now = Utc::now();
        let warn = policy.assess(now, "1.1.1.1", &spread(now, 4));
        assert_eq!(warn.message, "Invalid email or password. 1 attempt(s) remaining before additional security measures.");
        assert_eq!(warn.delay, StdDuration::from_secs(2));
        let verify = policy.assess(now, "1.1.1.1", &spread(now, 9));
        assert!(verify.requires_verification);
        let lock = policy.assess(now, "1.1.1.1", &spread(now, 12));
        assert!(lock.should_lock);
        assert_eq!(lock.delay, StdDuration::ZERO);
    }

    #[test]
    fn test_failures_older_than_a_day_are_ignored() {
        let policy = SecurityPolicy::default();
        let now = Utc::now();
        let old = failures(now, &[90_000; 20], "1.1.1.1");
        assert_eq!(policy.assess(now, "1.1.1.1", &old).tier, Tier::Normal);
    }

    #[test]
    fn test_minute_limit_refuses() {
        let policy = SecurityPolicy::default();
        let now = Utc::now();
        let a = policy.assess(now, "1.1.1.1", &failures(now, &[1, 2, 3, 4, 5], "9.9.9.9"));
        assert!(!a.allowed);
        assert_eq!(a.message, "Too many login attempts. Please wait a minute.");
    }

    #[test]
    fn test_ip_hour_limit_only_counts_same_ip() {
        let mut policy = SecurityPolicy::default();
        policy.tier4_max = 100;
        let now = Utc::now();
        let ages: Vec<i64> = (0..30).map(|i| 120 + i * 100).collect();
        let same_ip = failures(now, &ages, "5.5.5.5");
        assert!(!policy.assess(now, "5.5.5.5", &same_ip).allowed);
        assert!(policy.assess(now, "6.6.6.6", &same_ip).allowed);
    }

    #[test]
    fn test_fast_attack_forces_lockout() {
        let policy = SecurityPolicy::default();
        let now = Utc::now();
        let ages: Vec<i64> = (0..10).map(|i| 61 + i * 5).collect();
        let a = policy.assess(now, "1.1.1.1", &failures(now, &ages, "1.1.1.1"));
        assert_eq!(a.tier, Tier::Lockout);
        assert!(a.should_lock);
    }

    #[test]
    fn test_lock_minutes_and_release() {
        let policy = SecurityPolicy::default();
        let now = Utc::now();
        let mut lock = policy.new_lock("a@b.com", None, 11, vec!["1.1.1.1".into()], now);
        assert_eq!(lock.unlock_token.len(), 64);
        assert_eq!(lock.minutes_remaining(now + Duration::seconds(30)), 59);
        assert_eq!(lock.minutes_remaining(now + Duration::seconds(3590)), 1);
        assert!(lock.is_expired(now + Duration::hours(1)));
        lock.release(unlocked_by::EMAIL_LINK, now);
        assert!(!lock.is_active);
        assert_eq!(policy.locked(5).message, "Account temporarily locked for security. Try again in 5 minute(s).");
    }

    #[test]
    fn test_verification_code_attempts() {
        let policy = SecurityPolicy::default();
        let now = Utc::now();
        let mut code = policy.new_code("a@b.com", "1.1.1.1", now);
        assert_eq!(code.code.len(), 6);
        assert!(code.code.chars().all(|c| c.is_ascii_digit()));
        let wrong = if code.code == "000000" { "111111" } else { "000000" };
        assert_eq!(code.check(wrong, now), CodeCheck::Wrong { remaining: 2 });
        assert_eq!(code.check(wrong, now).message(), "Invalid code. 1 attempt(s) remaining.");
        let right = code.code.clone();
        assert_eq!(code.check(&right, now), CodeCheck::Verified);
        assert!(code.is_used);
        assert_eq!(code.check(&right, now), CodeCheck::Exhausted);
    }

    #[test]
    fn test_expired_code() {
        let policy = SecurityPolicy::default();
        let now = Utc::now();
        let mut code = policy.new_code("a@b.com", "1.1.1.1", now - Duration::minutes(11));
        let input = code.code.clone();
        assert_eq!(code.check(&input, now), CodeCheck::Expired);
    }

    #[test]
    fn test_distinct_ips() {
        let now = Utc::now();
        let mut attempts = failures(now, &[1, 2], "1.1.1.1");
        attempts.extend(failures(now, &[3], "2.2.2.2"));
        assert_eq!(distinct_ips(&attempts), vec!["1.1.1.1".to_string(), "2.2.2.2".to_string()]);
    }
}
