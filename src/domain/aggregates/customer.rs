//! Customer Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::Email;

text_enum!(LoginMethod {
    Email => "email",
    Google => "google",
    Other => "other",
});

pub const MAX_ADDRESSES: usize = 3;
pub const LISTED_ADDRESSES: usize = 4;
pub const DEFAULT_COUNTRY: &str = "ایران";
/// How long a password reset link stays usable.
pub const PASSWORD_RESET_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Customer {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_email_verified: bool,
    #[serde(skip_serializing)]
    pub email_verification_token: Uuid,
    #[serde(skip_serializing)]
    pub password_reset_token: Option<Uuid>,
    #[serde(skip_serializing)]
    pub password_reset_sent_at: Option<DateTime<Utc>>,
    pub token_version: i32,
    #[sqlx(try_from = "String")]
    pub login_method: LoginMethod,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn full_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() { self.username.clone() } else { name.to_string() }
    }

    /// Every issued token carries the version; bumping it invalidates them all.
    pub fn bump_token_version(&mut self) {
        self.token_version += 1;
        self.updated_at = Utc::now();
    }

    /// Issues a new reset token, replacing any earlier one.
    pub fn start_password_reset(&mut self, now: DateTime<Utc>) -> Uuid {
        let token = Uuid::new_v4();
        self.password_reset_token = Some(token);
        self.password_reset_sent_at = Some(now);
        self.updated_at = now;
        token
    }

    pub fn password_reset_expired(&self, now: DateTime<Utc>) -> bool {
        self.password_reset_sent_at
            .map_or(true, |sent| sent < now - chrono::Duration::hours(PASSWORD_RESET_TTL_HOURS))
    }

    pub fn clear_password_reset(&mut self) {
        self.password_reset_token = None;
        self.password_reset_sent_at = None;
        self.updated_at = Utc::now();
    }

    pub fn mark_email_verified(&mut self) -> bool {
        if self.is_email_verified { return false; }
        self.is_email_verified = true;
        self.is_active = true;
        self.updated_at = Utc::now();
        true
    }
}

/// Username base derived from the email local part.
pub fn username_base(email: &Email) -> String {
    let base: String = email
        .local_part()
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-' | '+'))
        .collect();
    if base.is_empty() { "user".to_string() } else { base }
}

/// Candidate usernames in order: `base`, `base1`, `base2`, ...
pub fn username_candidates(base: &str) -> impl Iterator<Item = String> + '_ {
    std::iter::once(base.to_string()).chain((1..).map(move |n| format!("{base}{n}")))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AddressFields {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub receiver_name: String,
    #[serde(default)]
    pub street_address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default, alias = "state")]
    pub province: String,
    #[serde(default, alias = "unit")]
    pub vahed: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default)]
    pub postal_code: String,
}

fn default_country() -> String { DEFAULT_COUNTRY.to_string() }

impl AddressFields {
    /// Whitespace-insensitive comparison used to avoid storing the same address twice.
    pub fn same_place(&self, other: &AddressFields) -> bool {
        let norm = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        [
            (&self.receiver_name, &other.receiver_name),
            (&self.street_address, &other.street_address),
            (&self.city, &other.city),
            (&self.province, &other.province),
            (&self.vahed, &other.vahed),
            (&self.phone, &other.phone),
            (&self.country, &other.country),
            (&self.postal_code, &other.postal_code),
        ]
        .iter()
        .all(|(a, b)| norm(a) == norm(b))
    }

    /// Name of the first required field left blank.
    pub fn missing_required(&self) -> Option<&'static str> {
        [
            ("street_address", &self.street_address),
            ("city", &self.city),
            ("phone", &self.phone),
            ("receiver_name", &self.receiver_name),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }

    pub fn full_address(&self) -> String {
        let unit = (!self.vahed.trim().is_empty()).then(|| format!("واحد {}", self.vahed.trim()));
        let phone = (!self.phone.trim().is_empty()).then(|| format!("تلفن {}", self.phone.trim()));
        [
            Some(self.receiver_name.trim().to_string()),
            Some(self.street_address.trim().to_string()),
            unit,
            Some(self.city.trim().to_string()),
            Some(self.province.trim().to_string()),
            Some(self.country.trim().to_string()),
            Some(self.postal_code.trim().to_string()),
            phone,
        ]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Address {
    pub id: i64,
    pub customer_id: i64,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub fields: AddressFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Address {
    pub fn full_address(&self) -> String { self.fields.full_address() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> AddressFields {
        AddressFields {
            label: "Home".into(),
            receiver_name: "سارا احمدی".into(),
            street_address: "خیابان ولیعصر، پلاک ۱۲".into(),
            city: "تهران".into(),
            province: "تهران".into(),
            vahed: "4".into(),
            phone: "09120000000".into(),
            country: DEFAULT_COUNTRY.into(),
            postal_code: "1234567890".into(),
        }
    }

    #[test]
    fn test_full_address() {
        let full = fields().full_address();
        assert_eq!(full, "سارا احمدی, خیابان ولیعصر، پلاک ۱۲, واحد 4, تهران, تهران, ایران, 1234567890, تلفن 09120000000");
        let mut bare = fields();
        bare.vahed.clear();
        bare.phone.clear();
        bare.province.clear();
        assert!(!bare.full_address().contains("واحد"));
        assert!(!bare.full_address().contains("تلفن"));
    }

    #[test]
    fn test_same_place_ignores_label_and_spacing() {
        let a = fields();
        let mut b = fields();
        b.label = "Work".into();
        b.street_address = " خیابان  ولیعصر، پلاک ۱۲ ".into();
        assert!(a.same_place(&b));
        b.city = "شیراز".into();
        assert!(!a.same_place(&b));
    }

    #[test]
    fn test_username_candidates() {
        let email = Email::new("reza+shop@example.com").unwrap();
        let base = username_base(&email);
        let names: Vec<_> = username_candidates(&base).take(3).collect();
        assert_eq!(names, vec!["reza+shop", "reza+shop1", "reza+shop2"]);
    }

    #[test]
    fn test_login_method_codes() {
        assert_eq!("google".parse::<LoginMethod>().unwrap(), LoginMethod::Google);
        assert!("facebook".parse::<LoginMethod>().is_err());
    }
}
