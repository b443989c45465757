//! Wishlist entries

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

text_enum!(Priority {
    Low => "low",
    Medium => "medium",
    High => "high",
});

impl Priority {
    pub fn label_fa(&self) -> &'static str {
        match self {
            Self::Low => "کم",
            Self::Medium => "متوسط",
            Self::High => "زیاد",
        }
    }
}

/// One (customer, product) pair.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct WishlistEntry {
    pub id: i64,
    pub customer_id: i64,
    pub product_id: i64,
    pub notes: Option<String>,
    pub priority: Option<String>,
    pub reminder_date: Option<NaiveDate>,
    pub quantity: i32,
    pub is_public: bool,
    pub tags: Vec<String>,
    pub gift_message: Option<String>,
    pub estimated_budget: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl WishlistEntry {
    pub fn new(customer_id: i64, product_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: 0, customer_id, product_id, notes: None, priority: None, reminder_date: None, quantity: 1,
            is_public: false, tags: vec![], gift_message: None, estimated_budget: None, created_at: now,
        }
    }

    pub fn priority(&self) -> Option<Priority> { self.priority.as_deref().and_then(|p| p.parse().ok()) }

    /// Persian label, falling back to the raw code.
    pub fn priority_display_fa(&self) -> Option<String> {
        let raw = self.priority.as_deref()?;
        Some(raw.parse::<Priority>().map(|p| p.label_fa().to_string()).unwrap_or_else(|_| raw.to_string()))
    }

    pub fn is_reminder_due(&self, today: NaiveDate) -> bool {
        self.reminder_date.map_or(false, |d| d <= today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_labels() {
        let mut e = WishlistEntry::new(1, 2, Utc::now());
        assert_eq!(e.priority_display_fa(), None);
        e.priority = Some("high".into());
        assert_eq!(e.priority(), Some(Priority::High));
        assert_eq!(e.priority_display_fa().as_deref(), Some("زیاد"));
    }

    #[test]
    fn test_reminder_due() {
        let mut e = WishlistEntry::new(1, 2, Utc::now());
        let today = NaiveDate::from_ymd_opt(2024, 3, 20).unwrap();
        assert!(!e.is_reminder_due(today));
        e.reminder_date = NaiveDate::from_ymd_opt(2024, 3, 20);
        assert!(e.is_reminder_due(today));
        e.reminder_date = NaiveDate::from_ymd_opt(2024, 3, 21);
        assert!(!e.is_reminder_due(today));
    }
}
