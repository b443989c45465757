//! Order Aggregate

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

pub const DEFAULT_POSTAL_CODE: &str = "00000";
pub const DEFAULT_CITY: &str = "Unknown";
pub const DEFAULT_CANCEL_REASON: &str = "Customer requested cancellation";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOption { Express, Standard, Other }

impl DeliveryOption {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "express" => Self::Express,
            "standard" => Self::Standard,
            _ => Self::Other,
        }
    }

    pub fn shipping_cost(&self) -> Decimal {
        match self {
            Self::Express => Decimal::from(50_000),
            Self::Standard => Decimal::from(30_000),
            Self::Other => Decimal::ZERO,
        }
    }
}

/// Cash on delivery is settled at the door, so the order counts as paid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentMethod { CashOnDelivery, Deferred }

impl PaymentMethod {
    pub fn from_code(code: &str) -> Self {
        if code.trim().eq_ignore_ascii_case("cod") { Self::CashOnDelivery } else { Self::Deferred }
    }

    pub fn marks_paid(&self) -> bool { matches!(self, Self::CashOnDelivery) }
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Order {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub address: String,
    pub postal_code: String,
    pub city: String,
    pub paid: bool,
    pub delivery_option: String,
    pub payment_method: String,
    pub shipping_cost: Decimal,
    pub notes: String,
    pub cancellation_reason: Option<String>,
    pub cancellation_comment: Option<String>,
    pub cancellation_requested_at: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[sqlx(skip)]
    pub items: Vec<OrderItem>,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    /// Cleared when the product is deleted; the name stays.
    pub product_id: Option<i64>,
    pub product_name: String,
    pub price: Decimal,
    pub quantity: i32,
}

impl OrderItem {
    pub fn total(&self) -> Decimal { self.price * Decimal::from(self.quantity) }
}

impl Order {
    pub fn order_number(&self) -> String { format!("ORD-{:06}", self.id) }

    pub fn status(&self) -> &'static str {
        if self.cancellation_requested_at.is_some() {
            "cancellation_requested"
        } else if self.paid {
            "paid"
        } else {
            "pending"
        }
    }

    pub fn subtotal(&self) -> Decimal { self.items.iter().map(OrderItem::total).sum() }

    pub fn total(&self) -> Decimal { self.subtotal() + self.shipping_cost }

    pub fn request_cancellation(&mut self, reason: Option<&str>, comment: &str, now: DateTime<Utc>) {
        let reason = reason.map(str::trim).filter(|r| !r.is_empty()).unwrap_or(DEFAULT_CANCEL_REASON);
        self.cancellation_reason = Some(reason.to_string());
        self.cancellation_comment = Some(comment.to_string());
        self.cancellation_requested_at = Some(now);
        self.updated = now;
    }

    pub fn tracking(&self) -> TrackingInfo {
        let mut timeline = vec![TrackingEvent::new("pending", self.created, "Order placed", "Online Store")];
        if self.paid {
            timeline.push(TrackingEvent::new("paid", self.created, "Payment confirmed", "Payment Gateway"));
            timeline.push(TrackingEvent::new("processing", self.created + Duration::hours(2), "Order being prepared", "Warehouse"));
            timeline.push(TrackingEvent::new("shipped", self.created + Duration::days(1), "Order shipped", "Tehran Warehouse"));
            timeline.push(TrackingEvent::new("in_transit", self.created + Duration::days(2), "Out for delivery", "Local Delivery Center"));
        }
        TrackingInfo {
            order_id: self.id,
            order_number: self.order_number(),
            tracking_number: format!("TRK{:06}", self.id),
            status: if self.paid { "in_transit" } else { "pending" },
            current_location: if self.paid { "Local Delivery Center" } else { "Warehouse" },
            timeline,
            estimated_delivery: self.created + Duration::days(3),
            delivery_address: self.address.clone(),
            courier_info: CourierInfo { company: "Iran Post", service: "Standard Delivery", contact: "+98-21-1234-5678" },
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TrackingEvent {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub description: &'static str,
    pub location: &'static str,
}

impl TrackingEvent {
    fn new(status: &'static str, timestamp: DateTime<Utc>, description: &'static str, location: &'static str) -> Self {
        Self { status, timestamp, description, location }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CourierInfo {
    pub company: &'static str,
    pub service: &'static str,
    pub contact: &'static str,
}

#[derive(Clone, Debug, Serialize)]
pub struct TrackingInfo {
    pub order_id: i64,
    pub order_number: String,
    pub tracking_number: String,
    pub status: &'static str,
    pub current_location: &'static str,
    pub timeline: Vec<TrackingEvent>,
    pub estimated_delivery: DateTime<Utc>,
    pub delivery_address: String,
    pub courier_info: CourierInfo,
}

/// Splits a receiver name into first and last name.
pub fn split_name(receiver_name: &str) -> (String, String) {
    let mut words = receiver_name.split_whitespace();
    let first = words.next().unwrap_or_default().to_string();
    let last = words.collect::<Vec<_>>().join(" ");
    (first, last)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(paid: bool) -> Order {
        let now = Utc::now();
        Order {
            id: 42, first_name: "سارا".into(), last_name: "احمدی".into(), email: "sara@example.com".into(),
            address: "تهران".into(), postal_code: DEFAULT_POSTAL_CODE.into(), city: DEFAULT_CITY.into(), paid,
            delivery_option: "express".into(), payment_method: "cod".into(),
            shipping_cost: DeliveryOption::Express.shipping_cost(), notes: String::new(),
            cancellation_reason: None, cancellation_comment: None, cancellation_requested_at: None,
            created: now, updated: now,
            items: vec![
                OrderItem { id: 1, order_id: 42, product_id: Some(1), product_name: "کفش".into(), price: Decimal::from(200_000), quantity: 2 },
                OrderItem { id: 2, order_id: 42, product_id: None, product_name: "کیف".into(), price: Decimal::from(100_000), quantity: 1 },
            ],
        }
    }

    #[test]
    fn test_totals_include_shipping() {
        let o = order(true);
        assert_eq!(o.order_number(), "ORD-000042");
        assert_eq!(o.subtotal(), Decimal::from(500_000));
        assert_eq!(o.total(), Decimal::from(550_000));
    }

    #[test]
    fn test_tracking_timeline() {
        let paid = order(true).tracking();
        assert_eq!(paid.tracking_number, "TRK000042");
        assert_eq!(paid.timeline.len(), 5);
        assert_eq!(paid.status, "in_transit");
        let pending = order(false).tracking();
        assert_eq!(pending.timeline.len(), 1);
        assert_eq!(pending.current_location, "Warehouse");
    }

    #[test]
    fn test_cancellation_request() {
        let mut o = order(false);
        o.request_cancellation(Some("  "), "changed my mind", Utc::now());
        assert_eq!(o.status(), "cancellation_requested");
        assert_eq!(o.cancellation_reason.as_deref(), Some(DEFAULT_CANCEL_REASON));
    }

    #[test]
    fn test_options() {
        assert_eq!(DeliveryOption::from_code("standard").shipping_cost(), Decimal::from(30_000));
        assert_eq!(DeliveryOption::from_code("pickup").shipping_cost(), Decimal::ZERO);
        assert!(PaymentMethod::from_code("cod").marks_paid());
        assert!(!PaymentMethod::from_code("online").marks_paid());
        assert_eq!(split_name("علی  رضا  محمدی"), ("علی".to_string(), "رضا محمدی".to_string()));
    }
}
