//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Account(AccountEvent),
    Order(OrderEvent),
    Catalog(CatalogEvent),
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AccountEvent {
    Registered { customer_id: i64, email: String },
    EmailVerified { customer_id: i64 },
    PasswordReset { customer_id: i64 },
    Locked { email: String, attempt_count: i32 },
    Unlocked { email: String, unlocked_by: String },
    Deleted { customer_id: i64 },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: i64, email: String, total: Decimal },
    PaidChanged { order_id: i64, paid: bool },
    CancellationRequested { order_id: i64, reason: String },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CatalogEvent {
    ProductDeleted { product_id: i64, name: String },
    SpecialOfferFlagsSynced { product_ids: Vec<i64> },
}

impl DomainEvent {
    /// NATS subject, `myshop.<aggregate>.<event>`.
    pub fn subject(&self) -> String {
        let (aggregate, event) = match self {
            Self::Account(e) => ("account", match e {
                AccountEvent::Registered { .. } => "registered",
                AccountEvent::EmailVerified { .. } => "email_verified",
                AccountEvent::PasswordReset { .. } => "password_reset",
                AccountEvent::Locked { .. } => "locked",
                AccountEvent::Unlocked { .. } => "unlocked",
                AccountEvent::Deleted { .. } => "deleted",
            }),
            Self::Order(e) => ("order", match e {
                OrderEvent::Placed { .. } => "placed",
                OrderEvent::PaidChanged { .. } => "paid_changed",
                OrderEvent::CancellationRequested { .. } => "cancellation_requested",
            }),
            Self::Catalog(e) => ("catalog", match e {
                CatalogEvent::ProductDeleted { .. } => "product_deleted",
                CatalogEvent::SpecialOfferFlagsSynced { .. } => "special_offer_flags_synced",
            }),
        };
        format!("myshop.{aggregate}.{event}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_and_payload() {
        let e = DomainEvent::Order(OrderEvent::Placed { order_id: 7, email: "a@b.c".into(), total: Decimal::from(10) });
        assert_eq!(e.subject(), "myshop.order.placed");
        let body = serde_json::to_value(&e).unwrap();
        assert_eq!(body["type"], "order");
        assert_eq!(body["event"], "placed");
        assert_eq!(body["order_id"], 7);
    }
}
