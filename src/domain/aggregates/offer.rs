//! Special offers and the products they discount

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

text_enum!(OfferType {
    FlashSale => "flash_sale",
    Bundle => "bundle",
    Discount => "discount",
    FreeShipping => "free_shipping",
    Coupon => "coupon",
    Seasonal => "seasonal",
    Clearance => "clearance",
});

text_enum!(DisplayStyle {
    HeroBanner => "hero_banner",
    Carousel => "carousel",
    Grid => "grid",
    Sidebar => "sidebar",
    Popup => "popup",
});

text_enum!(ActionType {
    Product => "product",
    Category => "category",
    Search => "search",
    External => "external",
    None => "none",
});

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct SpecialOffer {
    pub id: i64,
    pub title: String,
    pub description: String,
    #[sqlx(try_from = "String")]
    pub offer_type: OfferType,
    #[sqlx(try_from = "String")]
    pub display_style: DisplayStyle,
    #[sqlx(try_from = "String")]
    pub banner_action_type: ActionType,
    pub banner_action_target: String,
    pub banner_external_url: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub is_active: bool,
    pub display_order: i32,
    pub views_count: i64,
    pub clicks_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SpecialOffer {
    pub fn is_currently_valid(&self, now: DateTime<Utc>) -> bool {
        self.enabled
            && self.is_active
            && self.valid_from <= now
            && self.valid_until.map_or(true, |until| now <= until)
    }

    /// Seconds left; `None` for open-ended offers.
    pub fn remaining_time(&self, now: DateTime<Utc>) -> Option<i64> {
        self.valid_until.map(|until| (until - now).num_seconds().max(0))
    }
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct SpecialOfferProduct {
    pub id: i64,
    pub offer_id: i64,
    pub product_id: i64,
    pub discount_percentage: i32,
    pub discount_amount: Decimal,
    pub original_price: Decimal,
    pub discounted_price: Decimal,
    pub display_order: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl SpecialOfferProduct {
    /// Fills the original price from the product when unset and recomputes the discounted price.
    pub fn price(&mut self, product_price: Decimal) {
        if self.original_price <= Decimal::ZERO {
            self.original_price = product_price;
        }
        self.discounted_price = if self.discount_percentage > 0 {
            let pct = Decimal::from(self.discount_percentage.min(100));
            self.original_price * (Decimal::ONE - pct / Decimal::ONE_HUNDRED)
        } else if self.discount_amount > Decimal::ZERO {
            (self.original_price - self.discount_amount).max(Decimal::ZERO)
        } else {
            self.original_price
        };
    }

    pub fn discount_display(&self) -> String {
        if self.discount_percentage > 0 {
            format!("{}% تخفیف", self.discount_percentage)
        } else if self.discount_amount > Decimal::ZERO {
            format!("{} تومان تخفیف", self.discount_amount.normalize())
        } else {
            "بدون تخفیف".to_string()
        }
    }
}

/// A product carries the special-offer flag iff this holds for one of its offer rows.
pub fn flags_product(link: &SpecialOfferProduct, offer: &SpecialOffer, now: DateTime<Utc>) -> bool {
    link.is_active && offer.is_currently_valid(now)
}
