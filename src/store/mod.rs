//! Persistence ports.
//!
//! Each aggregate family gets its own async trait; [`Store`] bundles them so
//! handlers can hold a single `Arc<dyn Store>`. Two backends exist:
//! [`postgres::PgStore`] for deployments and [`memory::MemoryStore`] for tests
//! and `STORE=memory` runs.
//!
//! Insert methods take the entity with `id: 0` and return it with the
//! assigned id.

pub mod memory;
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{
    AccountLock, Address, AttributeValue, Cart, CartOwner, Category, CategoryAttribute, Customer, DeletedProduct,
    LineChange, LoginAttempt, Order, Product, ProductAttributeValue, ProductVariant, SpecialOffer,
    SpecialOfferProduct, UserSession, VerificationCode, WishlistEntry,
};
use crate::Result;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const MAX_PER_PAGE: u32 = 100;

/// One page of results plus the unpaged total.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub results: Vec<T>,
    pub count: i64,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProductOrdering {
    #[default]
    Newest,
    PriceAsc,
    PriceDesc,
    Name,
}

impl ProductOrdering {
    pub fn from_param(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("price_asc") => Self::PriceAsc,
            Some("price_desc") => Self::PriceDesc,
            Some("name") => Self::Name,
            _ => Self::Newest,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProductFilter {
    /// Restrict to these categories; `None` means all.
    pub category_ids: Option<Vec<i64>>,
    pub query: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub new_arrivals: bool,
    pub special_offers: bool,
    pub include_inactive: bool,
    /// `(key, normalized value)` pairs that must all match.
    pub attributes: Vec<(String, String)>,
    pub tag: Option<String>,
    pub exclude_id: Option<i64>,
    pub ordering: ProductOrdering,
    pub page: u32,
    pub per_page: u32,
}

impl Default for ProductFilter {
    fn default() -> Self {
        Self {
            category_ids: None,
            query: None,
            min_price: None,
            max_price: None,
            new_arrivals: false,
            special_offers: false,
            include_inactive: false,
            attributes: vec![],
            tag: None,
            exclude_id: None,
            ordering: ProductOrdering::Newest,
            page: 1,
            per_page: 20,
        }
    }
}

impl ProductFilter {
    pub fn offset(&self) -> i64 { i64::from(self.page.max(1) - 1) * i64::from(self.per_page()) }
    pub fn per_page(&self) -> u32 { self.per_page.clamp(1, MAX_PER_PAGE) }
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub paid: Option<bool>,
    /// Matches name, email, city or the numeric id.
    pub search: Option<String>,
    pub page: u32,
    pub per_page: u32,
}

impl OrderFilter {
    pub fn offset(&self) -> i64 { i64::from(self.page.max(1) - 1) * i64::from(self.per_page()) }
    pub fn per_page(&self) -> u32 { if self.per_page == 0 { 20 } else { self.per_page.min(MAX_PER_PAGE) } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferCounter { Views, Clicks }

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fails with `Conflict` when the email or username is taken.
    async fn insert_customer(&self, customer: Customer) -> Result<Customer>;
    async fn customer(&self, id: i64) -> Result<Option<Customer>>;
    async fn customer_by_email(&self, email: &str) -> Result<Option<Customer>>;
    async fn customer_by_verification_token(&self, token: Uuid) -> Result<Option<Customer>>;
    async fn customer_by_reset_token(&self, token: Uuid) -> Result<Option<Customer>>;
    async fn username_taken(&self, username: &str) -> Result<bool>;
    async fn update_customer(&self, customer: &Customer) -> Result<()>;
    /// Removes the customer with their addresses, sessions, cart and wishlist.
    async fn delete_customer(&self, id: i64) -> Result<()>;

    /// Newest first.
    async fn addresses(&self, customer_id: i64) -> Result<Vec<Address>>;
    async fn insert_address(&self, address: Address) -> Result<Address>;
    async fn update_address(&self, address: &Address) -> Result<()>;
    async fn delete_address(&self, customer_id: i64, id: i64) -> Result<bool>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: UserSession) -> Result<UserSession>;
    async fn update_session(&self, session: &UserSession) -> Result<()>;
    async fn session(&self, id: i64) -> Result<Option<UserSession>>;
    async fn session_by_key(&self, session_key: &str) -> Result<Option<UserSession>>;
    async fn session_by_refresh_jti(&self, jti: &str) -> Result<Option<UserSession>>;
    async fn active_session_for_device(&self, customer_id: i64, device_id: &str) -> Result<Option<UserSession>>;
    /// Most recently active first.
    async fn active_sessions(&self, customer_id: i64) -> Result<Vec<UserSession>>;
    /// Revokes every active session of the customer except `keep`; returns how many.
    async fn revoke_sessions(&self, customer_id: i64, keep: Option<i64>, reason: &str, now: DateTime<Utc>) -> Result<u64>;
    /// Deactivates sessions past their expiry.
    async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait SecurityStore: Send + Sync {
    async fn record_attempt(&self, attempt: LoginAttempt) -> Result<LoginAttempt>;
    /// Failed attempts for the email since `since`, newest first.
    async fn failed_attempts(&self, email: &str, since: DateTime<Utc>) -> Result<Vec<LoginAttempt>>;
    /// Every attempt since `since`, newest first.
    async fn attempts_since(&self, since: DateTime<Utc>) -> Result<Vec<LoginAttempt>>;
    /// Rewrites the email and user agent of past attempts.
    async fn anonymize_attempts(&self, email: &str, replacement: &str) -> Result<u64>;

    async fn active_lock(&self, email: &str) -> Result<Option<AccountLock>>;
    async fn lock_by_token(&self, token: &str) -> Result<Option<AccountLock>>;
    async fn insert_lock(&self, lock: AccountLock) -> Result<AccountLock>;
    async fn update_lock(&self, lock: &AccountLock) -> Result<()>;
    async fn active_locks(&self) -> Result<Vec<AccountLock>>;
    async fn delete_locks(&self, email: &str) -> Result<()>;

    /// Stores a fresh code and marks older unused codes for the email used.
    async fn insert_code(&self, code: VerificationCode) -> Result<VerificationCode>;
    /// Newest unused code.
    async fn latest_code(&self, email: &str) -> Result<Option<VerificationCode>>;
    async fn update_code(&self, code: &VerificationCode) -> Result<()>;
    async fn codes_created_since(&self, email: &str, since: DateTime<Utc>) -> Result<i64>;
    async fn delete_codes(&self, email: &str) -> Result<()>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn categories(&self) -> Result<Vec<Category>>;
    async fn category(&self, id: i64) -> Result<Option<Category>>;
    async fn insert_category(&self, category: Category) -> Result<Category>;
    async fn update_category(&self, category: &Category) -> Result<()>;
    /// Children are detached, products lose their category.
    async fn delete_category(&self, id: i64) -> Result<bool>;

    /// Ordered by display order.
    async fn attributes(&self, category_id: i64) -> Result<Vec<CategoryAttribute>>;
    async fn attribute(&self, id: i64) -> Result<Option<CategoryAttribute>>;
    async fn attribute_by_key(&self, category_id: i64, key: &str) -> Result<Option<CategoryAttribute>>;
    async fn insert_attribute(&self, attribute: CategoryAttribute) -> Result<CategoryAttribute>;
    async fn update_attribute(&self, attribute: &CategoryAttribute) -> Result<()>;
    async fn delete_attribute(&self, id: i64) -> Result<bool>;

    async fn values(&self, attribute_id: i64) -> Result<Vec<AttributeValue>>;
    async fn value(&self, id: i64) -> Result<Option<AttributeValue>>;
    async fn insert_value(&self, value: AttributeValue) -> Result<AttributeValue>;
    async fn update_value(&self, value: &AttributeValue) -> Result<()>;
    async fn delete_value(&self, id: i64) -> Result<bool>;

    async fn products(&self, filter: &ProductFilter) -> Result<Page<Product>>;
    async fn product(&self, id: i64) -> Result<Option<Product>>;
    async fn products_by_ids(&self, ids: &[i64]) -> Result<Vec<Product>>;
    /// Active product count per category id.
    async fn product_counts(&self) -> Result<HashMap<i64, i64>>;
    /// `(tag, active product count)`, most used first.
    async fn tag_counts(&self, limit: i64) -> Result<Vec<(String, i64)>>;
    async fn insert_product(&self, product: Product) -> Result<Product>;
    async fn update_product(&self, product: &Product) -> Result<()>;
    async fn set_special_offer_flag(&self, product_id: i64, flagged: bool) -> Result<()>;
    /// Writes the audit record, then removes the product.
    async fn delete_product(&self, id: i64, record: DeletedProduct) -> Result<()>;

    async fn product_attribute_values(&self, product_id: i64) -> Result<Vec<ProductAttributeValue>>;
    /// Insert or replace the value for `(product_id, key)`.
    async fn upsert_product_attribute_value(&self, value: ProductAttributeValue) -> Result<ProductAttributeValue>;
    /// Drops values whose key is not in `keep`; returns how many.
    async fn retain_product_attribute_values(&self, product_id: i64, keep: &[String]) -> Result<u64>;

    async fn variants(&self, product_id: i64) -> Result<Vec<ProductVariant>>;
    async fn variant(&self, id: i64) -> Result<Option<ProductVariant>>;
    async fn insert_variant(&self, variant: ProductVariant) -> Result<ProductVariant>;
    async fn update_variant(&self, variant: &ProductVariant) -> Result<()>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
    /// The owner's cart with its items.
    async fn cart_for(&self, owner: &CartOwner) -> Result<Option<Cart>>;
    async fn create_cart(&self, cart: Cart) -> Result<Cart>;
    async fn apply_line_change(&self, cart_id: i64, change: LineChange, now: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts the order with its items and empties the cart in one unit.
    async fn place_order(&self, order: Order, cart_id: i64) -> Result<Order>;
    async fn order(&self, id: i64) -> Result<Option<Order>>;
    /// Newest first.
    async fn orders_by_email(&self, email: &str) -> Result<Vec<Order>>;
    async fn list_orders(&self, filter: &OrderFilter) -> Result<Page<Order>>;
    async fn all_orders(&self) -> Result<Vec<Order>>;
    async fn update_order(&self, order: &Order) -> Result<()>;
}

#[async_trait]
pub trait WishlistStore: Send + Sync {
    /// Newest first.
    async fn wishlist(&self, customer_id: i64) -> Result<Vec<WishlistEntry>>;
    async fn wishlist_entry(&self, customer_id: i64, product_id: i64) -> Result<Option<WishlistEntry>>;
    /// Insert, or update the existing `(customer, product)` row.
    async fn upsert_wishlist(&self, entry: WishlistEntry) -> Result<WishlistEntry>;
    async fn delete_wishlist(&self, customer_id: i64, product_id: i64) -> Result<bool>;
}

#[async_trait]
pub trait OfferStore: Send + Sync {
    /// By display order, then newest.
    async fn offers(&self) -> Result<Vec<SpecialOffer>>;
    async fn offer(&self, id: i64) -> Result<Option<SpecialOffer>>;
    async fn insert_offer(&self, offer: SpecialOffer) -> Result<SpecialOffer>;
    async fn update_offer(&self, offer: &SpecialOffer) -> Result<()>;
    async fn delete_offer(&self, id: i64) -> Result<bool>;
    async fn increment_offer_counter(&self, id: i64, counter: OfferCounter) -> Result<()>;

    /// By display order.
    async fn offer_products(&self, offer_id: i64) -> Result<Vec<SpecialOfferProduct>>;
    async fn offer_links_for_product(&self, product_id: i64) -> Result<Vec<SpecialOfferProduct>>;
    /// Insert, or update the existing `(offer, product)` row.
    async fn upsert_offer_product(&self, link: SpecialOfferProduct) -> Result<SpecialOfferProduct>;
    async fn delete_offer_product(&self, offer_id: i64, product_id: i64) -> Result<bool>;
}

pub trait Store:
    AccountStore + SessionStore + SecurityStore + CatalogStore + CartStore + OrderStore + WishlistStore + OfferStore
{
}

impl<T> Store for T where
    T: AccountStore + SessionStore + SecurityStore + CatalogStore + CartStore + OrderStore + WishlistStore + OfferStore
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paging_clamps() {
        let f = ProductFilter { page: 3, per_page: 500, ..Default::default() };
        assert_eq!(f.per_page(), 100);
        assert_eq!(f.offset(), 200);
        let o = OrderFilter::default();
        assert_eq!(o.per_page(), 20);
        assert_eq!(o.offset(), 0);
    }

    #[test]
    fn test_ordering_param() {
        assert_eq!(ProductOrdering::from_param(Some("price_desc")), ProductOrdering::PriceDesc);
        assert_eq!(ProductOrdering::from_param(Some("bogus")), ProductOrdering::Newest);
        assert_eq!(ProductOrdering::from_param(None), ProductOrdering::Newest);
    }
}
