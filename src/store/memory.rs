//! In-memory store backing tests and `STORE=memory` runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AccountStore, CartStore, CatalogStore, OfferCounter, OfferStore, OrderFilter, OrderStore, Page, ProductFilter,
    ProductOrdering, SecurityStore, SessionStore, WishlistStore,
};
use crate::domain::aggregates::{
    AccountLock, Address, AttributeValue, Cart, CartItem, CartOwner, Category, CategoryAttribute, Customer,
    DeletedProduct, LineChange, LoginAttempt, Order, Product, ProductAttributeValue, ProductVariant, SpecialOffer,
    SpecialOfferProduct, UserSession, VerificationCode, WishlistEntry,
};
use crate::{Result, ShopError};

#[derive(Default)]
struct Inner {
    last_id: i64,
    customers: BTreeMap<i64, Customer>,
    addresses: BTreeMap<i64, Address>,
    sessions: BTreeMap<i64, UserSession>,
    attempts: Vec<LoginAttempt>,
    locks: BTreeMap<i64, AccountLock>,
    codes: BTreeMap<i64, VerificationCode>,
    categories: BTreeMap<i64, Category>,
    attributes: BTreeMap<i64, CategoryAttribute>,
    values: BTreeMap<i64, AttributeValue>,
    products: BTreeMap<i64, Product>,
    product_values: BTreeMap<i64, ProductAttributeValue>,
    variants: BTreeMap<i64, ProductVariant>,
    deleted_products: Vec<DeletedProduct>,
    carts: BTreeMap<i64, Cart>,
    orders: BTreeMap<i64, Order>,
    wishlist: BTreeMap<i64, WishlistEntry>,
    offers: BTreeMap<i64, SpecialOffer>,
    offer_products: BTreeMap<i64, SpecialOfferProduct>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }
}

fn conflict(what: &str) -> ShopError { ShopError::Conflict(format!("{what} already exists")) }

/// Thread-safe store over `Arc<RwLock<..>>`; clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    /// Audit rows written by product deletion.
    pub async fn deleted_products(&self) -> Vec<DeletedProduct> { self.inner.read().await.deleted_products.clone() }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert_customer(&self, mut customer: Customer) -> Result<Customer> {
        let mut db = self.inner.write().await;
        if db.customers.values().any(|c| c.email == customer.email) {
            return Err(conflict("A customer with this email"));
        }
        if db.customers.values().any(|c| c.username == customer.username) {
            return Err(conflict("A customer with this username"));
        }
        customer.id = db.next_id();
        db.customers.insert(customer.id, customer.clone());
        Ok(customer)
    }

    async fn customer(&self, id: i64) -> Result<Option<Customer>> { Ok(self.inner.read().await.customers.get(&id).cloned()) }

    async fn customer_by_email(&self, email: &str) -> Result<Option<Customer>> {
        Ok(self.inner.read().await.customers.values().find(|c| c.email == email).cloned())
    }

    async fn customer_by_verification_token(&self, token: Uuid) -> Result<Option<Customer>> {
        Ok(self.inner.read().await.customers.values().find(|c| c.email_verification_token == token).cloned())
    }

    async fn customer_by_reset_token(&self, token: Uuid) -> Result<Option<Customer>> {
        Ok(self.inner.read().await.customers.values().find(|c| c.password_reset_token == Some(token)).cloned())
    }

    async fn username_taken(&self, username: &str) -> Result<bool> {
        Ok(self.inner.read().await.customers.values().any(|c| c.username == username))
    }

    async fn update_customer(&self, customer: &Customer) -> Result<()> {
        let mut db = self.inner.write().await;
        match db.customers.get_mut(&customer.id) {
            Some(slot) => {
                *slot = customer.clone();
                Ok(())
            }
            None => Err(ShopError::NotFound("Customer")),
        }
    }

    async fn delete_customer(&self, id: i64) -> Result<()> {
        let mut db = self.inner.write().await;
        db.customers.remove(&id);
        db.addresses.retain(|_, a| a.customer_id != id);
        db.sessions.retain(|_, s| s.customer_id != id);
        db.carts.retain(|_, c| c.customer_id != Some(id));
        db.wishlist.retain(|_, w| w.customer_id != id);
        Ok(())
    }

    async fn addresses(&self, customer_id: i64) -> Result<Vec<Address>> {
        let db = self.inner.read().await;
        let mut out: Vec<Address> = db.addresses.values().filter(|a| a.customer_id == customer_id).cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    async fn insert_address(&self, mut address: Address) -> Result<Address> {
        let mut db = self.inner.write().await;
        address.id = db.next_id();
        db.addresses.insert(address.id, address.clone());
        Ok(address)
    }

    async fn update_address(&self, address: &Address) -> Result<()> {
        let mut db = self.inner.write().await;
        match db.addresses.get_mut(&address.id) {
            Some(slot) => {
                *slot = address.clone();
                Ok(())
            }
            None => Err(ShopError::NotFound("Address")),
        }
    }

    async fn delete_address(&self, customer_id: i64, id: i64) -> Result<bool> {
        let mut db = self.inner.write().await;
        let owned = db.addresses.get(&id).map_or(false, |a| a.customer_id == customer_id);
        if owned {
            db.addresses.remove(&id);
        }
        Ok(owned)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, mut session: UserSession) -> Result<UserSession> {
        let mut db = self.inner.write().await;
        if db.sessions.values().any(|s| s.session_key == session.session_key) {
            return Err(conflict("Session"));
        }
        session.id = db.next_id();
        db.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn update_session(&self, session: &UserSession) -> Result<()> {
        let mut db = self.inner.write().await;
        match db.sessions.get_mut(&session.id) {
            Some(slot) => {
                *slot = session.clone();
                Ok(())
            }
            None => Err(ShopError::NotFound("Session")),
        }
    }

    async fn session(&self, id: i64) -> Result<Option<UserSession>> { Ok(self.inner.read().await.sessions.get(&id).cloned()) }

    async fn session_by_key(&self, session_key: &str) -> Result<Option<UserSession>> {
        Ok(self.inner.read().await.sessions.values().find(|s| s.session_key == session_key).cloned())
    }

    async fn session_by_refresh_jti(&self, jti: &str) -> Result<Option<UserSession>> {
        Ok(self.inner.read().await.sessions.values().find(|s| s.refresh_jti == jti).cloned())
    }

    async fn active_session_for_device(&self, customer_id: i64, device_id: &str) -> Result<Option<UserSession>> {
        Ok(self
            .inner
            .read()
            .await
            .sessions
            .values()
            .filter(|s| s.customer_id == customer_id && s.is_active && s.device_id == device_id)
            .max_by_key(|s| s.last_activity)
            .cloned())
    }

    async fn active_sessions(&self, customer_id: i64) -> Result<Vec<UserSession>> {
        let db = self.inner.read().await;
        let mut out: Vec<UserSession> =
            db.sessions.values().filter(|s| s.customer_id == customer_id && s.is_active).cloned().collect();
        out.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(out)
    }

    async fn revoke_sessions(&self, customer_id: i64, keep: Option<i64>, reason: &str, now: DateTime<Utc>) -> Result<u64> {
        let mut db = self.inner.write().await;
        let mut count = 0;
        for s in db.sessions.values_mut() {
            if s.customer_id == customer_id && s.is_active && Some(s.id) != keep {
                s.revoke(reason, now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut db = self.inner.write().await;
        let mut count = 0;
        for s in db.sessions.values_mut() {
            if s.is_active && s.is_expired(now) {
                s.revoke(crate::domain::aggregates::session::revoke_reason::EXPIRED, now);
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl SecurityStore for MemoryStore {
    async fn record_attempt(&self, mut attempt: LoginAttempt) -> Result<LoginAttempt> {
        let mut db = self.inner.write().await;
        attempt.id = db.next_id();
        db.attempts.push(attempt.clone());
        Ok(attempt)
    }

    async fn failed_attempts(&self, email: &str, since: DateTime<Utc>) -> Result<Vec<LoginAttempt>> {
        let db = self.inner.read().await;
        let mut out: Vec<LoginAttempt> = db
            .attempts
            .iter()
            .filter(|a| a.email == email && !a.success && a.created_at >= since)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn attempts_since(&self, since: DateTime<Utc>) -> Result<Vec<LoginAttempt>> {
        let db = self.inner.read().await;
        let mut out: Vec<LoginAttempt> = db.attempts.iter().filter(|a| a.created_at >= since).cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn anonymize_attempts(&self, email: &str, replacement: &str) -> Result<u64> {
        let mut db = self.inner.write().await;
        let mut count = 0;
        for a in db.attempts.iter_mut().filter(|a| a.email == email) {
            a.email = replacement.to_string();
            a.user_agent = "[deleted]".to_string();
            count += 1;
        }
        Ok(count)
    }

    async fn active_lock(&self, email: &str) -> Result<Option<AccountLock>> {
        Ok(self
            .inner
            .read()
            .await
            .locks
            .values()
            .filter(|l| l.email == email && l.is_active)
            .max_by_key(|l| l.locked_at)
            .cloned())
    }

    async fn lock_by_token(&self, token: &str) -> Result<Option<AccountLock>> {
        Ok(self.inner.read().await.locks.values().find(|l| l.unlock_token == token).cloned())
    }

    async fn insert_lock(&self, mut lock: AccountLock) -> Result<AccountLock> {
        let mut db = self.inner.write().await;
        lock.id = db.next_id();
        db.locks.insert(lock.id, lock.clone());
        Ok(lock)
    }

    async fn update_lock(&self, lock: &AccountLock) -> Result<()> {
        let mut db = self.inner.write().await;
        match db.locks.get_mut(&lock.id) {
            Some(slot) => {
                *slot = lock.clone();
                Ok(())
            }
            None => Err(ShopError::NotFound("Lock")),
        }
    }

    async fn active_locks(&self) -> Result<Vec<AccountLock>> {
        let db = self.inner.read().await;
        let mut out: Vec<AccountLock> = db.locks.values().filter(|l| l.is_active).cloned().collect();
        out.sort_by(|a, b| b.locked_at.cmp(&a.locked_at));
        Ok(out)
    }

    async fn delete_locks(&self, email: &str) -> Result<()> {
        self.inner.write().await.locks.retain(|_, l| l.email != email);
        Ok(())
    }

    async fn insert_code(&self, mut code: VerificationCode) -> Result<VerificationCode> {
        let mut db = self.inner.write().await;
        for older in db.codes.values_mut().filter(|c| c.email == code.email && !c.is_used) {
            older.is_used = true;
        }
        code.id = db.next_id();
        db.codes.insert(code.id, code.clone());
        Ok(code)
    }

    async fn latest_code(&self, email: &str) -> Result<Option<VerificationCode>> {
        Ok(self
            .inner
            .read()
            .await
            .codes
            .values()
            .filter(|c| c.email == email && !c.is_used)
            .max_by_key(|c| (c.created_at, c.id))
            .cloned())
    }

    async fn update_code(&self, code: &VerificationCode) -> Result<()> {
        let mut db = self.inner.write().await;
        match db.codes.get_mut(&code.id) {
            Some(slot) => {
                *slot = code.clone();
                Ok(())
            }
            None => Err(ShopError::NotFound("Verification code")),
        }
    }

    async fn codes_created_since(&self, email: &str, since: DateTime<Utc>) -> Result<i64> {
        Ok(self.inner.read().await.codes.values().filter(|c| c.email == email && c.created_at >= since).count() as i64)
    }

    async fn delete_codes(&self, email: &str) -> Result<()> {
        self.inner.write().await.codes.retain(|_, c| c.email != email);
        Ok(())
    }
}

fn matches_filter(db: &Inner, p: &Product, f: &ProductFilter) -> bool {
    if !f.include_inactive && !p.is_active {
        return false;
    }
    if let Some(ids) = &f.category_ids {
        if !p.category_id.map_or(false, |c| ids.contains(&c)) {
            return false;
        }
    }
    if let Some(q) = f.query.as_deref().map(str::to_lowercase).filter(|q| !q.is_empty()) {
        let hay = [&p.name, &p.description, &p.model, &p.sku];
        if !hay.iter().any(|h| h.to_lowercase().contains(&q)) && !p.tags.iter().any(|t| t.to_lowercase().contains(&q)) {
            return false;
        }
    }
    if f.min_price.map_or(false, |min| p.price_toman < min) || f.max_price.map_or(false, |max| p.price_toman > max) {
        return false;
    }
    if (f.new_arrivals && !p.is_new_arrival) || (f.special_offers && !p.is_in_special_offers) {
        return false;
    }
    if f.exclude_id == Some(p.id) {
        return false;
    }
    if let Some(tag) = &f.tag {
        if !p.tags.contains(tag) {
            return false;
        }
    }
    f.attributes.iter().all(|(key, value)| {
        db.product_values.values().any(|v| v.product_id == p.id && &v.key == key && &v.value == value)
    })
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn categories(&self) -> Result<Vec<Category>> {
        let mut out: Vec<Category> = self.inner.read().await.categories.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn category(&self, id: i64) -> Result<Option<Category>> { Ok(self.inner.read().await.categories.get(&id).cloned()) }

    async fn insert_category(&self, mut category: Category) -> Result<Category> {
        let mut db = self.inner.write().await;
        if db.categories.values().any(|c| c.name == category.name) {
            return Err(conflict("A category with this name"));
        }
        category.id = db.next_id();
        db.categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn update_category(&self, category: &Category) -> Result<()> {
        let mut db = self.inner.write().await;
        if db.categories.values().any(|c| c.name == category.name && c.id != category.id) {
            return Err(conflict("A category with this name"));
        }
        match db.categories.get_mut(&category.id) {
            Some(slot) => {
                *slot = category.clone();
                Ok(())
            }
            None => Err(ShopError::NotFound("Category")),
        }
    }

    async fn delete_category(&self, id: i64) -> Result<bool> {
        let mut db = self.inner.write().await;
        if db.categories.remove(&id).is_none() {
            return Ok(false);
        }
        for c in db.categories.values_mut().filter(|c| c.parent_id == Some(id)) {
            c.parent_id = None;
        }
        for p in db.products.values_mut().filter(|p| p.category_id == Some(id)) {
            p.category_id = None;
        }
        let attrs: Vec<i64> = db.attributes.values().filter(|a| a.category_id == id).map(|a| a.id).collect();
        db.attributes.retain(|_, a| a.category_id != id);
        db.values.retain(|_, v| !attrs.contains(&v.attribute_id));
        Ok(true)
    }

    async fn attributes(&self, category_id: i64) -> Result<Vec<CategoryAttribute>> {
        let db = self.inner.read().await;
        let mut out: Vec<CategoryAttribute> =
            db.attributes.values().filter(|a| a.category_id == category_id).cloned().collect();
        out.sort_by_key(|a| (a.display_order, a.id));
        Ok(out)
    }

    async fn attribute(&self, id: i64) -> Result<Option<CategoryAttribute>> {
        Ok(self.inner.read().await.attributes.get(&id).cloned())
    }

    async fn attribute_by_key(&self, category_id: i64, key: &str) -> Result<Option<CategoryAttribute>> {
        Ok(self
            .inner
            .read()
            .await
            .attributes
            .values()
            .find(|a| a.category_id == category_id && a.key == key)
            .cloned())
    }

    async fn insert_attribute(&self, mut attribute: CategoryAttribute) -> Result<CategoryAttribute> {
        let mut db = self.inner.write().await;
        if db.attributes.values().any(|a| a.category_id == attribute.category_id && a.key == attribute.key) {
            return Err(conflict("An attribute with this key"));
        }
        attribute.id = db.next_id();
        db.attributes.insert(attribute.id, attribute.clone());
        Ok(attribute)
    }

    async fn update_attribute(&self, attribute: &CategoryAttribute) -> Result<()> {
        let mut db = self.inner.write().await;
        match db.attributes.get_mut(&attribute.id) {
            Some(slot) => {
                *slot = attribute.clone();
                Ok(())
            }
            None => Err(ShopError::NotFound("Attribute")),
        }
    }

    async fn delete_attribute(&self, id: i64) -> Result<bool> {
        let mut db = self.inner.write().await;
        let existed = db.attributes.remove(&id).is_some();
        db.values.retain(|_, v| v.attribute_id != id);
        Ok(existed)
    }

    async fn values(&self, attribute_id: i64) -> Result<Vec<AttributeValue>> {
        let db = self.inner.read().await;
        let mut out: Vec<AttributeValue> = db.values.values().filter(|v| v.attribute_id == attribute_id).cloned().collect();
        out.sort_by_key(|v| (v.display_order, v.id));
        Ok(out)
    }

    async fn value(&self, id: i64) -> Result<Option<AttributeValue>> { Ok(self.inner.read().await.values.get(&id).cloned()) }

    async fn insert_value(&self, mut value: AttributeValue) -> Result<AttributeValue> {
        let mut db = self.inner.write().await;
        if db.values.values().any(|v| v.attribute_id == value.attribute_id && v.value == value.value) {
            return Err(conflict("This value"));
        }
        value.id = db.next_id();
        db.values.insert(value.id, value.clone());
        Ok(value)
    }

    async fn update_value(&self, value: &AttributeValue) -> Result<()> {
        let mut db = self.inner.write().await;
        match db.values.get_mut(&value.id) {
            Some(slot) => {
                *slot = value.clone();
                Ok(())
            }
            None => Err(ShopError::NotFound("Attribute value")),
        }
    }

    async fn delete_value(&self, id: i64) -> Result<bool> { Ok(self.inner.write().await.values.remove(&id).is_some()) }

    async fn products(&self, filter: &ProductFilter) -> Result<Page<Product>> {
        let db = self.inner.read().await;
        let mut hits: Vec<Product> = db.products.values().filter(|p| matches_filter(&db, p, filter)).cloned().collect();
        match filter.ordering {
            ProductOrdering::Newest => hits.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id))),
            ProductOrdering::PriceAsc => hits.sort_by(|a, b| a.price_toman.cmp(&b.price_toman).then(a.id.cmp(&b.id))),
            ProductOrdering::PriceDesc => hits.sort_by(|a, b| b.price_toman.cmp(&a.price_toman).then(a.id.cmp(&b.id))),
            ProductOrdering::Name => hits.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id))),
        }
        let count = hits.len() as i64;
        let per_page = filter.per_page();
        let results = hits.into_iter().skip(filter.offset() as usize).take(per_page as usize).collect();
        Ok(Page { results, count, page: filter.page.max(1), per_page })
    }

    async fn product(&self, id: i64) -> Result<Option<Product>> { Ok(self.inner.read().await.products.get(&id).cloned()) }

    async fn products_by_ids(&self, ids: &[i64]) -> Result<Vec<Product>> {
        let db = self.inner.read().await;
        Ok(ids.iter().filter_map(|id| db.products.get(id).cloned()).collect())
    }

    async fn product_counts(&self) -> Result<HashMap<i64, i64>> {
        let db = self.inner.read().await;
        let mut counts = HashMap::new();
        for p in db.products.values().filter(|p| p.is_active) {
            if let Some(c) = p.category_id {
                *counts.entry(c).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn tag_counts(&self, limit: i64) -> Result<Vec<(String, i64)>> {
        let db = self.inner.read().await;
        let mut counts: HashMap<String, i64> = HashMap::new();
        for p in db.products.values().filter(|p| p.is_active) {
            for t in &p.tags {
                *counts.entry(t.clone()).or_insert(0) += 1;
            }
        }
        let mut out: Vec<(String, i64)> = counts.into_iter().collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn insert_product(&self, mut product: Product) -> Result<Product> {
        let mut db = self.inner.write().await;
        product.id = db.next_id();
        db.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn update_product(&self, product: &Product) -> Result<()> {
        let mut db = self.inner.write().await;
        match db.products.get_mut(&product.id) {
            Some(slot) => {
                *slot = product.clone();
                Ok(())
            }
            None => Err(ShopError::NotFound("Product")),
        }
    }

    async fn set_special_offer_flag(&self, product_id: i64, flagged: bool) -> Result<()> {
        if let Some(p) = self.inner.write().await.products.get_mut(&product_id) {
            p.is_in_special_offers = flagged;
        }
        Ok(())
    }

    async fn delete_product(&self, id: i64, record: DeletedProduct) -> Result<()> {
        let mut db = self.inner.write().await;
        let mut record = record;
        record.id = db.next_id();
        db.deleted_products.push(record);
        db.products.remove(&id);
        db.product_values.retain(|_, v| v.product_id != id);
        db.variants.retain(|_, v| v.product_id != id);
        db.wishlist.retain(|_, w| w.product_id != id);
        db.offer_products.retain(|_, l| l.product_id != id);
        for cart in db.carts.values_mut() {
            cart.items.retain(|i| i.product_id != id);
        }
        for order in db.orders.values_mut() {
            for item in order.items.iter_mut().filter(|i| i.product_id == Some(id)) {
                item.product_id = None;
            }
        }
        Ok(())
    }

    async fn product_attribute_values(&self, product_id: i64) -> Result<Vec<ProductAttributeValue>> {
        let db = self.inner.read().await;
        Ok(db.product_values.values().filter(|v| v.product_id == product_id).cloned().collect())
    }

    async fn upsert_product_attribute_value(&self, mut value: ProductAttributeValue) -> Result<ProductAttributeValue> {
        let mut db = self.inner.write().await;
        let existing = db
            .product_values
            .values()
            .find(|v| v.product_id == value.product_id && v.key == value.key)
            .map(|v| v.id);
        value.id = match existing {
            Some(id) => id,
            None => db.next_id(),
        };
        db.product_values.insert(value.id, value.clone());
        Ok(value)
    }

    async fn retain_product_attribute_values(&self, product_id: i64, keep: &[String]) -> Result<u64> {
        let mut db = self.inner.write().await;
        let before = db.product_values.len();
        db.product_values.retain(|_, v| v.product_id != product_id || keep.contains(&v.key));
        Ok((before - db.product_values.len()) as u64)
    }

    async fn variants(&self, product_id: i64) -> Result<Vec<ProductVariant>> {
        let db = self.inner.read().await;
        Ok(db.variants.values().filter(|v| v.product_id == product_id).cloned().collect())
    }

    async fn variant(&self, id: i64) -> Result<Option<ProductVariant>> { Ok(self.inner.read().await.variants.get(&id).cloned()) }

    async fn insert_variant(&self, mut variant: ProductVariant) -> Result<ProductVariant> {
        let mut db = self.inner.write().await;
        if db.variants.values().any(|v| v.sku == variant.sku) {
            return Err(conflict("A variant with this SKU"));
        }
        variant.id = db.next_id();
        db.variants.insert(variant.id, variant.clone());
        Ok(variant)
    }

    async fn update_variant(&self, variant: &ProductVariant) -> Result<()> {
        let mut db = self.inner.write().await;
        if db.variants.values().any(|v| v.sku == variant.sku && v.id != variant.id) {
            return Err(conflict("A variant with this SKU"));
        }
        match db.variants.get_mut(&variant.id) {
            Some(slot) => {
                *slot = variant.clone();
                Ok(())
            }
            None => Err(ShopError::NotFound("Variant")),
        }
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn cart_for(&self, owner: &CartOwner) -> Result<Option<Cart>> {
        Ok(self.inner.read().await.carts.values().find(|c| owner.owns(c)).cloned())
    }

    async fn create_cart(&self, mut cart: Cart) -> Result<Cart> {
        let mut db = self.inner.write().await;
        cart.id = db.next_id();
        db.carts.insert(cart.id, cart.clone());
        Ok(cart)
    }

    async fn apply_line_change(&self, cart_id: i64, change: LineChange, now: DateTime<Utc>) -> Result<()> {
        let mut db = self.inner.write().await;
        let item_id = match change {
            LineChange::Insert { .. } => db.next_id(),
            _ => 0,
        };
        let cart = db.carts.get_mut(&cart_id).ok_or(ShopError::NotFound("Cart"))?;
        match change {
            LineChange::Insert { product_id, variant_id, quantity, unit_price } => cart.items.push(CartItem {
                id: item_id,
                cart_id,
                product_id,
                variant_id,
                quantity,
                unit_price,
                created_at: now,
                updated_at: now,
            }),
            LineChange::SetQuantity { item_id, quantity } => {
                let item = cart.items.iter_mut().find(|i| i.id == item_id).ok_or(ShopError::NotFound("Cart item"))?;
                item.quantity = quantity;
                item.updated_at = now;
            }
            LineChange::Delete { item_id } => cart.items.retain(|i| i.id != item_id),
        }
        cart.updated_at = now;
        Ok(())
    }
}

fn order_matches(o: &Order, f: &OrderFilter) -> bool {
    if f.paid.map_or(false, |paid| o.paid != paid) {
        return false;
    }
    match f.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => true,
        Some(q) => {
            let q = q.to_lowercase();
            [&o.first_name, &o.last_name, &o.email, &o.city].iter().any(|h| h.to_lowercase().contains(&q))
                || q.parse::<i64>().map_or(false, |id| id == o.id)
        }
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn place_order(&self, mut order: Order, cart_id: i64) -> Result<Order> {
        let mut db = self.inner.write().await;
        order.id = db.next_id();
        for i in 0..order.items.len() {
            let id = db.next_id();
            order.items[i].id = id;
            order.items[i].order_id = order.id;
        }
        db.orders.insert(order.id, order.clone());
        if let Some(cart) = db.carts.get_mut(&cart_id) {
            cart.items.clear();
            cart.updated_at = order.created;
        }
        Ok(order)
    }

    async fn order(&self, id: i64) -> Result<Option<Order>> { Ok(self.inner.read().await.orders.get(&id).cloned()) }

    async fn orders_by_email(&self, email: &str) -> Result<Vec<Order>> {
        let db = self.inner.read().await;
        Ok(db.orders.values().rev().filter(|o| o.email == email).cloned().collect())
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Page<Order>> {
        let db = self.inner.read().await;
        let hits: Vec<&Order> = db.orders.values().rev().filter(|o| order_matches(o, filter)).collect();
        let per_page = filter.per_page();
        Ok(Page {
            count: hits.len() as i64,
            results: hits.into_iter().skip(filter.offset() as usize).take(per_page as usize).cloned().collect(),
            page: filter.page.max(1),
            per_page,
        })
    }

    async fn all_orders(&self) -> Result<Vec<Order>> { Ok(self.inner.read().await.orders.values().rev().cloned().collect()) }

    async fn update_order(&self, order: &Order) -> Result<()> {
        let mut db = self.inner.write().await;
        match db.orders.get_mut(&order.id) {
            Some(slot) => {
                *slot = order.clone();
                Ok(())
            }
            None => Err(ShopError::NotFound("Order")),
        }
    }
}

#[async_trait]
impl WishlistStore for MemoryStore {
    async fn wishlist(&self, customer_id: i64) -> Result<Vec<WishlistEntry>> {
        let db = self.inner.read().await;
        let mut out: Vec<WishlistEntry> = db.wishlist.values().filter(|w| w.customer_id == customer_id).cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    async fn wishlist_entry(&self, customer_id: i64, product_id: i64) -> Result<Option<WishlistEntry>> {
        Ok(self
            .inner
            .read()
            .await
            .wishlist
            .values()
            .find(|w| w.customer_id == customer_id && w.product_id == product_id)
            .cloned())
    }

    async fn upsert_wishlist(&self, mut entry: WishlistEntry) -> Result<WishlistEntry> {
        let mut db = self.inner.write().await;
        let existing = db
            .wishlist
            .values()
            .find(|w| w.customer_id == entry.customer_id && w.product_id == entry.product_id)
            .map(|w| (w.id, w.created_at));
        match existing {
            Some((id, created_at)) => {
                entry.id = id;
                entry.created_at = created_at;
            }
            None => entry.id = db.next_id(),
        }
        db.wishlist.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn delete_wishlist(&self, customer_id: i64, product_id: i64) -> Result<bool> {
        let mut db = self.inner.write().await;
        let before = db.wishlist.len();
        db.wishlist.retain(|_, w| !(w.customer_id == customer_id && w.product_id == product_id));
        Ok(db.wishlist.len() < before)
    }
}

#[async_trait]
impl OfferStore for MemoryStore {
    async fn offers(&self) -> Result<Vec<SpecialOffer>> {
        let mut out: Vec<SpecialOffer> = self.inner.read().await.offers.values().cloned().collect();
        out.sort_by(|a, b| a.display_order.cmp(&b.display_order).then(b.created_at.cmp(&a.created_at)));
        Ok(out)
    }

    async fn offer(&self, id: i64) -> Result<Option<SpecialOffer>> { Ok(self.inner.read().await.offers.get(&id).cloned()) }

    async fn insert_offer(&self, mut offer: SpecialOffer) -> Result<SpecialOffer> {
        let mut db = self.inner.write().await;
        offer.id = db.next_id();
        db.offers.insert(offer.id, offer.clone());
        Ok(offer)
    }

    async fn update_offer(&self, offer: &SpecialOffer) -> Result<()> {
        let mut db = self.inner.write().await;
        match db.offers.get_mut(&offer.id) {
            Some(slot) => {
                *slot = offer.clone();
                Ok(())
            }
            None => Err(ShopError::NotFound("Special offer")),
        }
    }

    async fn delete_offer(&self, id: i64) -> Result<bool> {
        let mut db = self.inner.write().await;
        db.offer_products.retain(|_, l| l.offer_id != id);
        Ok(db.offers.remove(&id).is_some())
    }

    async fn increment_offer_counter(&self, id: i64, counter: OfferCounter) -> Result<()> {
        if let Some(o) = self.inner.write().await.offers.get_mut(&id) {
            match counter {
                OfferCounter::Views => o.views_count += 1,
                OfferCounter::Clicks => o.clicks_count += 1,
            }
        }
        Ok(())
    }

    async fn offer_products(&self, offer_id: i64) -> Result<Vec<SpecialOfferProduct>> {
        let db = self.inner.read().await;
        let mut out: Vec<SpecialOfferProduct> =
            db.offer_products.values().filter(|l| l.offer_id == offer_id).cloned().collect();
        out.sort_by_key(|l| (l.display_order, l.created_at, l.id));
        Ok(out)
    }

    async fn offer_links_for_product(&self, product_id: i64) -> Result<Vec<SpecialOfferProduct>> {
        let db = self.inner.read().await;
        Ok(db.offer_products.values().filter(|l| l.product_id == product_id).cloned().collect())
    }

    async fn upsert_offer_product(&self, mut link: SpecialOfferProduct) -> Result<SpecialOfferProduct> {
        let mut db = self.inner.write().await;
        let existing = db
            .offer_products
            .values()
            .find(|l| l.offer_id == link.offer_id && l.product_id == link.product_id)
            .map(|l| (l.id, l.created_at));
        match existing {
            Some((id, created_at)) => {
                link.id = id;
                link.created_at = created_at;
            }
            None => link.id = db.next_id(),
        }
        db.offer_products.insert(link.id, link.clone());
        Ok(link)
    }

    async fn delete_offer_product(&self, offer_id: i64, product_id: i64) -> Result<bool> {
        let mut db = self.inner.write().await;
        let before = db.offer_products.len();
        db.offer_products.retain(|_, l| !(l.offer_id == offer_id && l.product_id == product_id));
        Ok(db.offer_products.len() < before)
    }
}
