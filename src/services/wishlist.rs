//! Wishlists: one entry per (customer, product).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::domain::aggregates::{Priority, WishlistEntry};
use crate::services::catalog::ProductCard;
use crate::services::validate;
use crate::store::Store;
use crate::{Result, ShopError};

pub const ADDED: &str = "محصول به لیست علاقه‌مندی اضافه شد";
pub const REMOVED: &str = "محصول از لیست علاقه‌مندی حذف شد";

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WishlistInput {
    pub product_id: i64,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub reminder_date: Option<NaiveDate>,
    #[serde(default = "default_quantity")]
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub gift_message: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub estimated_budget: Option<Decimal>,
}

fn default_quantity() -> i32 { 1 }

#[derive(Debug, Clone, Deserialize)]
pub struct ToggleInput {
    pub product_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WishlistView {
    #[serde(flatten)]
    pub entry: WishlistEntry,
    pub product: Option<ProductCard>,
    pub priority_display_fa: Option<String>,
    pub is_reminder_due: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToggleResult {
    pub in_wishlist: bool,
    pub message: &'static str,
}

#[derive(Clone)]
pub struct WishlistService {
    store: Arc<dyn Store>,
}

impl WishlistService {
    pub fn new(store: Arc<dyn Store>) -> Self { Self { store } }

    async fn require_product(&self, product_id: i64) -> Result<()> {
        match self.store.product(product_id).await? {
            Some(p) if p.is_active => Ok(()),
            _ => Err(ShopError::NotFound("Product")),
        }
    }

    fn view(entry: WishlistEntry, products: &HashMap<i64, ProductCard>, today: NaiveDate) -> WishlistView {
        WishlistView {
            product: products.get(&entry.product_id).cloned(),
            priority_display_fa: entry.priority_display_fa(),
            is_reminder_due: entry.is_reminder_due(today),
            entry,
        }
    }

    pub async fn list(&self, customer_id: i64) -> Result<Vec<WishlistView>> {
        let entries = self.store.wishlist(customer_id).await?;
        let ids: Vec<i64> = entries.iter().map(|e| e.product_id).collect();
        let products: HashMap<i64, ProductCard> =
            self.store.products_by_ids(&ids).await?.into_iter().map(|p| (p.id, ProductCard::from(p))).collect();
        let today = Utc::now().date_naive();
        Ok(entries.into_iter().map(|e| Self::view(e, &products, today)).collect())
    }

    /// Adds the product, or updates the existing entry in place. The flag is true when a row was created.
    pub async fn upsert(&self, customer_id: i64, input: WishlistInput) -> Result<(WishlistView, bool)> {
        validate(&input)?;
        self.require_product(input.product_id).await?;
        let existing = self.store.wishlist_entry(customer_id, input.product_id).await?;
        let created = existing.is_none();
        let mut entry = existing.unwrap_or_else(|| WishlistEntry::new(customer_id, input.product_id, Utc::now()));
        entry.notes = input.notes.filter(|n| !n.trim().is_empty());
        entry.priority = input.priority.map(|p| p.as_str().to_string());
        entry.reminder_date = input.reminder_date;
        entry.quantity = input.quantity;
        entry.is_public = input.is_public;
        entry.tags = input.tags.into_iter().map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect();
        entry.gift_message = input.gift_message.filter(|m| !m.trim().is_empty());
        entry.estimated_budget = input.estimated_budget;
        let entry = self.store.upsert_wishlist(entry).await?;
        if created {
            tracing::info!(customer = customer_id, product = entry.product_id, "wishlist entry added");
        }

        let products: HashMap<i64, ProductCard> = self
            .store
            .products_by_ids(&[entry.product_id])
            .await?
            .into_iter()
            .map(|p| (p.id, ProductCard::from(p)))
            .collect();
        Ok((Self::view(entry, &products, Utc::now().date_naive()), created))
    }

    pub async fn remove(&self, customer_id: i64, product_id: i64) -> Result<()> {
        if !self.store.delete_wishlist(customer_id, product_id).await? {
            return Err(ShopError::NotFound("Wishlist entry"));
        }
        Ok(())
    }

    pub async fn toggle(&self, customer_id: i64, product_id: i64) -> Result<ToggleResult> {
        if self.store.delete_wishlist(customer_id, product_id).await? {
            return Ok(ToggleResult { in_wishlist: false, message: REMOVED });
        }
        self.require_product(product_id).await?;
        self.store.upsert_wishlist(WishlistEntry::new(customer_id, product_id, Utc::now())).await?;
        Ok(ToggleResult { in_wishlist: true, message: ADDED })
    }

    /// `product_ids` as sent on the query string, e.g. `1,2,3`.
    pub async fn status(&self, customer_id: i64, product_ids: &str) -> Result<BTreeMap<i64, bool>> {
        let ids = product_ids
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<i64>().map_err(|_| ShopError::Validation(format!("Invalid product id: {s}"))))
            .collect::<Result<Vec<i64>>>()?;
        if ids.is_empty() {
            return Err(ShopError::Validation("Product IDs are required".to_string()));
        }
        let saved: Vec<i64> = self.store.wishlist(customer_id).await?.into_iter().map(|e| e.product_id).collect();
        Ok(ids.into_iter().map(|id| (id, saved.contains(&id))).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog::{CatalogService, ProductInput};
    use crate::services::EventPublisher;
    use crate::store::MemoryStore;

    async fn setup() -> (WishlistService, i64) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let catalog = CatalogService::new(store.clone(), EventPublisher::default());
        let input: ProductInput = serde_json::from_value(serde_json::json!({"name": "ساعت", "price_toman": 10.0})).unwrap();
        let product = catalog.create_product(input).await.unwrap();
        (WishlistService::new(store), product.id)
    }

    fn input(product_id: i64) -> WishlistInput {
        serde_json::from_value(serde_json::json!({"product_id": product_id, "priority": "high", "reminder_date": "2020-01-01"})).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_updates_existing_pair() {
        let (service, product) = setup().await;
        let (first, created) = service.upsert(1, input(product)).await.unwrap();
        assert!(created);
        assert_eq!(first.priority_display_fa.as_deref(), Some("زیاد"));
        assert!(first.is_reminder_due);

        let mut again = input(product);
        again.quantity = 3;
        let (second, created) = service.upsert(1, again).await.unwrap();
        assert!(!created);
        assert_eq!(second.entry.id, first.entry.id);
        assert_eq!(second.entry.quantity, 3);
        assert_eq!(service.list(1).await.unwrap().len(), 1);

        let mut bad = input(product);
        bad.quantity = 0;
        assert!(matches!(service.upsert(1, bad).await, Err(ShopError::Validation(_))));
        assert!(matches!(service.upsert(1, input(product + 99)).await, Err(ShopError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_toggle_and_status() {
        let (service, product) = setup().await;
        let on = service.toggle(5, product).await.unwrap();
        assert!(on.in_wishlist);
        let status = service.status(5, &format!("{product}, 999")).await.unwrap();
        assert_eq!(status.get(&product), Some(&true));
        assert_eq!(status.get(&999), Some(&false));

        let off = service.toggle(5, product).await.unwrap();
        assert!(!off.in_wishlist);
        assert_eq!(off.message, REMOVED);
        assert!(service.status(5, "").await.is_err());
        assert!(matches!(service.remove(5, product).await, Err(ShopError::NotFound(_))));
    }
}
