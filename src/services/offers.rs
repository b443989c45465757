//! Special offers and the `is_in_special_offers` product flag.
//!
//! The flag is derived state: a product carries it iff one of its active
//! offer rows belongs to an offer that is currently valid. Every write to an
//! offer or an offer row resyncs the products it touches.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::domain::aggregates::offer::flags_product;
use crate::domain::aggregates::{ActionType, DisplayStyle, OfferType, SpecialOffer, SpecialOfferProduct};
use crate::domain::events::{CatalogEvent, DomainEvent};
use crate::services::catalog::ProductCard;
use crate::services::{validate, EventPublisher};
use crate::store::{OfferCounter, Store};
use crate::{Result, ShopError};

pub const NOT_ACTIVE: &str = "Offer is not currently active";

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OfferInput {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_offer_type")]
    pub offer_type: OfferType,
    #[serde(default = "default_display_style")]
    pub display_style: DisplayStyle,
    #[serde(default = "default_action")]
    pub banner_action_type: ActionType,
    #[serde(default)]
    pub banner_action_target: String,
    #[serde(default)]
    pub banner_external_url: String,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub display_order: i32,
}

fn default_offer_type() -> OfferType { OfferType::Discount }
fn default_display_style() -> DisplayStyle { DisplayStyle::Carousel }
fn default_action() -> ActionType { ActionType::None }
fn default_true() -> bool { true }

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OfferProductInput {
    pub product_id: i64,
    #[serde(default)]
    #[validate(range(min = 0, max = 100, message = "Discount percentage must be between 0 and 100"))]
    pub discount_percentage: i32,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub discount_amount: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub original_price: Option<Decimal>,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OfferProductView {
    #[serde(flatten)]
    pub link: SpecialOfferProduct,
    pub discount_display: String,
    pub product: Option<ProductCard>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OfferView {
    #[serde(flatten)]
    pub offer: SpecialOffer,
    pub is_currently_valid: bool,
    pub remaining_time: Option<i64>,
    pub products: Vec<OfferProductView>,
}

#[derive(Clone)]
pub struct OfferService {
    store: Arc<dyn Store>,
    events: EventPublisher,
}

impl OfferService {
    pub fn new(store: Arc<dyn Store>, events: EventPublisher) -> Self { Self { store, events } }

    async fn require_offer(&self, id: i64) -> Result<SpecialOffer> {
        self.store.offer(id).await?.ok_or(ShopError::NotFound("Special offer"))
    }

    async fn render(&self, offer: SpecialOffer, active_only: bool, now: DateTime<Utc>) -> Result<OfferView> {
        let links: Vec<SpecialOfferProduct> = self
            .store
            .offer_products(offer.id)
            .await?
            .into_iter()
            .filter(|l| l.is_active || !active_only)
            .collect();
        let ids: Vec<i64> = links.iter().map(|l| l.product_id).collect();
        let mut products: HashMap<i64, ProductCard> = self
            .store
            .products_by_ids(&ids)
            .await?
            .into_iter()
            .filter(|p| p.is_active || !active_only)
            .map(|p| (p.id, ProductCard::from(p)))
            .collect();
        let products = links
            .into_iter()
            .filter_map(|link| {
                let product = products.remove(&link.product_id);
                if active_only && product.is_none() {
                    return None;
                }
                Some(OfferProductView { discount_display: link.discount_display(), product, link })
            })
            .collect();
        Ok(OfferView {
            is_currently_valid: offer.is_currently_valid(now),
            remaining_time: offer.remaining_time(now),
            offer,
            products,
        })
    }

    // --- flag sync -----------------------------------------------------------

    /// Recomputes the flag of one product; true when it changed.
    pub async fn sync_product(&self, product_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let Some(product) = self.store.product(product_id).await? else {
            return Ok(false);
        };
        let mut flagged = false;
        for link in self.store.offer_links_for_product(product_id).await? {
            if let Some(offer) = self.store.offer(link.offer_id).await? {
                if flags_product(&link, &offer, now) {
                    flagged = true;
                    break;
                }
            }
        }
        if product.is_in_special_offers == flagged {
            return Ok(false);
        }
        self.store.set_special_offer_flag(product_id, flagged).await?;
        Ok(true)
    }

    async fn sync_products(&self, product_ids: impl IntoIterator<Item = i64>) -> Result<Vec<i64>> {
        let now = Utc::now();
        let mut changed = Vec::new();
        for id in product_ids.into_iter().collect::<BTreeSet<i64>>() {
            if self.sync_product(id, now).await? {
                changed.push(id);
            }
        }
        if !changed.is_empty() {
            tracing::info!(products = ?changed, "special offer flags synced");
            self.events
                .publish(DomainEvent::Catalog(CatalogEvent::SpecialOfferFlagsSynced { product_ids: changed.clone() }))
                .await;
        }
        Ok(changed)
    }

    async fn sync_offer(&self, offer_id: i64) -> Result<Vec<i64>> {
        let ids: Vec<i64> = self.store.offer_products(offer_id).await?.into_iter().map(|l| l.product_id).collect();
        self.sync_products(ids).await
    }

    /// Resyncs every product linked to any offer, catching offers that started or ended since the last write.
    pub async fn resync_all(&self) -> Result<Vec<i64>> {
        let mut ids = Vec::new();
        for offer in self.store.offers().await? {
            ids.extend(self.store.offer_products(offer.id).await?.into_iter().map(|l| l.product_id));
        }
        self.sync_products(ids).await
    }

    // --- public --------------------------------------------------------------

    /// Currently valid offers by display order; each one shown counts a view.
    pub async fn valid_offers(&self) -> Result<Vec<OfferView>> {
        let now = Utc::now();
        let mut out = Vec::new();
        for offer in self.store.offers().await?.into_iter().filter(|o| o.is_currently_valid(now)) {
            self.store.increment_offer_counter(offer.id, OfferCounter::Views).await?;
            out.push(self.render(offer, true, now).await?);
        }
        Ok(out)
    }

    pub async fn offer(&self, id: i64) -> Result<OfferView> {
        let now = Utc::now();
        let offer = self.require_offer(id).await?;
        if !offer.is_currently_valid(now) {
            return Err(ShopError::NotFound("Special offer"));
        }
        self.store.increment_offer_counter(id, OfferCounter::Views).await?;
        self.render(offer, true, now).await
    }

    pub async fn click(&self, id: i64) -> Result<()> {
        let offer = self.require_offer(id).await?;
        if !offer.is_currently_valid(Utc::now()) {
            return Err(ShopError::Validation(NOT_ACTIVE.to_string()));
        }
        self.store.increment_offer_counter(id, OfferCounter::Clicks).await?;
        tracing::info!(offer = id, title = %offer.title, "special offer clicked");
        Ok(())
    }

    pub async fn by_type(&self, offer_type: &str) -> Result<Vec<OfferView>> {
        let offer_type: OfferType =
            offer_type.parse().map_err(|_| ShopError::Validation(format!("Invalid offer type: {offer_type}")))?;
        let now = Utc::now();
        let mut out = Vec::new();
        for offer in self.store.offers().await?.into_iter().filter(|o| o.offer_type == offer_type && o.is_currently_valid(now)) {
            out.push(self.render(offer, true, now).await?);
        }
        Ok(out)
    }

    // --- admin ---------------------------------------------------------------

    pub async fn all_offers(&self) -> Result<Vec<OfferView>> {
        let now = Utc::now();
        let mut out = Vec::new();
        for offer in self.store.offers().await? {
            out.push(self.render(offer, false, now).await?);
        }
        Ok(out)
    }

    pub async fn admin_offer(&self, id: i64) -> Result<OfferView> {
        let offer = self.require_offer(id).await?;
        self.render(offer, false, Utc::now()).await
    }

    fn apply(offer: &mut SpecialOffer, input: OfferInput, now: DateTime<Utc>) -> Result<()> {
        let valid_from = input.valid_from.unwrap_or(offer.valid_from);
        if input.valid_until.is_some_and(|until| until < valid_from) {
            return Err(ShopError::Validation("valid_until: Must not be before valid_from".to_string()));
        }
        offer.title = input.title.trim().to_string();
        offer.description = input.description;
        offer.offer_type = input.offer_type;
        offer.display_style = input.display_style;
        offer.banner_action_type = input.banner_action_type;
        offer.banner_action_target = input.banner_action_target.trim().to_string();
        offer.banner_external_url = input.banner_external_url.trim().to_string();
        offer.valid_from = valid_from;
        offer.valid_until = input.valid_until;
        offer.enabled = input.enabled;
        offer.is_active = input.is_active;
        offer.display_order = input.display_order;
        offer.updated_at = now;
        Ok(())
    }

    pub async fn create_offer(&self, input: OfferInput) -> Result<OfferView> {
        validate(&input)?;
        let now = Utc::now();
        let mut offer = SpecialOffer {
            id: 0,
            title: String::new(),
            description: String::new(),
            offer_type: OfferType::Discount,
            display_style: DisplayStyle::Carousel,
            banner_action_type: ActionType::None,
            banner_action_target: String::new(),
            banner_external_url: String::new(),
            valid_from: now,
            valid_until: None,
            enabled: true,
            is_active: true,
            display_order: 0,
            views_count: 0,
            clicks_count: 0,
            created_at: now,
            updated_at: now,
        };
        Self::apply(&mut offer, input, now)?;
        let offer = self.store.insert_offer(offer).await?;
        tracing::info!(offer = offer.id, title = %offer.title, "special offer created");
        self.render(offer, false, now).await
    }

    pub async fn update_offer(&self, id: i64, input: OfferInput) -> Result<OfferView> {
        validate(&input)?;
        let mut offer = self.require_offer(id).await?;
        let now = Utc::now();
        Self::apply(&mut offer, input, now)?;
        self.store.update_offer(&offer).await?;
        self.sync_offer(id).await?;
        self.render(offer, false, now).await
    }

    pub async fn delete_offer(&self, id: i64) -> Result<()> {
        let ids: Vec<i64> = self.store.offer_products(id).await?.into_iter().map(|l| l.product_id).collect();
        if !self.store.delete_offer(id).await? {
            return Err(ShopError::NotFound("Special offer"));
        }
        tracing::info!(offer = id, "special offer deleted");
        self.sync_products(ids).await?;
        Ok(())
    }

    pub async fn offer_products(&self, offer_id: i64) -> Result<Vec<OfferProductView>> {
        let offer = self.require_offer(offer_id).await?;
        Ok(self.render(offer, false, Utc::now()).await?.products)
    }

    /// Adds a product to the offer, or reprices the existing row.
    pub async fn add_product(&self, offer_id: i64, input: OfferProductInput) -> Result<OfferProductView> {
        validate(&input)?;
        self.require_offer(offer_id).await?;
        let product = self.store.product(input.product_id).await?.ok_or(ShopError::NotFound("Product"))?;
        let amount = input.discount_amount.unwrap_or(Decimal::ZERO);
        if amount < Decimal::ZERO {
            return Err(ShopError::Validation("discount_amount: Must not be negative".to_string()));
        }
        let mut link = SpecialOfferProduct {
            id: 0,
            offer_id,
            product_id: product.id,
            discount_percentage: input.discount_percentage,
            discount_amount: amount,
            original_price: input.original_price.unwrap_or(Decimal::ZERO),
            discounted_price: Decimal::ZERO,
            display_order: input.display_order,
            is_active: input.is_active,
            created_at: Utc::now(),
        };
        link.price(product.price_toman);
        let link = self.store.upsert_offer_product(link).await?;
        self.sync_products([product.id]).await?;
        Ok(OfferProductView { discount_display: link.discount_display(), product: Some(ProductCard::from(product)), link })
    }

    pub async fn remove_product(&self, offer_id: i64, product_id: i64) -> Result<()> {
        if !self.store.delete_offer_product(offer_id, product_id).await? {
            return Err(ShopError::NotFound("Special offer product"));
        }
        self.sync_products([product_id]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog::{CatalogService, ProductInput};
    use crate::store::{CatalogStore, MemoryStore, OfferStore};
    use chrono::Duration;

    async fn setup() -> (OfferService, MemoryStore, i64) {
        let store = MemoryStore::new();
        let shared: Arc<dyn Store> = Arc::new(store.clone());
        let catalog = CatalogService::new(shared.clone(), EventPublisher::default());
        let input: ProductInput = serde_json::from_value(serde_json::json!({"name": "عینک", "price_toman": 200000.0})).unwrap();
        let product = catalog.create_product(input).await.unwrap();
        (OfferService::new(shared, EventPublisher::default()), store, product.id)
    }

    fn offer_input(title: &str) -> OfferInput {
        serde_json::from_value(serde_json::json!({"title": title, "offer_type": "flash_sale"})).unwrap()
    }

    fn link(product_id: i64, pct: i32) -> OfferProductInput {
        serde_json::from_value(serde_json::json!({"product_id": product_id, "discount_percentage": pct})).unwrap()
    }

    async fn flagged(store: &MemoryStore, id: i64) -> bool {
        store.product(id).await.unwrap().unwrap().is_in_special_offers
    }

    #[tokio::test]
    async fn test_flag_follows_offer_lifecycle() {
        let (service, store, product) = setup().await;
        let offer = service.create_offer(offer_input("حراج")).await.unwrap();
        let added = service.add_product(offer.offer.id, link(product, 25)).await.unwrap();
        assert_eq!(added.link.original_price, Decimal::from(200_000));
        assert_eq!(added.link.discounted_price, Decimal::from(150_000));
        assert_eq!(added.discount_display, "25% تخفیف");
        assert!(flagged(&store, product).await);

        let mut disabled = offer_input("حراج");
        disabled.enabled = false;
        service.update_offer(offer.offer.id, disabled).await.unwrap();
        assert!(!flagged(&store, product).await);

        service.update_offer(offer.offer.id, offer_input("حراج")).await.unwrap();
        assert!(flagged(&store, product).await);
        service.remove_product(offer.offer.id, product).await.unwrap();
        assert!(!flagged(&store, product).await);

        service.add_product(offer.offer.id, link(product, 10)).await.unwrap();
        service.delete_offer(offer.offer.id).await.unwrap();
        assert!(!flagged(&store, product).await);
    }

    #[tokio::test]
    async fn test_flag_needs_one_valid_offer() {
        let (service, store, product) = setup().await;
        let mut expired = offer_input("old");
        expired.valid_from = Some(Utc::now() - Duration::days(10));
        expired.valid_until = Some(Utc::now() - Duration::days(1));
        let expired = service.create_offer(expired).await.unwrap();
        service.add_product(expired.offer.id, link(product, 10)).await.unwrap();
        assert!(!flagged(&store, product).await);

        let live = service.create_offer(offer_input("live")).await.unwrap();
        service.add_product(live.offer.id, link(product, 10)).await.unwrap();
        assert!(flagged(&store, product).await);
        service.remove_product(expired.offer.id, product).await.unwrap();
        assert!(flagged(&store, product).await);
    }

    #[tokio::test]
    async fn test_public_listing_counts_views_and_clicks() {
        let (service, store, product) = setup().await;
        let live = service.create_offer(offer_input("live")).await.unwrap();
        service.add_product(live.offer.id, link(product, 0)).await.unwrap();
        let mut hidden = offer_input("hidden");
        hidden.is_active = false;
        let hidden = service.create_offer(hidden).await.unwrap();

        let listed = service.valid_offers().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].products[0].discount_display, "بدون تخفیف");
        assert!(matches!(service.offer(hidden.offer.id).await, Err(ShopError::NotFound(_))));
        assert!(matches!(service.click(hidden.offer.id).await, Err(ShopError::Validation(_))));

        service.click(live.offer.id).await.unwrap();
        let stored = store.offer(live.offer.id).await.unwrap().unwrap();
        assert_eq!(stored.views_count, 1);
        assert_eq!(stored.clicks_count, 1);

        assert_eq!(service.by_type("flash_sale").await.unwrap().len(), 1);
        assert!(service.by_type("coupon").await.unwrap().is_empty());
        assert!(service.by_type("nope").await.is_err());
    }
}
