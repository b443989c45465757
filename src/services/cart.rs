//! Cart use cases for customers and device-bound guests.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::aggregates::{Cart, CartError, CartItem, CartLimits, CartOwner, CategoryAttribute, Product, ProductVariant};
use crate::store::Store;
use crate::Result;

const BASKET_ATTRIBUTES: usize = 2;

#[derive(Debug, Clone, Deserialize)]
pub struct AddToCart {
    pub product_id: Option<i64>,
    #[serde(default)]
    pub variant_id: Option<i64>,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 { 1 }

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateCartItem {
    pub item_id: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoveCartItem {
    pub item_id: i64,
    #[serde(default)]
    pub quantity: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineAttribute {
    pub key: String,
    pub display_name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineProduct {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub price_toman: Decimal,
    pub final_price: Decimal,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartLine {
    pub id: i64,
    pub product: Option<LineProduct>,
    pub variant_id: Option<i64>,
    pub variant_sku: Option<String>,
    pub variant_attributes: Vec<LineAttribute>,
    pub basket_attributes: Vec<LineAttribute>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub original_price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub id: i64,
    pub items: Vec<CartLine>,
    pub total_items: i64,
    pub total_price_toman: Decimal,
    pub total_original_price_toman: Decimal,
    pub max_quantity_per_item: u32,
    pub max_items_in_cart: usize,
    pub max_total_quantity: u32,
    pub is_guest: bool,
}

fn label(key: &str, definitions: &[CategoryAttribute]) -> String {
    definitions
        .iter()
        .find(|d| d.key == key)
        .map(|d| d.label_fa.clone())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| key.to_string())
}

#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn Store>,
    limits: CartLimits,
}

impl CartService {
    pub fn new(store: Arc<dyn Store>) -> Self { Self { store, limits: CartLimits::default() } }

    /// The owner's cart, created empty on first use.
    pub async fn cart(&self, owner: &CartOwner) -> Result<Cart> {
        if let Some(cart) = self.store.cart_for(owner).await? {
            if !owner.owns(&cart) {
                return Err(CartError::Unauthorized.into());
            }
            return Ok(cart);
        }
        let cart = self.store.create_cart(Cart::new(owner, Utc::now())).await?;
        match owner {
            CartOwner::Guest(device) => tracing::info!(cart = cart.id, device = %device.short(), "guest cart created"),
            CartOwner::Customer(id) => tracing::info!(cart = cart.id, customer = id, "cart created"),
        }
        Ok(cart)
    }

    pub async fn view(&self, owner: &CartOwner) -> Result<CartView> {
        let cart = self.cart(owner).await?;
        self.render(&cart, matches!(owner, CartOwner::Guest(_))).await
    }

    pub async fn add(&self, owner: &CartOwner, input: AddToCart) -> Result<CartView> {
        let product_id = input.product_id.ok_or(CartError::ProductRequired)?;
        let cart = self.cart(owner).await?;
        let product = self.store.product(product_id).await?.ok_or(CartError::ProductNotFound)?;
        let variants = self.store.variants(product_id).await?;
        let change = cart.plan_add(&product, &variants, input.variant_id, input.quantity, &self.limits)?;
        self.store.apply_line_change(cart.id, change, Utc::now()).await?;
        tracing::info!(cart = cart.id, product = product_id, variant = ?input.variant_id, quantity = input.quantity, "added to cart");
        self.view(owner).await
    }

    pub async fn update(&self, owner: &CartOwner, input: UpdateCartItem) -> Result<CartView> {
        let cart = self.cart(owner).await?;
        let variant = match cart.item(input.item_id)?.variant_id {
            Some(id) => self.store.variant(id).await?,
            None => None,
        };
        let change = cart.plan_update(input.item_id, input.quantity, variant.as_ref())?;
        self.store.apply_line_change(cart.id, change, Utc::now()).await?;
        self.view(owner).await
    }

    pub async fn remove(&self, owner: &CartOwner, input: RemoveCartItem) -> Result<CartView> {
        let cart = self.cart(owner).await?;
        let change = cart.plan_remove(input.item_id, input.quantity)?;
        self.store.apply_line_change(cart.id, change, Utc::now()).await?;
        self.view(owner).await
    }

    async fn render(&self, cart: &Cart, is_guest: bool) -> Result<CartView> {
        let ids: Vec<i64> = cart.items.iter().map(|i| i.product_id).collect();
        let products: HashMap<i64, Product> =
            self.store.products_by_ids(&ids).await?.into_iter().map(|p| (p.id, p)).collect();
        let mut definitions: HashMap<i64, Vec<CategoryAttribute>> = HashMap::new();
        for category_id in products.values().filter_map(|p| p.category_id) {
            if !definitions.contains_key(&category_id) {
                definitions.insert(category_id, self.store.attributes(category_id).await?);
            }
        }

        let mut items = Vec::with_capacity(cart.items.len());
        for item in &cart.items {
            let product = products.get(&item.product_id);
            let defs = product
                .and_then(|p| p.category_id)
                .and_then(|c| definitions.get(&c))
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let variant = match item.variant_id {
                Some(id) => self.store.variant(id).await?,
                None => None,
            };
            items.push(self.line(item, product, variant.as_ref(), defs).await?);
        }

        Ok(CartView {
            id: cart.id,
            total_items: cart.total_items(),
            total_price_toman: items.iter().map(|l| l.total_price).sum(),
            total_original_price_toman: items.iter().map(|l| l.original_price * Decimal::from(l.quantity)).sum(),
            items,
            max_quantity_per_item: self.limits.max_per_item,
            max_items_in_cart: self.limits.max_lines,
            max_total_quantity: self.limits.max_total_quantity,
            is_guest,
        })
    }

    async fn line(
        &self,
        item: &CartItem,
        product: Option<&Product>,
        variant: Option<&ProductVariant>,
        defs: &[CategoryAttribute],
    ) -> Result<CartLine> {
        let variant_attributes: Vec<LineAttribute> = variant
            .map(|v| {
                v.attribute_pairs()
                    .into_iter()
                    .map(|(key, value)| LineAttribute { display_name: label(&key, defs), key, value })
                    .collect()
            })
            .unwrap_or_default();

        let mut basket_attributes = Vec::new();
        if product.is_some() {
            let values = self.store.product_attribute_values(item.product_id).await?;
            for def in defs.iter().filter(|d| d.display_in_basket) {
                if basket_attributes.len() == BASKET_ATTRIBUTES {
                    break;
                }
                if variant_attributes.iter().any(|a| a.key == def.key) {
                    continue;
                }
                if let Some(v) = values.iter().find(|v| v.key == def.key) {
                    basket_attributes.push(LineAttribute { key: def.key.clone(), display_name: label(&def.key, defs), value: v.value.clone() });
                }
            }
        }

        let original_price = match (variant, product) {
            (Some(v), _) if v.price_toman > Decimal::ZERO => v.price_toman,
            (_, Some(p)) => p.price_toman,
            _ => item.unit_price,
        };
        Ok(CartLine {
            id: item.id,
            product: product.map(|p| LineProduct {
                id: p.id,
                name: p.name.clone(),
                slug: p.slug.clone(),
                price_toman: p.price_toman,
                final_price: p.final_price(),
                is_active: p.is_active,
            }),
            variant_id: item.variant_id,
            variant_sku: variant.map(|v| v.sku.clone()),
            variant_attributes,
            basket_attributes,
            quantity: item.quantity,
            unit_price: item.unit_price,
            total_price: item.unit_price * Decimal::from(item.quantity),
            original_price: original_price.max(item.unit_price),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::DeviceId;
    use crate::services::catalog::{AttributeInput, CatalogService, CategoryInput, ProductInput, ValueInput, VariantInput};
    use crate::services::EventPublisher;
    use crate::store::MemoryStore;
    use crate::ShopError;

    struct Fixture {
        cart: CartService,
        catalog: CatalogService,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        Fixture { cart: CartService::new(store.clone()), catalog: CatalogService::new(store, EventPublisher::default()) }
    }

    fn guest(n: u8) -> CartOwner {
        CartOwner::Guest(DeviceId::parse(&format!("00000000-0000-0000-0000-0000000000{n:02}")).unwrap())
    }

    async fn product(catalog: &CatalogService, body: serde_json::Value) -> Product {
        let input: ProductInput = serde_json::from_value(body).unwrap();
        catalog.create_product(input).await.unwrap()
    }

    #[tokio::test]
    async fn test_guest_carts_are_device_bound() {
        let f = fixture();
        let p = product(&f.catalog, serde_json::json!({"name": "کفش", "price_toman": 1000.0, "reduced_price_toman": 800.0})).await;
        let view = f.cart.add(&guest(1), AddToCart { product_id: Some(p.id), variant_id: None, quantity: 2 }).await.unwrap();
        assert!(view.is_guest);
        assert_eq!(view.total_items, 2);
        assert_eq!(view.total_price_toman, Decimal::from(1600));
        assert_eq!(view.total_original_price_toman, Decimal::from(2000));

        let other = f.cart.view(&guest(2)).await.unwrap();
        assert!(other.items.is_empty());
        assert_ne!(other.id, view.id);
    }

    #[tokio::test]
    async fn test_merge_update_and_remove() {
        let f = fixture();
        let owner = CartOwner::Customer(7);
        let p = product(&f.catalog, serde_json::json!({"name": "کیف", "price_toman": 500.0})).await;
        f.cart.add(&owner, AddToCart { product_id: Some(p.id), variant_id: None, quantity: 1 }).await.unwrap();
        let view = f.cart.add(&owner, AddToCart { product_id: Some(p.id), variant_id: None, quantity: 3 }).await.unwrap();
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.items[0].quantity, 4);

        let item = view.items[0].id;
        let view = f.cart.update(&owner, UpdateCartItem { item_id: item, quantity: 10 }).await.unwrap();
        assert_eq!(view.total_items, 10);
        let err = f.cart.update(&owner, UpdateCartItem { item_id: item, quantity: 0 }).await.unwrap_err();
        assert_eq!(err.to_string(), "Quantity must be greater than 0");

        let view = f.cart.remove(&owner, RemoveCartItem { item_id: item, quantity: Some(3) }).await.unwrap();
        assert_eq!(view.total_items, 7);
        let view = f.cart.remove(&owner, RemoveCartItem { item_id: item, quantity: None }).await.unwrap();
        assert!(view.items.is_empty());
        assert!(matches!(
            f.cart.remove(&owner, RemoveCartItem { item_id: item, quantity: None }).await,
            Err(ShopError::Cart(CartError::ItemNotFound))
        ));
    }

    #[tokio::test]
    async fn test_variant_lines_show_labels_and_basket_attributes() {
        let f = fixture();
        let shoes = f
            .catalog
            .create_category(CategoryInput {
                name: "کفش".into(),
                parent_id: None,
                label: String::new(),
                category_type: crate::domain::aggregates::CategoryType::Auto,
                is_visible: true,
                gender: None,
                categorization_attribute_key: None,
            })
            .await
            .unwrap();
        for (key, label, order) in [("size", "سایز", 1), ("brand", "برند", 2), ("color", "رنگ", 3)] {
            let attr = f
                .catalog
                .create_attribute(
                    shoes.id,
                    AttributeInput {
                        key: key.into(),
                        attr_type: crate::domain::aggregates::AttributeType::Select,
                        required: false,
                        display_order: order,
                        label_fa: label.into(),
                        is_displayed_in_product: true,
                        display_in_basket: true,
                    },
                )
                .await
                .unwrap();
            f.catalog.create_value(attr.id, ValueInput { value: "x".into(), display_order: 0 }).await.unwrap();
        }
        let p = product(&f.catalog, serde_json::json!({"name": "کتانی", "price_toman": 1000.0, "category_id": shoes.id})).await;
        f.catalog.set_attribute_value(p.id, "brand", "Nike").await.unwrap();
        f.catalog.set_attribute_value(p.id, "color", "سفید").await.unwrap();
        let variant: VariantInput =
            serde_json::from_value(serde_json::json!({"sku": "k-42", "attributes": {"size": "42"}, "price_toman": 1200.0, "stock_quantity": 3}))
                .unwrap();
        let variant = f.catalog.create_variant(p.id, variant).await.unwrap();

        let owner = CartOwner::Customer(1);
        let err = f.cart.add(&owner, AddToCart { product_id: Some(p.id), variant_id: None, quantity: 1 }).await.unwrap_err();
        assert!(matches!(err, ShopError::Cart(CartError::VariantRequired { .. })));

        let view = f.cart.add(&owner, AddToCart { product_id: Some(p.id), variant_id: Some(variant.id), quantity: 2 }).await.unwrap();
        let line = &view.items[0];
        assert_eq!(line.unit_price, Decimal::from(1200));
        assert_eq!(line.variant_attributes[0].display_name, "سایز");
        let basket: Vec<&str> = line.basket_attributes.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(basket, vec!["brand", "color"]);
    }
}
