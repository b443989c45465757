//! Catalog use cases: the category tree, attribute definitions and their
//! propagation down the tree, products, product attributes and variants.
//!
//! Propagation rules:
//! - a new child category inherits every attribute and value of its parent
//! - saving an attribute get-or-creates it by key on every descendant, syncs
//!   the definition and adds any missing values
//! - saving a value adds it to the matching attribute of every descendant
//! - deleting a value removes it from every descendant
//!
//! Value syncing is additive: values that only exist on a child survive.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::domain::aggregates::product::variant_attributes;
use crate::domain::aggregates::{
    categorization_key, AttributeType, AttributeValue, Category, CategoryAttribute, CategoryTree, CategoryType, Gender,
    Product, ProductAttributeValue, ProductVariant,
};
use crate::domain::events::{CatalogEvent, DomainEvent};
use crate::domain::value_objects::text::{normalize_attribute_value, persian_slugify};
use crate::domain::value_objects::Sku;
use crate::services::{validate, EventPublisher};
use crate::store::{Page, ProductFilter, ProductOrdering, Store};
use crate::{Result, ShopError};

const SIMILAR_LIMIT: usize = 8;
const SIMILAR_TAGS_SCANNED: usize = 5;
pub const POPULAR_TAGS: i64 = 20;
pub const NEW_ARRIVALS: u32 = 20;

// =============================================================================
// Views
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct CategoryNode {
    pub id: i64,
    pub name: String,
    pub clean_name: String,
    pub display_name: String,
    pub label: String,
    pub parent_id: Option<i64>,
    pub category_type: CategoryType,
    pub effective_type: CategoryType,
    pub gender: Gender,
    pub is_visible: bool,
    pub categorization_attribute_key: Option<String>,
    /// Active products filed directly under this category.
    pub product_count: i64,
    /// Active products reachable through the category, descendants included for containers.
    pub total_products: i64,
    pub children: Vec<CategoryNode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttributeWithValues {
    #[serde(flatten)]
    pub attribute: CategoryAttribute,
    pub values: Vec<AttributeValue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorizationKey {
    pub category_id: i64,
    pub key: Option<String>,
    pub label_fa: Option<String>,
    pub values: Vec<AttributeValue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductCard {
    #[serde(flatten)]
    pub product: Product,
    pub final_price: Decimal,
    pub is_on_sale: bool,
}

impl From<Product> for ProductCard {
    fn from(product: Product) -> Self {
        Self { final_price: product.final_price(), is_on_sale: product.is_on_sale(), product }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorySummary {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub gender: Gender,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductAttributeView {
    pub key: String,
    pub label_fa: String,
    #[serde(rename = "type")]
    pub attr_type: Option<AttributeType>,
    pub value: String,
    pub is_custom: bool,
    pub is_displayed_in_product: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductDetail {
    #[serde(flatten)]
    pub card: ProductCard,
    pub category: Option<CategorySummary>,
    pub attributes: Vec<ProductAttributeView>,
    pub variants: Vec<ProductVariant>,
    pub has_variants: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagView {
    pub name: String,
    pub slug: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryProducts {
    pub category: CategorySummary,
    pub effective_type: CategoryType,
    #[serde(flatten)]
    pub page: Page<ProductCard>,
}

// =============================================================================
// Inputs
// =============================================================================

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CategoryInput {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub label: String,
    #[serde(default = "default_category_type")]
    pub category_type: CategoryType,
    #[serde(default = "default_true")]
    pub is_visible: bool,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub categorization_attribute_key: Option<String>,
}

fn default_category_type() -> CategoryType { CategoryType::Auto }
fn default_true() -> bool { true }

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AttributeInput {
    #[validate(length(min = 1, max = 50, message = "Key must be 1-50 characters"))]
    pub key: String,
    #[serde(rename = "type", default = "default_attribute_type")]
    pub attr_type: AttributeType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub label_fa: String,
    #[serde(default = "default_true")]
    pub is_displayed_in_product: bool,
    #[serde(default)]
    pub display_in_basket: bool,
}

fn default_attribute_type() -> AttributeType { AttributeType::Select }

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ValueInput {
    #[validate(length(min = 1, max = 100, message = "Value must be 1-100 characters"))]
    pub value: String,
    #[serde(default)]
    pub display_order: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ProductInput {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(with = "rust_decimal::serde::float")]
    pub price_toman: Decimal,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub price_usd: Option<Decimal>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub sku: String,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub weight: Option<Decimal>,
    #[serde(default)]
    pub dimensions: String,
    #[serde(default)]
    pub warranty: String,
    #[serde(default)]
    #[validate(range(min = 0, message = "Stock cannot be negative"))]
    pub stock_quantity: i32,
    #[serde(default)]
    pub is_new_arrival: bool,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub reduced_price_toman: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub discount_percentage: Option<Decimal>,
    #[serde(default)]
    pub distinctive_attribute_key: Option<String>,
    /// Attribute key to raw value.
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VariantInput {
    #[validate(length(min = 1, max = 100, message = "SKU must be 1-100 characters"))]
    pub sku: String,
    #[serde(default)]
    pub attributes: Value,
    #[serde(with = "rust_decimal::serde::float")]
    pub price_toman: Decimal,
    #[serde(default)]
    #[validate(range(min = 0, message = "Stock cannot be negative"))]
    pub stock_quantity: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default, alias = "isDistinctive")]
    pub is_distinctive: bool,
}

/// Listing query as it arrives on the URL.
#[derive(Debug, Clone, Default)]
pub struct ProductQuery {
    pub category: Option<i64>,
    pub q: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub new_arrivals: bool,
    pub special_offers: bool,
    pub tag: Option<String>,
    pub attributes: Vec<(String, String)>,
    pub ordering: ProductOrdering,
    pub page: u32,
    pub per_page: u32,
}

impl ProductQuery {
    /// Reads the query string; `attr_<key>=value` pairs filter on product attributes.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        let flag = |key: &str| params.get(key).is_some_and(|v| matches!(v.trim(), "1" | "true" | "yes" | "on"));
        let decimal = |key: &str| -> Result<Option<Decimal>> {
            match params.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
                Some(raw) => raw.parse().map(Some).map_err(|_| ShopError::Validation(format!("Invalid {key}: {raw}"))),
                None => Ok(None),
            }
        };
        let number = |key: &str, default: u32| -> Result<u32> {
            match params.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
                Some(raw) => raw.parse().map_err(|_| ShopError::Validation(format!("Invalid {key}: {raw}"))),
                None => Ok(default),
            }
        };
        let category = match params.get("category").map(|v| v.trim()).filter(|v| !v.is_empty()) {
            Some(raw) => Some(raw.parse().map_err(|_| ShopError::Validation(format!("Invalid category: {raw}")))?),
            None => None,
        };

        let mut attributes: Vec<(String, String)> = params
            .iter()
            .filter_map(|(k, v)| k.strip_prefix("attr_").map(|key| (key.to_string(), normalize_attribute_value(v))))
            .filter(|(k, v)| !k.is_empty() && !v.is_empty())
            .collect();
        attributes.sort();

        Ok(Self {
            category,
            q: params.get("q").map(|q| q.trim().to_string()).filter(|q| !q.is_empty()),
            min_price: decimal("min_price")?,
            max_price: decimal("max_price")?,
            new_arrivals: flag("new_arrivals"),
            special_offers: flag("special_offers"),
            tag: params.get("tag").map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
            attributes,
            ordering: ProductOrdering::from_param(params.get("ordering").map(String::as_str)),
            page: number("page", 1)?.max(1),
            per_page: number("per_page", 20)?,
        })
    }

    fn filter(&self, category_ids: Option<Vec<i64>>) -> ProductFilter {
        ProductFilter {
            category_ids,
            query: self.q.clone(),
            min_price: self.min_price,
            max_price: self.max_price,
            new_arrivals: self.new_arrivals,
            special_offers: self.special_offers,
            include_inactive: false,
            attributes: self.attributes.clone(),
            tag: self.tag.clone(),
            exclude_id: None,
            ordering: self.ordering,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

fn summary(category: &Category) -> CategorySummary {
    CategorySummary {
        id: category.id,
        name: category.name.clone(),
        display_name: category.display_name().to_string(),
        gender: category.gender(),
    }
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = normalize_attribute_value(&tag);
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

fn check_prices(input: &ProductInput) -> Result<()> {
    if input.price_toman < Decimal::ZERO {
        return Err(ShopError::Validation("price_toman: Price cannot be negative".to_string()));
    }
    if input.reduced_price_toman.is_some_and(|p| p < Decimal::ZERO || p > input.price_toman) {
        return Err(ShopError::Validation("reduced_price_toman: Must be between 0 and the list price".to_string()));
    }
    if input.discount_percentage.is_some_and(|p| p < Decimal::ZERO || p > Decimal::ONE_HUNDRED) {
        return Err(ShopError::Validation("discount_percentage: Must be between 0 and 100".to_string()));
    }
    Ok(())
}

// =============================================================================
// Service
// =============================================================================

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn Store>,
    events: EventPublisher,
}

impl CatalogService {
    pub fn new(store: Arc<dyn Store>, events: EventPublisher) -> Self { Self { store, events } }

    async fn tree(&self) -> Result<CategoryTree> { Ok(CategoryTree::new(self.store.categories().await?)) }

    async fn require_category(&self, id: i64) -> Result<Category> {
        self.store.category(id).await?.ok_or(ShopError::NotFound("Category"))
    }

    async fn require_product(&self, id: i64) -> Result<Product> {
        self.store.product(id).await?.ok_or(ShopError::NotFound("Product"))
    }

    // --- category tree -------------------------------------------------------

    fn node(tree: &CategoryTree, counts: &HashMap<i64, i64>, id: i64, include_hidden: bool) -> Option<CategoryNode> {
        let category = tree.get(id)?;
        if !include_hidden && !category.is_visible {
            return None;
        }
        let children = tree
            .children(id)
            .iter()
            .filter_map(|child| Self::node(tree, counts, *child, include_hidden))
            .collect();
        Some(CategoryNode {
            id,
            name: category.name.clone(),
            clean_name: category.clean_name(),
            display_name: category.display_name().to_string(),
            label: category.label.clone(),
            parent_id: category.parent_id,
            category_type: category.category_type,
            effective_type: tree.effective_type(id),
            gender: category.gender(),
            is_visible: category.is_visible,
            categorization_attribute_key: category.categorization_attribute_key.clone(),
            product_count: counts.get(&id).copied().unwrap_or(0),
            total_products: tree.product_scope(id).iter().map(|c| counts.get(c).copied().unwrap_or(0)).sum(),
            children,
        })
    }

    pub async fn category_tree(&self, include_hidden: bool) -> Result<Vec<CategoryNode>> {
        let tree = self.tree().await?;
        let counts = self.store.product_counts().await?;
        Ok(tree.roots().iter().filter_map(|root| Self::node(&tree, &counts, root.id, include_hidden)).collect())
    }

    pub async fn category_node(&self, id: i64, include_hidden: bool) -> Result<CategoryNode> {
        let tree = self.tree().await?;
        let counts = self.store.product_counts().await?;
        Self::node(&tree, &counts, id, include_hidden).ok_or(ShopError::NotFound("Category"))
    }

    pub async fn category_attributes(&self, category_id: i64) -> Result<Vec<AttributeWithValues>> {
        self.require_category(category_id).await?;
        let mut out = Vec::new();
        for attribute in self.store.attributes(category_id).await? {
            let values = self.store.values(attribute.id).await?;
            out.push(AttributeWithValues { attribute, values });
        }
        Ok(out)
    }

    pub async fn categorization_key(&self, category_id: i64) -> Result<CategorizationKey> {
        let category = self.require_category(category_id).await?;
        let attributes = self.store.attributes(category_id).await?;
        let key = categorization_key(&category, &attributes);
        let attribute = key.as_deref().and_then(|k| attributes.iter().find(|a| a.key == k));
        let values = match attribute {
            Some(a) => self.store.values(a.id).await?,
            None => Vec::new(),
        };
        Ok(CategorizationKey { category_id, label_fa: attribute.map(|a| a.label_fa.clone()), key, values })
    }

    /// Products of a category; containers include their whole subtree.
    pub async fn category_products(&self, category_id: i64, query: &ProductQuery) -> Result<CategoryProducts> {
        let tree = self.tree().await?;
        let category = tree.get(category_id).ok_or(ShopError::NotFound("Category"))?;
        let page = self.store.products(&query.filter(Some(tree.product_scope(category_id)))).await?;
        Ok(CategoryProducts {
            category: summary(category),
            effective_type: tree.effective_type(category_id),
            page: Page {
                results: page.results.into_iter().map(ProductCard::from).collect(),
                count: page.count,
                page: page.page,
                per_page: page.per_page,
            },
        })
    }

    pub async fn create_category(&self, input: CategoryInput) -> Result<Category> {
        validate(&input)?;
        if let Some(parent) = input.parent_id {
            self.require_category(parent).await?;
        }
        let now = Utc::now();
        let category = self
            .store
            .insert_category(Category {
                id: 0,
                name: input.name.trim().to_string(),
                parent_id: input.parent_id,
                label: input.label.trim().to_string(),
                category_type: input.category_type,
                is_visible: input.is_visible,
                display_section: input.gender.map(|g| g.as_str().to_string()),
                categorization_attribute_key: input.categorization_attribute_key.filter(|k| !k.trim().is_empty()),
                created_at: now,
                updated_at: now,
            })
            .await?;

        if let Some(parent) = category.parent_id {
            for attribute in self.store.attributes(parent).await? {
                let child = self.ensure_child_attribute(&attribute, category.id).await?;
                self.sync_values(&attribute, &child).await?;
            }
        }
        tracing::info!(category = category.id, name = %category.name, "category created");
        Ok(category)
    }

    pub async fn update_category(&self, id: i64, input: CategoryInput) -> Result<Category> {
        validate(&input)?;
        let mut category = self.require_category(id).await?;
        if let Some(parent) = input.parent_id {
            let tree = self.tree().await?;
            if tree.get(parent).is_none() {
                return Err(ShopError::NotFound("Parent category"));
            }
            if tree.is_within(id, parent) {
                return Err(ShopError::Validation("A category cannot be moved under itself".to_string()));
            }
        }
        category.name = input.name.trim().to_string();
        category.parent_id = input.parent_id;
        category.label = input.label.trim().to_string();
        category.category_type = input.category_type;
        category.is_visible = input.is_visible;
        category.display_section = input.gender.map(|g| g.as_str().to_string());
        category.categorization_attribute_key = input.categorization_attribute_key.filter(|k| !k.trim().is_empty());
        category.updated_at = Utc::now();
        self.store.update_category(&category).await?;
        Ok(category)
    }

    pub async fn delete_category(&self, id: i64) -> Result<()> {
        if !self.store.delete_category(id).await? {
            return Err(ShopError::NotFound("Category"));
        }
        tracing::info!(category = id, "category deleted");
        Ok(())
    }

    // --- attribute propagation ---------------------------------------------

    /// The child's attribute with the parent's key, created or synced to match.
    async fn ensure_child_attribute(&self, parent: &CategoryAttribute, category_id: i64) -> Result<CategoryAttribute> {
        match self.store.attribute_by_key(category_id, &parent.key).await? {
            Some(mut existing) => {
                if existing.sync_from(parent) {
                    self.store.update_attribute(&existing).await?;
                }
                Ok(existing)
            }
            None => self.store.insert_attribute(parent.copy_for(category_id)).await,
        }
    }

    /// Adds the parent's values to the child and aligns their order.
    async fn sync_values(&self, parent: &CategoryAttribute, child: &CategoryAttribute) -> Result<()> {
        let existing = self.store.values(child.id).await?;
        for value in self.store.values(parent.id).await? {
            self.ensure_child_value(child.id, &existing, &value).await?;
        }
        Ok(())
    }

    async fn ensure_child_value(&self, child_attribute: i64, existing: &[AttributeValue], value: &AttributeValue) -> Result<()> {
        match existing.iter().find(|v| v.value == value.value) {
            Some(found) if found.display_order != value.display_order => {
                let mut found = found.clone();
                found.display_order = value.display_order;
                self.store.update_value(&found).await
            }
            Some(_) => Ok(()),
            None => self
                .store
                .insert_value(AttributeValue { id: 0, attribute_id: child_attribute, value: value.value.clone(), display_order: value.display_order })
                .await
                .map(|_| ()),
        }
    }

    async fn propagate_attribute(&self, attribute: &CategoryAttribute) -> Result<usize> {
        let descendants = self.tree().await?.descendants(attribute.category_id);
        for category_id in &descendants {
            let child = self.ensure_child_attribute(attribute, *category_id).await?;
            self.sync_values(attribute, &child).await?;
        }
        Ok(descendants.len())
    }

    async fn propagate_value(&self, attribute: &CategoryAttribute, value: &AttributeValue) -> Result<()> {
        for category_id in self.tree().await?.descendants(attribute.category_id) {
            let child = match self.store.attribute_by_key(category_id, &attribute.key).await? {
                Some(child) => child,
                None => self.ensure_child_attribute(attribute, category_id).await?,
            };
            let existing = self.store.values(child.id).await?;
            self.ensure_child_value(child.id, &existing, value).await?;
        }
        Ok(())
    }

    fn attribute_from(input: AttributeInput, category_id: i64, id: i64) -> CategoryAttribute {
        CategoryAttribute {
            id,
            category_id,
            key: input.key.trim().to_string(),
            attr_type: input.attr_type,
            required: input.required,
            display_order: input.display_order,
            label_fa: input.label_fa.trim().to_string(),
            is_displayed_in_product: input.is_displayed_in_product,
            display_in_basket: input.display_in_basket,
        }
    }

    pub async fn create_attribute(&self, category_id: i64, input: AttributeInput) -> Result<CategoryAttribute> {
        validate(&input)?;
        self.require_category(category_id).await?;
        let attribute = self.store.insert_attribute(Self::attribute_from(input, category_id, 0)).await?;
        let reached = self.propagate_attribute(&attribute).await?;
        tracing::info!(category = category_id, key = %attribute.key, descendants = reached, "attribute created");
        Ok(attribute)
    }

    pub async fn update_attribute(&self, attribute_id: i64, input: AttributeInput) -> Result<CategoryAttribute> {
        validate(&input)?;
        let existing = self.store.attribute(attribute_id).await?.ok_or(ShopError::NotFound("Attribute"))?;
        let attribute = Self::attribute_from(input, existing.category_id, attribute_id);
        self.store.update_attribute(&attribute).await?;
        self.propagate_attribute(&attribute).await?;
        Ok(attribute)
    }

    /// Removes the definition from its own category only.
    pub async fn delete_attribute(&self, attribute_id: i64) -> Result<()> {
        if !self.store.delete_attribute(attribute_id).await? {
            return Err(ShopError::NotFound("Attribute"));
        }
        Ok(())
    }

    pub async fn create_value(&self, attribute_id: i64, input: ValueInput) -> Result<AttributeValue> {
        validate(&input)?;
        let attribute = self.store.attribute(attribute_id).await?.ok_or(ShopError::NotFound("Attribute"))?;
        let text = normalize_attribute_value(&input.value);
        if text.is_empty() {
            return Err(ShopError::Validation("value: Value cannot be blank".to_string()));
        }
        let value = self
            .store
            .insert_value(AttributeValue { id: 0, attribute_id, value: text, display_order: input.display_order })
            .await?;
        self.propagate_value(&attribute, &value).await?;
        Ok(value)
    }

    pub async fn update_value(&self, value_id: i64, display_order: i32) -> Result<AttributeValue> {
        let mut value = self.store.value(value_id).await?.ok_or(ShopError::NotFound("Value"))?;
        let attribute = self.store.attribute(value.attribute_id).await?.ok_or(ShopError::NotFound("Attribute"))?;
        value.display_order = display_order;
        self.store.update_value(&value).await?;
        self.propagate_value(&attribute, &value).await?;
        Ok(value)
    }

    pub async fn delete_value(&self, value_id: i64) -> Result<()> {
        let value = self.store.value(value_id).await?.ok_or(ShopError::NotFound("Value"))?;
        let attribute = self.store.attribute(value.attribute_id).await?.ok_or(ShopError::NotFound("Attribute"))?;
        self.store.delete_value(value_id).await?;
        for category_id in self.tree().await?.descendants(attribute.category_id) {
            let Some(child) = self.store.attribute_by_key(category_id, &attribute.key).await? else {
                continue;
            };
            for stale in self.store.values(child.id).await?.into_iter().filter(|v| v.value == value.value) {
                self.store.delete_value(stale.id).await?;
            }
        }
        Ok(())
    }

    // --- products ------------------------------------------------------------

    pub async fn products(&self, query: &ProductQuery) -> Result<Page<ProductCard>> {
        let scope = match query.category {
            Some(id) => {
                let tree = self.tree().await?;
                if tree.get(id).is_none() {
                    return Err(ShopError::NotFound("Category"));
                }
                let mut ids = vec![id];
                ids.extend(tree.descendants(id));
                Some(ids)
            }
            None => None,
        };
        let page = self.store.products(&query.filter(scope)).await?;
        Ok(Page {
            results: page.results.into_iter().map(ProductCard::from).collect(),
            count: page.count,
            page: page.page,
            per_page: page.per_page,
        })
    }

    pub async fn product_detail(&self, id: i64, include_inactive: bool) -> Result<ProductDetail> {
        let product = self.require_product(id).await?;
        if !product.is_active && !include_inactive {
            return Err(ShopError::NotFound("Product"));
        }
        let category = match product.category_id {
            Some(c) => self.store.category(c).await?,
            None => None,
        };
        let definitions = match &category {
            Some(c) => self.store.attributes(c.id).await?,
            None => Vec::new(),
        };
        let attributes = self
            .store
            .product_attribute_values(id)
            .await?
            .into_iter()
            .map(|v| {
                let def = definitions.iter().find(|d| d.key == v.key);
                ProductAttributeView {
                    label_fa: def.map(|d| d.label_fa.clone()).filter(|l| !l.is_empty()).unwrap_or_else(|| v.key.clone()),
                    attr_type: def.map(|d| d.attr_type),
                    is_displayed_in_product: def.map_or(true, |d| d.is_displayed_in_product),
                    is_custom: v.attribute_value_id.is_none(),
                    key: v.key,
                    value: v.value,
                }
            })
            .collect();
        let variants: Vec<ProductVariant> = self.store.variants(id).await?.into_iter().filter(|v| v.is_active).collect();
        Ok(ProductDetail {
            card: product.into(),
            category: category.as_ref().map(summary),
            attributes,
            has_variants: !variants.is_empty(),
            variants,
        })
    }

    pub async fn variants(&self, product_id: i64) -> Result<Vec<ProductVariant>> {
        self.require_product(product_id).await?;
        Ok(self.store.variants(product_id).await?.into_iter().filter(|v| v.is_active).collect())
    }

    /// Active products sharing the most tags with `product_id`.
    pub async fn similar_by_tags(&self, product_id: i64) -> Result<Vec<ProductCard>> {
        let product = self.require_product(product_id).await?;
        let mut scored: HashMap<i64, (usize, Product)> = HashMap::new();
        for tag in product.tags.iter().take(SIMILAR_TAGS_SCANNED) {
            let filter = ProductFilter { tag: Some(tag.clone()), exclude_id: Some(product_id), per_page: 50, ..Default::default() };
            for candidate in self.store.products(&filter).await?.results {
                scored.entry(candidate.id).or_insert((0, candidate)).0 += 1;
            }
        }
        let mut ranked: Vec<(usize, Product)> = scored.into_values().collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.created_at.cmp(&a.1.created_at)));
        Ok(ranked.into_iter().take(SIMILAR_LIMIT).map(|(_, p)| p.into()).collect())
    }

    pub async fn popular_tags(&self, limit: i64) -> Result<Vec<TagView>> {
        Ok(self
            .store
            .tag_counts(limit)
            .await?
            .into_iter()
            .map(|(name, count)| TagView { slug: persian_slugify(&name), name, count })
            .collect())
    }

    pub async fn new_arrivals(&self, limit: u32) -> Result<Vec<ProductCard>> {
        let filter = ProductFilter { new_arrivals: true, per_page: limit, ..Default::default() };
        Ok(self.store.products(&filter).await?.results.into_iter().map(ProductCard::from).collect())
    }

    fn apply_input(product: &mut Product, input: ProductInput) {
        product.name = input.name.trim().to_string();
        product.slug = input.slug.trim().to_string();
        product.category_id = input.category_id;
        product.price_toman = input.price_toman;
        product.price_usd = input.price_usd;
        product.description = input.description;
        product.is_active = input.is_active;
        product.tags = clean_tags(input.tags);
        product.model = input.model.trim().to_string();
        product.sku = input.sku.trim().to_string();
        product.weight = input.weight;
        product.dimensions = input.dimensions;
        product.warranty = input.warranty;
        product.stock_quantity = input.stock_quantity;
        product.is_new_arrival = input.is_new_arrival;
        product.reduced_price_toman = input.reduced_price_toman;
        product.discount_percentage = input.discount_percentage;
        product.distinctive_attribute_key = input.distinctive_attribute_key.filter(|k| !k.trim().is_empty());
        product.ensure_slug();
        product.updated_at = Utc::now();
    }

    pub async fn create_product(&self, input: ProductInput) -> Result<Product> {
        validate(&input)?;
        check_prices(&input)?;
        if let Some(category) = input.category_id {
            self.require_category(category).await?;
        }
        let attributes = input.attributes.clone();
        let now = Utc::now();
        let mut product = Product {
            id: 0,
            name: String::new(),
            slug: String::new(),
            category_id: None,
            price_toman: Decimal::ZERO,
            price_usd: None,
            description: String::new(),
            is_active: true,
            tags: Vec::new(),
            model: String::new(),
            sku: String::new(),
            weight: None,
            dimensions: String::new(),
            warranty: String::new(),
            stock_quantity: 0,
            is_new_arrival: false,
            is_in_special_offers: false,
            reduced_price_toman: None,
            discount_percentage: None,
            distinctive_attribute_key: None,
            created_at: now,
            updated_at: now,
        };
        Self::apply_input(&mut product, input);
        let product = self.store.insert_product(product).await?;
        for (key, raw) in &attributes {
            self.set_attribute_value(product.id, key, raw).await?;
        }
        tracing::info!(product = product.id, name = %product.name, "product created");
        Ok(product)
    }

    /// Moving a product to another category drops the values the new category does not define.
    pub async fn update_product(&self, id: i64, input: ProductInput) -> Result<Product> {
        validate(&input)?;
        check_prices(&input)?;
        let mut product = self.require_product(id).await?;
        if let Some(category) = input.category_id {
            self.require_category(category).await?;
        }
        let previous_category = product.category_id;
        let attributes = input.attributes.clone();
        Self::apply_input(&mut product, input);
        self.store.update_product(&product).await?;

        if previous_category != product.category_id {
            let keep: Vec<String> = match product.category_id {
                Some(c) => self.store.attributes(c).await?.into_iter().map(|a| a.key).collect(),
                None => Vec::new(),
            };
            let removed = self.store.retain_product_attribute_values(id, &keep).await?;
            tracing::info!(product = id, removed, "category changed, stale attribute values removed");
        }
        for (key, raw) in &attributes {
            self.set_attribute_value(id, key, raw).await?;
        }
        Ok(product)
    }

    pub async fn delete_product(&self, id: i64, reason: &str) -> Result<()> {
        let product = self.require_product(id).await?;
        let category_name = match product.category_id {
            Some(c) => self.store.category(c).await?.map(|c| c.name).unwrap_or_default(),
            None => String::new(),
        };
        let record = product.deletion_record(&category_name, reason, Utc::now());
        self.store.delete_product(id, record).await?;
        tracing::info!(product = id, name = %product.name, "product deleted");
        self.events
            .publish(DomainEvent::Catalog(CatalogEvent::ProductDeleted { product_id: id, name: product.name }))
            .await;
        Ok(())
    }

    /// Stores a value for one of the category's attributes, linking the predefined choice when it matches.
    pub async fn set_attribute_value(&self, product_id: i64, key: &str, raw: &str) -> Result<ProductAttributeValue> {
        let product = self.require_product(product_id).await?;
        let category_id = product
            .category_id
            .ok_or_else(|| ShopError::Validation("Product has no category to take attributes from".to_string()))?;
        let attribute = self
            .store
            .attribute_by_key(category_id, key.trim())
            .await?
            .ok_or_else(|| ShopError::Validation(format!("Attribute '{}' is not defined for this category", key.trim())))?;
        if normalize_attribute_value(raw).is_empty() {
            return Err(ShopError::Validation(format!("Value for '{}' cannot be blank", attribute.key)));
        }
        let choices = self.store.values(attribute.id).await?;
        let value = ProductAttributeValue::resolve(product_id, &attribute, &choices, raw);
        self.store.upsert_product_attribute_value(value).await
    }

    fn variant_from(input: VariantInput, product_id: i64, id: i64) -> Result<ProductVariant> {
        let sku = Sku::new(&input.sku).map_err(|e| ShopError::Validation(e.to_string()))?;
        if input.price_toman < Decimal::ZERO {
            return Err(ShopError::Validation("price_toman: Price cannot be negative".to_string()));
        }
        Ok(ProductVariant {
            id,
            product_id,
            sku: sku.as_str().to_string(),
            attributes: variant_attributes(&input.attributes),
            price_toman: input.price_toman,
            stock_quantity: input.stock_quantity,
            is_active: input.is_active,
            is_default: input.is_default,
            is_distinctive: input.is_distinctive,
            created_at: Utc::now(),
        })
    }

    pub async fn create_variant(&self, product_id: i64, input: VariantInput) -> Result<ProductVariant> {
        validate(&input)?;
        self.require_product(product_id).await?;
        let variant = Self::variant_from(input, product_id, 0)?;
        self.store.insert_variant(variant).await
    }

    pub async fn update_variant(&self, product_id: i64, variant_id: i64, input: VariantInput) -> Result<ProductVariant> {
        validate(&input)?;
        let existing = match self.store.variant(variant_id).await? {
            Some(v) if v.product_id == product_id => v,
            _ => return Err(ShopError::NotFound("Variant")),
        };
        let mut variant = Self::variant_from(input, product_id, variant_id)?;
        variant.created_at = existing.created_at;
        self.store.update_variant(&variant).await?;
        Ok(variant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CatalogStore, MemoryStore};

    fn service() -> (CatalogService, MemoryStore) {
        let store = MemoryStore::new();
        (CatalogService::new(Arc::new(store.clone()), EventPublisher::default()), store)
    }

    fn category(name: &str, parent_id: Option<i64>) -> CategoryInput {
        CategoryInput {
            name: name.into(),
            parent_id,
            label: String::new(),
            category_type: CategoryType::Auto,
            is_visible: true,
            gender: None,
            categorization_attribute_key: None,
        }
    }

    fn attribute(key: &str, order: i32) -> AttributeInput {
        AttributeInput {
            key: key.into(),
            attr_type: AttributeType::Select,
            required: false,
            display_order: order,
            label_fa: format!("{key}-fa"),
            is_displayed_in_product: true,
            display_in_basket: true,
        }
    }

    fn product(name: &str, category_id: Option<i64>, price: i64) -> ProductInput {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "category_id": category_id,
            "price_toman": price as f64,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_new_child_inherits_parent_attributes() {
        let (service, store) = service();
        let watches = service.create_category(category("ساعت", None)).await.unwrap();
        let brand = service.create_attribute(watches.id, attribute("brand", 1)).await.unwrap();
        service.create_value(brand.id, ValueInput { value: "Casio".into(), display_order: 1 }).await.unwrap();

        let mens = service.create_category(category("ساعت مردانه", Some(watches.id))).await.unwrap();
        let inherited = store.attribute_by_key(mens.id, "brand").await.unwrap().unwrap();
        assert_eq!(inherited.label_fa, "brand-fa");
        let values = store.values(inherited.id).await.unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value, "Casio");
    }

    #[tokio::test]
    async fn test_attribute_and_value_changes_reach_grandchildren() {
        let (service, store) = service();
        let root = service.create_category(category("پوشاک", None)).await.unwrap();
        let child = service.create_category(category("کفش", Some(root.id))).await.unwrap();
        let grandchild = service.create_category(category("کتانی", Some(child.id))).await.unwrap();

        let size = service.create_attribute(root.id, attribute("size", 2)).await.unwrap();
        let v42 = service.create_value(size.id, ValueInput { value: "۴۲".into(), display_order: 1 }).await.unwrap();
        assert_eq!(v42.value, "42");

        let deep = store.attribute_by_key(grandchild.id, "size").await.unwrap().unwrap();
        assert_eq!(store.values(deep.id).await.unwrap()[0].value, "42");

        // a child-only value survives a parent resync
        store.insert_value(AttributeValue { id: 0, attribute_id: deep.id, value: "45".into(), display_order: 9 }).await.unwrap();
        let mut changed = attribute("size", 5);
        changed.label_fa = "سایز".into();
        service.update_attribute(size.id, changed).await.unwrap();
        let deep = store.attribute_by_key(grandchild.id, "size").await.unwrap().unwrap();
        assert_eq!(deep.label_fa, "سایز");
        assert_eq!(deep.display_order, 5);
        assert_eq!(store.values(deep.id).await.unwrap().len(), 2);

        service.delete_value(v42.id).await.unwrap();
        let remaining: Vec<String> = store.values(deep.id).await.unwrap().into_iter().map(|v| v.value).collect();
        assert_eq!(remaining, vec!["45".to_string()]);
    }

    #[tokio::test]
    async fn test_tree_counts_and_container_products() {
        let (service, _) = service();
        let root = service.create_category(category("پوشاک", None)).await.unwrap();
        let men = service.create_category(category("کفش مردانه", Some(root.id))).await.unwrap();
        service.create_product(product("کفش ۱", Some(men.id), 100)).await.unwrap();
        service.create_product(product("کیف", Some(root.id), 200)).await.unwrap();

        let tree = service.category_tree(false).await.unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].effective_type, CategoryType::Container);
        assert_eq!(tree[0].product_count, 1);
        assert_eq!(tree[0].total_products, 2);
        assert_eq!(tree[0].children[0].gender, Gender::Men);
        assert_eq!(tree[0].children[0].clean_name, "کفش");

        let listed = service.category_products(root.id, &ProductQuery::default()).await.unwrap();
        assert_eq!(listed.page.count, 2);
        let direct = service.category_products(men.id, &ProductQuery::default()).await.unwrap();
        assert_eq!(direct.effective_type, CategoryType::Direct);
        assert_eq!(direct.page.count, 1);
    }

    #[tokio::test]
    async fn test_product_attributes_follow_category() {
        let (service, store) = service();
        let shoes = service.create_category(category("کفش", None)).await.unwrap();
        let bags = service.create_category(category("کیف", None)).await.unwrap();
        let color = service.create_attribute(shoes.id, attribute("color", 1)).await.unwrap();
        service.create_value(color.id, ValueInput { value: "مشکی".into(), display_order: 1 }).await.unwrap();

        let p = service.create_product(product("کتانی", Some(shoes.id), 100)).await.unwrap();
        let linked = service.set_attribute_value(p.id, "color", " مشکی ").await.unwrap();
        assert!(linked.attribute_value_id.is_some());
        let custom = service.set_attribute_value(p.id, "color", "سبز").await.unwrap();
        assert_eq!(custom.custom_value.as_deref(), Some("سبز"));
        assert!(matches!(service.set_attribute_value(p.id, "material", "چرم").await, Err(ShopError::Validation(_))));

        let mut moved = product("کتانی", Some(bags.id), 100);
        moved.slug = p.slug.clone();
        service.update_product(p.id, moved).await.unwrap();
        assert!(store.product_attribute_values(p.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_product_writes_audit() {
        let (service, store) = service();
        let p = service.create_product(product("Watch", None, 100)).await.unwrap();
        assert_eq!(p.slug, "watch");
        service.delete_product(p.id, "discontinued").await.unwrap();
        assert!(store.product(p.id).await.unwrap().is_none());
        let audit = store.deleted_products().await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].deletion_reason, "discontinued");
    }

    #[tokio::test]
    async fn test_similar_by_tags_ranks_overlap() {
        let (service, _) = service();
        let mut base = product("a", None, 1);
        base.tags = vec!["sport".into(), "men".into()];
        let base = service.create_product(base).await.unwrap();
        let mut both = product("b", None, 1);
        both.tags = vec!["men".into(), "sport".into()];
        let both = service.create_product(both).await.unwrap();
        let mut one = product("c", None, 1);
        one.tags = vec!["sport".into()];
        service.create_product(one).await.unwrap();
        service.create_product(product("d", None, 1)).await.unwrap();

        let similar = service.similar_by_tags(base.id).await.unwrap();
        assert_eq!(similar.len(), 2);
        assert_eq!(similar[0].product.id, both.id);

        let tags = service.popular_tags(POPULAR_TAGS).await.unwrap();
        assert_eq!(tags[0].name, "sport");
        assert_eq!(tags[0].count, 3);
    }

    #[test]
    fn test_query_params() {
        let params: HashMap<String, String> = [
            ("category", "3"),
            ("attr_color", "مشکی\u{200c}"),
            ("min_price", "1000"),
            ("new_arrivals", "true"),
            ("ordering", "price_asc"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let q = ProductQuery::from_params(&params).unwrap();
        assert_eq!(q.category, Some(3));
        assert_eq!(q.attributes, vec![("color".to_string(), "مشکی".to_string())]);
        assert_eq!(q.min_price, Some(Decimal::from(1000)));
        assert!(q.new_arrivals);
        assert_eq!(q.ordering, ProductOrdering::PriceAsc);

        let bad: HashMap<String, String> = [("max_price".to_string(), "lots".to_string())].into_iter().collect();
        assert!(ProductQuery::from_params(&bad).is_err());
    }
}
