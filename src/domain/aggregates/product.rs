//! Product Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::domain::aggregates::category::{AttributeValue, CategoryAttribute};
use crate::domain::value_objects::text::{normalize_attribute_value, persian_slugify};

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub category_id: Option<i64>,
    pub price_toman: Decimal,
    pub price_usd: Option<Decimal>,
    pub description: String,
    pub is_active: bool,
    pub tags: Vec<String>,
    pub model: String,
    pub sku: String,
    pub weight: Option<Decimal>,
    pub dimensions: String,
    pub warranty: String,
    pub stock_quantity: i32,
    pub is_new_arrival: bool,
    pub is_in_special_offers: bool,
    pub reduced_price_toman: Option<Decimal>,
    pub discount_percentage: Option<Decimal>,
    pub distinctive_attribute_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Price a customer pays without a variant: the reduced price when set.
    pub fn final_price(&self) -> Decimal {
        self.reduced_price_toman.filter(|p| *p > Decimal::ZERO).unwrap_or(self.price_toman)
    }

    pub fn is_on_sale(&self) -> bool { self.final_price() < self.price_toman }

    /// Variant price wins when positive, then the reduced price, then the list price.
    pub fn unit_price(&self, variant: Option<&ProductVariant>) -> Decimal {
        variant
            .map(|v| v.price_toman)
            .filter(|p| *p > Decimal::ZERO)
            .unwrap_or_else(|| self.final_price())
    }

    /// Fill the slug from the name when missing.
    pub fn ensure_slug(&mut self) {
        if self.slug.trim().is_empty() {
            self.slug = persian_slugify(&self.name);
        }
    }

    pub fn deletion_record(&self, category_name: &str, reason: &str, now: DateTime<Utc>) -> DeletedProduct {
        DeletedProduct {
            id: 0,
            original_id: self.id,
            name: self.name.clone(),
            price_toman: self.price_toman,
            price_usd: self.price_usd,
            description: self.description.clone(),
            category_name: category_name.to_string(),
            model: self.model.clone(),
            sku: self.sku.clone(),
            snapshot: serde_json::to_value(self).unwrap_or(Value::Null),
            deletion_reason: reason.to_string(),
            deleted_at: now,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProductVariant {
    pub id: i64,
    pub product_id: i64,
    pub sku: String,
    /// Attribute key to value, e.g. `{"color": "قرمز", "size": "42"}`.
    pub attributes: Value,
    pub price_toman: Decimal,
    pub stock_quantity: i32,
    pub is_active: bool,
    pub is_default: bool,
    #[serde(rename = "isDistinctive")]
    pub is_distinctive: bool,
    pub created_at: DateTime<Utc>,
}

impl ProductVariant {
    pub fn attribute_pairs(&self) -> Vec<(String, String)> {
        match &self.attributes {
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn summary(&self) -> Value {
        json!({
            "id": self.id,
            "sku": self.sku,
            "attributes": self.attributes,
            "price_toman": self.price_toman,
            "stock_quantity": self.stock_quantity,
        })
    }
}

/// Normalizes an attributes payload to a JSON object of strings.
pub fn variant_attributes(raw: &Value) -> Value {
    let mut out = Map::new();
    if let Value::Object(map) = raw {
        for (k, v) in map {
            let text = match v {
                Value::String(s) => s.clone(),
                Value::Null => continue,
                other => other.to_string(),
            };
            out.insert(k.trim().to_string(), Value::String(normalize_attribute_value(&text)));
        }
    }
    Value::Object(out)
}

/// One attribute value on a product; links a predefined value when one matches.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct ProductAttributeValue {
    pub id: i64,
    pub product_id: i64,
    pub key: String,
    pub attribute_value_id: Option<i64>,
    pub custom_value: Option<String>,
    pub value: String,
}

impl ProductAttributeValue {
    /// Builds the value for `key` against the category definition.
    pub fn resolve(
        product_id: i64,
        attribute: &CategoryAttribute,
        choices: &[AttributeValue],
        raw: &str,
    ) -> ProductAttributeValue {
        let value = normalize_attribute_value(raw);
        let linked = choices.iter().find(|c| normalize_attribute_value(&c.value) == value);
        ProductAttributeValue {
            id: 0,
            product_id,
            key: attribute.key.clone(),
            attribute_value_id: linked.map(|c| c.id),
            custom_value: if linked.is_some() { None } else { Some(value.clone()) },
            value: linked.map(|c| c.value.clone()).unwrap_or(value),
        }
    }
}

/// Audit row written before a product is deleted.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct DeletedProduct {
    pub id: i64,
    pub original_id: i64,
    pub name: String,
    pub price_toman: Decimal,
    pub price_usd: Option<Decimal>,
    pub description: String,
    pub category_name: String,
    pub model: String,
    pub sku: String,
    pub snapshot: Value,
    pub deletion_reason: String,
    pub deleted_at: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::aggregates::category::AttributeType;

    pub(crate) fn product(id: i64, price: i64) -> Product {
        let now = Utc::now();
        Product {
            id, name: format!("محصول {id}"), slug: String::new(), category_id: Some(1),
            price_toman: Decimal::from(price), price_usd: None, description: String::new(), is_active: true,
            tags: vec![], model: String::new(), sku: format!("SKU-{id}"), weight: None,
            dimensions: String::new(), warranty: String::new(), stock_quantity: 10,
            is_new_arrival: false, is_in_special_offers: false, reduced_price_toman: None,
            discount_percentage: None, distinctive_attribute_key: None, created_at: now, updated_at: now,
        }
    }

    pub(crate) fn variant(id: i64, product_id: i64, price: i64, stock: i32) -> ProductVariant {
        ProductVariant {
            id, product_id, sku: format!("V-{id}"), attributes: json!({"color": "قرمز"}),
            price_toman: Decimal::from(price), stock_quantity: stock, is_active: true, is_default: false,
            is_distinctive: false, created_at: Utc::now(),
        }
    }

    #[test]
    fn test_unit_price_precedence() {
        let mut p = product(1, 1_000_000);
        assert_eq!(p.unit_price(None), Decimal::from(1_000_000));
        p.reduced_price_toman = Some(Decimal::from(800_000));
        assert_eq!(p.unit_price(None), Decimal::from(800_000));
        assert!(p.is_on_sale());
        let v = variant(5, 1, 900_000, 3);
        assert_eq!(p.unit_price(Some(&v)), Decimal::from(900_000));
        let free = variant(6, 1, 0, 3);
        assert_eq!(p.unit_price(Some(&free)), Decimal::from(800_000));
    }

    #[test]
    fn test_attribute_value_resolution() {
        let attr = CategoryAttribute {
            id: 1, category_id: 1, key: "size".into(), attr_type: AttributeType::Select, required: false,
            display_order: 0, label_fa: "سایز".into(), is_displayed_in_product: true, display_in_basket: true,
        };
        let choices = vec![AttributeValue { id: 9, attribute_id: 1, value: "42".into(), display_order: 0 }];
        let linked = ProductAttributeValue::resolve(3, &attr, &choices, " ۴۲ ");
        assert_eq!(linked.attribute_value_id, Some(9));
        assert_eq!(linked.custom_value, None);
        let custom = ProductAttributeValue::resolve(3, &attr, &choices, "43\u{200c}");
        assert_eq!(custom.attribute_value_id, None);
        assert_eq!(custom.custom_value.as_deref(), Some("43"));
    }

    #[test]
    fn test_variant_attributes_and_serialization() {
        let attrs = variant_attributes(&json!({" size ": 42, "color": "آبی", "skip": null}));
        assert_eq!(attrs, json!({"size": "42", "color": "آبی"}));
        let v = variant(1, 1, 10, 1);
        let body = serde_json::to_value(&v).unwrap();
        assert_eq!(body["isDistinctive"], json!(false));
        assert_eq!(v.attribute_pairs(), vec![("color".to_string(), "قرمز".to_string())]);
    }

    #[test]
    fn test_deletion_record() {
        let p = product(4, 500);
        let record = p.deletion_record("ساعت", "", Utc::now());
        assert_eq!(record.original_id, 4);
        assert_eq!(record.snapshot["sku"], json!("SKU-4"));
    }
}
