//! Cart Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::aggregates::product::{Product, ProductVariant};
use crate::domain::value_objects::{DeviceId, Quantity, QuantityError};

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Cart {
    pub id: i64,
    pub customer_id: Option<i64>,
    /// Normalized guest device id; empty for customer carts.
    pub device_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub items: Vec<CartItem>,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct CartItem {
    pub id: i64,
    pub cart_id: i64,
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CartOwner {
    Customer(i64),
    Guest(DeviceId),
}

impl CartOwner {
    pub fn owns(&self, cart: &Cart) -> bool {
        match self {
            Self::Customer(id) => cart.customer_id == Some(*id),
            Self::Guest(device) => cart.customer_id.is_none() && cart.device_id == device.as_str(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CartLimits {
    pub max_per_item: u32,
    pub max_lines: usize,
    /// Declared for clients; not enforced.
    pub max_total_quantity: u32,
}

impl Default for CartLimits {
    fn default() -> Self { Self { max_per_item: Quantity::MAX_PER_ITEM, max_lines: 50, max_total_quantity: 200 } }
}

/// Row change produced by a cart operation, applied by the store.
#[derive(Clone, Debug, PartialEq)]
pub enum LineChange {
    Insert { product_id: i64, variant_id: Option<i64>, quantity: i32, unit_price: Decimal },
    SetQuantity { item_id: i64, quantity: i32 },
    Delete { item_id: i64 },
}

impl Cart {
    pub fn new(owner: &CartOwner, now: DateTime<Utc>) -> Self {
        let (customer_id, device_id) = match owner {
            CartOwner::Customer(id) => (Some(*id), String::new()),
            CartOwner::Guest(device) => (None, device.as_str().to_string()),
        };
        Self { id: 0, customer_id, device_id, created_at: now, updated_at: now, items: vec![] }
    }

    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    pub fn total_items(&self) -> i64 { self.items.iter().map(|i| i64::from(i.quantity)).sum() }

    pub fn item(&self, item_id: i64) -> Result<&CartItem, CartError> {
        self.items.iter().find(|i| i.id == item_id).ok_or(CartError::ItemNotFound)
    }

    /// Plan adding `quantity` of a product, given every variant of it.
    pub fn plan_add(
        &self,
        product: &Product,
        variants: &[ProductVariant],
        variant_id: Option<i64>,
        quantity: i64,
        limits: &CartLimits,
    ) -> Result<LineChange, CartError> {
        let quantity = Quantity::new(quantity)?;
        if !product.is_active {
            return Err(CartError::ProductNotFound);
        }
        let active: Vec<&ProductVariant> = variants.iter().filter(|v| v.is_active).collect();
        let variant = match variant_id {
            None if !active.is_empty() => {
                return Err(CartError::VariantRequired { available: active.into_iter().cloned().collect() })
            }
            None => None,
            Some(id) => Some(
                *active
                    .iter()
                    .find(|v| v.id == id && v.product_id == product.id)
                    .ok_or(CartError::VariantNotFound)?,
            ),
        };
        if let Some(v) = variant {
            if v.stock_quantity <= 0 {
                return Err(CartError::OutOfStock);
            }
            if i64::from(quantity.value()) > i64::from(v.stock_quantity) {
                return Err(CartError::InsufficientStock { available: v.stock_quantity });
            }
        }

        let existing = self
            .items
            .iter()
            .find(|i| i.product_id == product.id && i.variant_id == variant.map(|v| v.id));
        match existing {
            Some(line) => {
                let total = i64::from(line.quantity) + i64::from(quantity.value());
                if total > i64::from(limits.max_per_item) {
                    return Err(CartError::MergeAboveCap { max: limits.max_per_item });
                }
                if let Some(v) = variant {
                    if total > i64::from(v.stock_quantity) {
                        return Err(CartError::MergeAboveStock { available: v.stock_quantity });
                    }
                }
                Ok(LineChange::SetQuantity { item_id: line.id, quantity: total as i32 })
            }
            None => {
                if self.items.len() >= limits.max_lines {
                    return Err(CartError::TooManyLines { max: limits.max_lines });
                }
                Ok(LineChange::Insert {
                    product_id: product.id,
                    variant_id: variant.map(|v| v.id),
                    quantity: quantity.value() as i32,
                    unit_price: product.unit_price(variant),
                })
            }
        }
    }

    pub fn plan_update(&self, item_id: i64, quantity: i64, variant: Option<&ProductVariant>) -> Result<LineChange, CartError> {
        let line = self.item(item_id)?;
        let quantity = Quantity::new(quantity)?;
        if let Some(v) = variant.filter(|v| Some(v.id) == line.variant_id) {
            if i64::from(quantity.value()) > i64::from(v.stock_quantity) {
                return Err(CartError::InsufficientStock { available: v.stock_quantity });
            }
        }
        Ok(LineChange::SetQuantity { item_id, quantity: quantity.value() as i32 })
    }

    /// Decrease by `quantity`, deleting at zero; without a quantity the line goes.
    pub fn plan_remove(&self, item_id: i64, quantity: Option<i64>) -> Result<LineChange, CartError> {
        let line = self.item(item_id)?;
        match quantity {
            Some(by) if i64::from(line.quantity) - by > 0 => {
                Ok(LineChange::SetQuantity { item_id, quantity: (i64::from(line.quantity) - by) as i32 })
            }
            _ => Ok(LineChange::Delete { item_id }),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CartError {
    ProductRequired,
    Quantity(QuantityError),
    ProductNotFound,
    VariantRequired { available: Vec<ProductVariant> },
    VariantNotFound,
    OutOfStock,
    InsufficientStock { available: i32 },
    TooManyLines { max: usize },
    MergeAboveCap { max: u32 },
    MergeAboveStock { available: i32 },
    ItemNotFound,
    Empty,
    Unauthorized,
}

impl From<QuantityError> for CartError {
    fn from(e: QuantityError) -> Self { Self::Quantity(e) }
}

impl std::error::Error for CartError {}
impl std::fmt::Display for CartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProductRequired => write!(f, "Product ID is required"),
            Self::Quantity(e) => write!(f, "{e}"),
            Self::ProductNotFound => write!(f, "Product not found"),
            Self::VariantRequired { .. } => write!(f, "This product has variants. variant_id is required."),
            Self::VariantNotFound => write!(f, "Variant not found"),
            Self::OutOfStock => write!(f, "This variant is out of stock"),
            Self::InsufficientStock { available } => write!(f, "Only {available} items available in stock"),
            Self::TooManyLines { max } => write!(f, "Cart cannot contain more than {max} different products"),
            Self::MergeAboveCap { max } => write!(f, "Total quantity cannot exceed {max} for this item"),
            Self::MergeAboveStock { available } => write!(f, "Cannot add more items. Available stock: {available}"),
            Self::ItemNotFound => write!(f, "Cart item not found"),
            Self::Empty => write!(f, "Cart is empty"),
            Self::Unauthorized => write!(f, "Unauthorized cart access"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::product::tests::{product, variant};

    fn line(id: i64, product_id: i64, variant_id: Option<i64>, quantity: i32) -> CartItem {
        let now = Utc::now();
        CartItem { id, cart_id: 1, product_id, variant_id, quantity, unit_price: Decimal::from(100), created_at: now, updated_at: now }
    }

    fn guest_cart() -> Cart {
        let device = DeviceId::parse("6f9619ff-8b86-d011-b42d-00c04fc964ff").unwrap();
        let mut cart = Cart::new(&CartOwner::Guest(device), Utc::now());
        cart.id = 1;
        cart
    }

    #[test]
    fn test_add_new_line_uses_unit_price() {
        let cart = guest_cart();
        let mut p = product(1, 1000);
        p.reduced_price_toman = Some(Decimal::from(900));
        let change = cart.plan_add(&p, &[], None, 2, &CartLimits::default()).unwrap();
        assert_eq!(change, LineChange::Insert { product_id: 1, variant_id: None, quantity: 2, unit_price: Decimal::from(900) });
    }

    #[test]
    fn test_add_requires_variant_when_present() {
        let cart = guest_cart();
        let p = product(1, 1000);
        let variants = vec![variant(7, 1, 1200, 5)];
        let err = cart.plan_add(&p, &variants, None, 1, &CartLimits::default()).unwrap_err();
        assert!(matches!(err, CartError::VariantRequired { ref available } if available.len() == 1));
        assert!(matches!(cart.plan_add(&p, &variants, Some(99), 1, &CartLimits::default()), Err(CartError::VariantNotFound)));
        assert!(matches!(cart.plan_add(&p, &variants, Some(7), 6, &CartLimits::default()), Err(CartError::InsufficientStock { available: 5 })));
    }

    #[test]
    fn test_merge_rechecks_caps() {
        let mut cart = guest_cart();
        cart.items.push(line(10, 1, Some(7), 4));
        let p = product(1, 1000);
        let variants = vec![variant(7, 1, 1200, 5)];
        let ok = cart.plan_add(&p, &variants, Some(7), 1, &CartLimits::default()).unwrap();
        assert_eq!(ok, LineChange::SetQuantity { item_id: 10, quantity: 5 });
        assert!(matches!(cart.plan_add(&p, &variants, Some(7), 2, &CartLimits::default()), Err(CartError::MergeAboveStock { available: 5 })));

        cart.items = vec![line(11, 2, None, 95)];
        let plain = product(2, 50);
        let err = cart.plan_add(&plain, &[], None, 6, &CartLimits::default()).unwrap_err();
        assert_eq!(err.to_string(), "Total quantity cannot exceed 100 for this item");
    }

    #[test]
    fn test_line_limit() {
        let mut cart = guest_cart();
        cart.items = (0..50).map(|i| line(i, 100 + i, None, 1)).collect();
        let err = cart.plan_add(&product(1, 10), &[], None, 1, &CartLimits::default()).unwrap_err();
        assert_eq!(err.to_string(), "Cart cannot contain more than 50 different products");
    }

    #[test]
    fn test_quantity_validation_and_remove() {
        let mut cart = guest_cart();
        let p = product(1, 10);
        assert_eq!(cart.plan_add(&p, &[], None, 0, &CartLimits::default()).unwrap_err().to_string(), "Quantity must be greater than 0");
        assert_eq!(cart.plan_add(&p, &[], None, 101, &CartLimits::default()).unwrap_err().to_string(), "Maximum quantity per item is 100");
        cart.items.push(line(3, 1, None, 4));
        assert_eq!(cart.plan_remove(3, Some(1)).unwrap(), LineChange::SetQuantity { item_id: 3, quantity: 3 });
        assert_eq!(cart.plan_remove(3, Some(4)).unwrap(), LineChange::Delete { item_id: 3 });
        assert_eq!(cart.plan_remove(3, None).unwrap(), LineChange::Delete { item_id: 3 });
        assert!(matches!(cart.plan_remove(99, None), Err(CartError::ItemNotFound)));
        assert_eq!(cart.plan_update(3, 8, None).unwrap(), LineChange::SetQuantity { item_id: 3, quantity: 8 });
    }

    #[test]
    fn test_owner_access() {
        let cart = guest_cart();
        let same = DeviceId::parse("6F9619FF-8B86-D011-B42D-00C04FC964FF").unwrap();
        let other = DeviceId::parse("00000000-0000-0000-0000-000000000001").unwrap();
        assert!(CartOwner::Guest(same).owns(&cart));
        assert!(!CartOwner::Guest(other).owns(&cart));
        assert!(!CartOwner::Customer(1).owns(&cart));
    }
}
