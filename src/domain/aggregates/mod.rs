//! Aggregates module

use std::fmt;

/// Closed set of lowercase codes stored as TEXT columns.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name { $(#[serde(rename = $text)] $variant),+ }

        impl $name {
            pub fn as_str(&self) -> &'static str { match self { $($name::$variant => $text),+ } }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::domain::aggregates::UnknownVariant;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::domain::aggregates::UnknownVariant { kind: stringify!($name), value: other.to_string() }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::domain::aggregates::UnknownVariant;
            fn try_from(s: String) -> Result<Self, Self::Error> { s.parse() }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
        }
    };
}

pub mod cart;
pub mod category;
pub mod customer;
pub mod offer;
pub mod order;
pub mod product;
pub mod security;
pub mod session;
pub mod wishlist;

pub use cart::{Cart, CartError, CartItem, CartLimits, CartOwner, LineChange};
pub use category::{
    categorization_key, AttributeType, AttributeValue, Category, CategoryAttribute, CategoryTree, CategoryType, Gender,
};
pub use customer::{Address, AddressFields, Customer, LoginMethod};
pub use offer::{ActionType, DisplayStyle, OfferType, SpecialOffer, SpecialOfferProduct};
pub use order::{DeliveryOption, Order, OrderItem, PaymentMethod, TrackingInfo};
pub use product::{DeletedProduct, Product, ProductAttributeValue, ProductVariant};
pub use security::{AccountLock, CodeCheck, LoginAttempt, SecurityAssessment, SecurityPolicy, Tier, VerificationCode};
pub use session::{DeviceInfo, DeviceInfoInput, DeviceType, UserSession};
pub use wishlist::{Priority, WishlistEntry};

#[derive(Debug, Clone)]
pub struct UnknownVariant { pub kind: &'static str, pub value: String }
impl std::error::Error for UnknownVariant {}
impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "unknown {} {:?}", self.kind, self.value) }
}
