//! Value objects shared by the aggregates

pub mod text;

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stock keeping unit, stored uppercase.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sku(String);

impl Sku {
    pub fn new(value: impl Into<String>) -> Result<Self, SkuError> {
        let value = value.into().trim().to_uppercase();
        if value.is_empty() { return Err(SkuError::Empty); }
        if value.chars().count() > 100 { return Err(SkuError::TooLong); }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Sku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone)] pub enum SkuError { Empty, TooLong }
impl std::error::Error for SkuError {}
impl fmt::Display for SkuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::Empty => write!(f, "SKU empty"), Self::TooLong => write!(f, "SKU too long") }
    }
}

/// Quantity of a single cart line, bounded by the per-item cap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quantity(u32);

impl Quantity {
    pub const MAX_PER_ITEM: u32 = 100;

    pub fn new(value: i64) -> Result<Self, QuantityError> {
        if value <= 0 { return Err(QuantityError::NotPositive); }
        if value > i64::from(Self::MAX_PER_ITEM) { return Err(QuantityError::AboveCap(Self::MAX_PER_ITEM)); }
        Ok(Self(value as u32))
    }
    pub fn value(&self) -> u32 { self.0 }
    pub fn add(&self, other: Quantity) -> Result<Self, QuantityError> {
        Self::new(i64::from(self.0) + i64::from(other.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum QuantityError { NotPositive, AboveCap(u32) }
impl std::error::Error for QuantityError {}
impl fmt::Display for QuantityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPositive => write!(f, "Quantity must be greater than 0"),
            Self::AboveCap(max) => write!(f, "Maximum quantity per item is {max}"),
        }
    }
}

/// Guest device identifier sent in `X-Device-ID`: a UUID, trimmed and lowercased.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn parse(raw: &str) -> Result<Self, DeviceIdError> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() { return Err(DeviceIdError::Missing); }
        Uuid::parse_str(&normalized).map_err(|_| DeviceIdError::Invalid)?;
        Ok(Self(normalized))
    }
    pub fn as_str(&self) -> &str { &self.0 }
    /// Short form for log lines.
    pub fn short(&self) -> &str { &self.0[..8.min(self.0.len())] }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum DeviceIdError { Missing, Invalid }
impl std::error::Error for DeviceIdError {}
impl fmt::Display for DeviceIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "Device ID required for guest users. Send X-Device-ID header."),
            Self::Invalid => write!(f, "Invalid device ID format"),
        }
    }
}

/// Login identity: trimmed and lowercased.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Email(String);

impl Email {
    pub fn new(raw: &str) -> Result<Self, EmailError> {
        let value = raw.trim().to_lowercase();
        match value.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(Self(value)),
            _ => Err(EmailError),
        }
    }
    pub fn as_str(&self) -> &str { &self.0 }
    pub fn local_part(&self) -> &str { self.0.split('@').next().unwrap_or_default() }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone)] pub struct EmailError;
impl std::error::Error for EmailError {}
impl fmt::Display for EmailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Enter a valid email address") }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_sku() { let sku = Sku::new(" prod-001 ").unwrap(); assert_eq!(sku.as_str(), "PROD-001"); }
    #[test]
    fn test_quantity_bounds() {
        assert_eq!(Quantity::new(0), Err(QuantityError::NotPositive));
        assert_eq!(Quantity::new(101), Err(QuantityError::AboveCap(100)));
        let q = Quantity::new(60).unwrap();
        assert!(q.add(Quantity::new(41).unwrap()).is_err());
        assert_eq!(q.add(Quantity::new(40).unwrap()).unwrap().value(), 100);
    }
    #[test]
    fn test_device_id_normalized() {
        let id = DeviceId::parse("  6F9619FF-8B86-D011-B42D-00C04FC964FF ").unwrap();
        assert_eq!(id.as_str(), "6f9619ff-8b86-d011-b42d-00c04fc964ff");
        assert_eq!(DeviceId::parse("not-a-uuid"), Err(DeviceIdError::Invalid));
        assert_eq!(DeviceId::parse("   "), Err(DeviceIdError::Missing));
    }
    #[test]
    fn test_email() {
        let email = Email::new(" Ali.Rezaei@Example.COM ").unwrap();
        assert_eq!(email.as_str(), "ali.rezaei@example.com");
        assert_eq!(email.local_part(), "ali.rezaei");
        assert!(Email::new("nobody").is_err());
    }
}
