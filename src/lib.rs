//! myshop - Persian storefront backend
//!
//! JSON API for a Persian-language shop.
//!
//! ## Features
//! - Category tree with inherited, per-category product attributes
//! - Products, variants and special offers
//! - Guest (device bound) and customer carts, checkout, orders
//! - Wishlists
//! - JWT login guarded by a five tier throttling and lockout policy
//! - Multi-device session tracking

pub mod api;
pub mod config;
pub mod domain;
pub mod services;
pub mod store;

use thiserror::Error;

use crate::domain::aggregates::CartError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum ShopError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    RateLimited(String),

    #[error("{0}")]
    VerificationRequired(String),

    #[error(transparent)]
    Cart(#[from] CartError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ShopError>;
