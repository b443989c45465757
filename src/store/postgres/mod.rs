//! PostgreSQL backend over a `sqlx` pool.

mod accounts;
mod catalog;
mod commerce;

use sqlx::migrate::MigrateError;
use sqlx::PgPool;

use crate::ShopError;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub fn pool(&self) -> &PgPool { &self.pool }

    pub async fn migrate(&self) -> Result<(), MigrateError> { sqlx::migrate!("./migrations").run(&self.pool).await }
}

/// Unique-constraint name to the conflict message it surfaces as.
const UNIQUE_MESSAGES: &[(&str, &str)] = &[
    ("customers_email_key", "A customer with this email already exists"),
    ("customers_username_key", "A customer with this username already exists"),
    ("categories_name_key", "A category with this name already exists"),
    ("category_attributes_category_id_key_key", "An attribute with this key already exists"),
    ("attribute_values_attribute_id_value_key", "This value already exists"),
    ("product_variants_sku_key", "A variant with this SKU already exists"),
];

impl From<sqlx::Error> for ShopError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.code().as_deref() == Some("23505") {
                let message = db
                    .constraint()
                    .and_then(|c| UNIQUE_MESSAGES.iter().find(|(name, _)| *name == c))
                    .map(|(_, msg)| msg.to_string())
                    .unwrap_or_else(|| "Record already exists".to_string());
                return ShopError::Conflict(message);
            }
        }
        ShopError::Storage(e.to_string())
    }
}
