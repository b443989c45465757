//! HTTP mapping of [`ShopError`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::domain::aggregates::CartError;
use crate::ShopError;

/// Handler error: wraps [`ShopError`] so `?` works in handlers.
#[derive(Debug)]
pub struct ApiError(pub ShopError);

pub type ApiResult<T> = Result<T, ApiError>;

impl<E: Into<ShopError>> From<E> for ApiError {
    fn from(e: E) -> Self { Self(e.into()) }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ShopError::NotFound(_) => StatusCode::NOT_FOUND,
            ShopError::Validation(_) | ShopError::VerificationRequired(_) => StatusCode::BAD_REQUEST,
            ShopError::Conflict(_) => StatusCode::CONFLICT,
            ShopError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ShopError::Forbidden(_) => StatusCode::FORBIDDEN,
            ShopError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ShopError::Cart(CartError::ProductNotFound | CartError::VariantNotFound | CartError::ItemNotFound) => {
                StatusCode::NOT_FOUND
            }
            ShopError::Cart(CartError::Unauthorized) => StatusCode::FORBIDDEN,
            ShopError::Cart(_) => StatusCode::BAD_REQUEST,
            ShopError::Storage(_) | ShopError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self.0 {
            ShopError::VerificationRequired(message) => json!({"verification_required": true, "message": message}),
            ShopError::Unauthorized(message) | ShopError::Forbidden(message) | ShopError::RateLimited(message) => {
                json!({"detail": message})
            }
            ShopError::Cart(e @ CartError::VariantRequired { available }) => {
                let variants: Vec<_> = available
                    .iter()
                    .map(|v| json!({"id": v.id, "sku": v.sku, "attributes": v.attributes, "stock": v.stock_quantity}))
                    .collect();
                json!({"error": e.to_string(), "available_variants": variants})
            }
            ShopError::Storage(_) | ShopError::Internal(_) => {
                tracing::error!(error = %self.0, "request failed");
                json!({"error": "Internal server error"})
            }
            other => json!({"error": other.to_string()}),
        };
        (status, Json(body)).into_response()
    }
}
