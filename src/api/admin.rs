//! `/api/admin`: staff-only catalog, order and special offer management.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;

use crate::api::error::ApiResult;
use crate::api::extract::StaffUser;
use crate::api::AppState;
use crate::domain::aggregates::{
    AttributeValue, Category, CategoryAttribute, Product, ProductAttributeValue, ProductVariant,
};
use crate::services::catalog::{AttributeInput, CategoryInput, CategoryNode, ProductDetail, ProductInput, ValueInput, VariantInput};
use crate::services::offers::{OfferInput, OfferProductInput, OfferProductView, OfferView};
use crate::services::orders::OrderView;
use crate::store::{OrderFilter, Page};
use crate::ShopError;

pub fn routes() -> Router<AppState> {
    Router::new()
        // catalog
        .route("/categories/", get(categories).post(create_category))
        .route("/categories/:id/", put(update_category).delete(delete_category))
        .route("/categories/:id/attributes/", post(create_attribute))
        .route("/attributes/:id/", put(update_attribute).delete(delete_attribute))
        .route("/attributes/:id/values/", post(create_value))
        .route("/values/:id/", put(update_value).delete(delete_value))
        .route("/products/", post(create_product))
        .route("/products/:id/", get(product).put(update_product).delete(delete_product))
        .route("/products/:id/attributes/", post(set_product_attribute))
        .route("/products/:id/variants/", post(create_variant))
        .route("/products/:id/variants/:variant_id/", put(update_variant))
        // orders
        .route("/orders/", get(orders))
        .route("/orders/export/csv/", get(export_orders))
        .route("/orders/:id/", get(order))
        .route("/orders/:id/paid/", post(set_order_paid))
        // special offers
        .route("/special-offers/", get(offers).post(create_offer))
        .route("/special-offers/:id/", get(offer).put(update_offer).delete(delete_offer))
        .route(
            "/special-offers/:id/products/",
            get(offer_products).post(add_offer_product).delete(remove_offer_product),
        )
}

// =============================================================================
// Catalog
// =============================================================================

async fn categories(State(state): State<AppState>, _staff: StaffUser) -> ApiResult<Json<Vec<CategoryNode>>> {
    Ok(Json(state.catalog.category_tree(true).await?))
}

async fn create_category(
    State(state): State<AppState>,
    _staff: StaffUser,
    Json(input): Json<CategoryInput>,
) -> ApiResult<(StatusCode, Json<Category>)> {
    Ok((StatusCode::CREATED, Json(state.catalog.create_category(input).await?)))
}

async fn update_category(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(id): Path<i64>,
    Json(input): Json<CategoryInput>,
) -> ApiResult<Json<Category>> {
    Ok(Json(state.catalog.update_category(id, input).await?))
}

async fn delete_category(State(state): State<AppState>, _staff: StaffUser, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.catalog.delete_category(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_attribute(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(category_id): Path<i64>,
    Json(input): Json<AttributeInput>,
) -> ApiResult<(StatusCode, Json<CategoryAttribute>)> {
    Ok((StatusCode::CREATED, Json(state.catalog.create_attribute(category_id, input).await?)))
}

async fn update_attribute(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(id): Path<i64>,
    Json(input): Json<AttributeInput>,
) -> ApiResult<Json<CategoryAttribute>> {
    Ok(Json(state.catalog.update_attribute(id, input).await?))
}

async fn delete_attribute(State(state): State<AppState>, _staff: StaffUser, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.catalog.delete_attribute(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_value(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(attribute_id): Path<i64>,
    Json(input): Json<ValueInput>,
) -> ApiResult<(StatusCode, Json<AttributeValue>)> {
    Ok((StatusCode::CREATED, Json(state.catalog.create_value(attribute_id, input).await?)))
}

#[derive(Debug, Deserialize)]
pub struct ValueOrder {
    pub display_order: i32,
}

async fn update_value(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(id): Path<i64>,
    Json(req): Json<ValueOrder>,
) -> ApiResult<Json<AttributeValue>> {
    Ok(Json(state.catalog.update_value(id, req.display_order).await?))
}

async fn delete_value(State(state): State<AppState>, _staff: StaffUser, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.catalog.delete_value(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_product(
    State(state): State<AppState>,
    _staff: StaffUser,
    Json(input): Json<ProductInput>,
) -> ApiResult<(StatusCode, Json<Product>)> {
    Ok((StatusCode::CREATED, Json(state.catalog.create_product(input).await?)))
}

async fn product(State(state): State<AppState>, _staff: StaffUser, Path(id): Path<i64>) -> ApiResult<Json<ProductDetail>> {
    Ok(Json(state.catalog.product_detail(id, true).await?))
}

async fn update_product(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(id): Path<i64>,
    Json(input): Json<ProductInput>,
) -> ApiResult<Json<Product>> {
    Ok(Json(state.catalog.update_product(id, input).await?))
}

async fn delete_product(
    State(state): State<AppState>,
    StaffUser(staff): StaffUser,
    Path(id): Path<i64>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<StatusCode> {
    let reason = params
        .get("reason")
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| format!("Deleted by {}", staff.email));
    state.catalog.delete_product(id, &reason).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct AttributeAssignment {
    pub key: String,
    pub value: String,
}

async fn set_product_attribute(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(id): Path<i64>,
    Json(req): Json<AttributeAssignment>,
) -> ApiResult<Json<ProductAttributeValue>> {
    Ok(Json(state.catalog.set_attribute_value(id, &req.key, &req.value).await?))
}

async fn create_variant(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(product_id): Path<i64>,
    Json(input): Json<VariantInput>,
) -> ApiResult<(StatusCode, Json<ProductVariant>)> {
    Ok((StatusCode::CREATED, Json(state.catalog.create_variant(product_id, input).await?)))
}

async fn update_variant(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path((product_id, variant_id)): Path<(i64, i64)>,
    Json(input): Json<VariantInput>,
) -> ApiResult<Json<ProductVariant>> {
    Ok(Json(state.catalog.update_variant(product_id, variant_id, input).await?))
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct OrderQuery {
    pub paid: Option<bool>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl From<OrderQuery> for OrderFilter {
    fn from(q: OrderQuery) -> Self {
        OrderFilter {
            paid: q.paid,
            search: q.search.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            page: q.page.unwrap_or(1).max(1),
            per_page: q.per_page.unwrap_or(20),
        }
    }
}

async fn orders(
    State(state): State<AppState>,
    _staff: StaffUser,
    Query(query): Query<OrderQuery>,
) -> ApiResult<Json<Page<OrderView>>> {
    Ok(Json(state.orders.list(&OrderFilter::from(query)).await?))
}

async fn order(State(state): State<AppState>, _staff: StaffUser, Path(id): Path<i64>) -> ApiResult<Json<OrderView>> {
    Ok(Json(state.orders.get(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct PaidRequest {
    pub paid: bool,
}

async fn set_order_paid(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(id): Path<i64>,
    Json(req): Json<PaidRequest>,
) -> ApiResult<Json<OrderView>> {
    Ok(Json(state.orders.set_paid(id, req.paid).await?))
}

async fn export_orders(State(state): State<AppState>, _staff: StaffUser) -> ApiResult<impl IntoResponse> {
    let body = state.orders.export_csv().await?;
    Ok((
        [(CONTENT_TYPE, "text/csv; charset=utf-8"), (CONTENT_DISPOSITION, "attachment; filename=\"orders.csv\"")],
        body,
    ))
}

// =============================================================================
// Special offers
// =============================================================================

async fn offers(State(state): State<AppState>, _staff: StaffUser) -> ApiResult<Json<Vec<OfferView>>> {
    Ok(Json(state.offers.all_offers().await?))
}

async fn create_offer(
    State(state): State<AppState>,
    _staff: StaffUser,
    Json(input): Json<OfferInput>,
) -> ApiResult<(StatusCode, Json<OfferView>)> {
    Ok((StatusCode::CREATED, Json(state.offers.create_offer(input).await?)))
}

async fn offer(State(state): State<AppState>, _staff: StaffUser, Path(id): Path<i64>) -> ApiResult<Json<OfferView>> {
    Ok(Json(state.offers.admin_offer(id).await?))
}

async fn update_offer(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(id): Path<i64>,
    Json(input): Json<OfferInput>,
) -> ApiResult<Json<OfferView>> {
    Ok(Json(state.offers.update_offer(id, input).await?))
}

async fn delete_offer(State(state): State<AppState>, _staff: StaffUser, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.offers.delete_offer(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn offer_products(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<OfferProductView>>> {
    Ok(Json(state.offers.offer_products(id).await?))
}

async fn add_offer_product(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(id): Path<i64>,
    Json(input): Json<OfferProductInput>,
) -> ApiResult<(StatusCode, Json<OfferProductView>)> {
    Ok((StatusCode::CREATED, Json(state.offers.add_product(id, input).await?)))
}

async fn remove_offer_product(
    State(state): State<AppState>,
    _staff: StaffUser,
    Path(id): Path<i64>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<StatusCode> {
    let product_id = params
        .get("product_id")
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .ok_or_else(|| ShopError::Validation("product_id is required".to_string()))?;
    state.offers.remove_product(id, product_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
