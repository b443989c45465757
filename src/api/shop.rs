//! `/api/shop`: public catalog, carts, checkout, customer orders, wishlists and
//! special offers.

use std::collections::{BTreeMap, HashMap};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::api::error::ApiResult;
use crate::api::extract::{AuthUser, Shopper};
use crate::api::AppState;
use crate::domain::aggregates::{ProductVariant, TrackingInfo};
use crate::services::cart::{AddToCart, CartView, RemoveCartItem, UpdateCartItem};
use crate::services::catalog::{
    AttributeWithValues, CategorizationKey, CategoryNode, CategoryProducts, ProductCard, ProductDetail, ProductQuery,
    TagView, NEW_ARRIVALS, POPULAR_TAGS,
};
use crate::services::offers::OfferView;
use crate::services::orders::{CancelInput, CancellationView, CheckoutInput, CheckoutResponse, OrderView};
use crate::services::wishlist::{ToggleInput, ToggleResult, WishlistInput, WishlistView};
use crate::store::Page;

pub fn routes() -> Router<AppState> {
    Router::new()
        // catalog
        .route("/categories/", get(categories))
        .route("/categories/:id/", get(category))
        .route("/categories/:id/attributes/", get(category_attributes))
        .route("/categories/:id/categorization-key/", get(categorization_key))
        .route("/categories/:id/products/", get(category_products))
        .route("/products/", get(products))
        .route("/products/:id/", get(product))
        .route("/products/:id/variants/", get(product_variants))
        .route("/products/:id/similar-by-tags/", get(similar_by_tags))
        .route("/tags/popular/", get(popular_tags))
        .route("/new-arrivals/", get(new_arrivals))
        // cart & checkout
        .route("/cart/", get(view_cart))
        .route("/cart/add/", post(add_to_cart))
        .route("/cart/update/", post(update_cart_item))
        .route("/cart/remove/", post(remove_cart_item))
        .route("/checkout/", post(checkout))
        // orders
        .route("/orders/", get(orders))
        .route("/orders/:id/", get(order))
        .route("/orders/:id/cancel/", post(cancel_order))
        .route("/orders/:id/track/", get(track_order))
        // wishlist
        .route("/wishlist/", get(wishlist).post(save_to_wishlist))
        .route("/wishlist/product/:product_id/", delete(remove_from_wishlist))
        .route("/wishlist/toggle/", post(toggle_wishlist))
        .route("/wishlist/status/", get(wishlist_status))
        // special offers
        .route("/special-offers/", get(special_offers))
        .route("/special-offers/:id/", get(special_offer))
        .route("/special-offers/:id/click/", post(special_offer_click))
        .route("/special-offers/type/:offer_type/", get(special_offers_by_type))
}

// =============================================================================
// Catalog
// =============================================================================

async fn categories(State(state): State<AppState>) -> ApiResult<Json<Vec<CategoryNode>>> {
    Ok(Json(state.catalog.category_tree(false).await?))
}

async fn category(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<CategoryNode>> {
    Ok(Json(state.catalog.category_node(id, false).await?))
}

async fn category_attributes(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Vec<AttributeWithValues>>> {
    Ok(Json(state.catalog.category_attributes(id).await?))
}

async fn categorization_key(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<CategorizationKey>> {
    Ok(Json(state.catalog.categorization_key(id).await?))
}

async fn category_products(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<CategoryProducts>> {
    let query = ProductQuery::from_params(&params)?;
    Ok(Json(state.catalog.category_products(id, &query).await?))
}

async fn products(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Page<ProductCard>>> {
    let query = ProductQuery::from_params(&params)?;
    Ok(Json(state.catalog.products(&query).await?))
}

async fn product(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<ProductDetail>> {
    Ok(Json(state.catalog.product_detail(id, false).await?))
}

async fn product_variants(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Vec<ProductVariant>>> {
    Ok(Json(state.catalog.variants(id).await?))
}

async fn similar_by_tags(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Vec<ProductCard>>> {
    Ok(Json(state.catalog.similar_by_tags(id).await?))
}

async fn popular_tags(State(state): State<AppState>) -> ApiResult<Json<Vec<TagView>>> {
    Ok(Json(state.catalog.popular_tags(POPULAR_TAGS).await?))
}

async fn new_arrivals(State(state): State<AppState>) -> ApiResult<Json<Vec<ProductCard>>> {
    Ok(Json(state.catalog.new_arrivals(NEW_ARRIVALS).await?))
}

// =============================================================================
// Cart & checkout
// =============================================================================

async fn view_cart(State(state): State<AppState>, shopper: Shopper) -> ApiResult<Json<CartView>> {
    shopper.throttle(&state.throttle.cart).await?;
    Ok(Json(state.carts.view(&shopper.owner).await?))
}

async fn add_to_cart(
    State(state): State<AppState>,
    shopper: Shopper,
    Json(input): Json<AddToCart>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    shopper.throttle(&state.throttle.cart).await?;
    let cart = state.carts.add(&shopper.owner, input).await?;
    Ok((StatusCode::CREATED, Json(json!({"message": "Item added to cart successfully", "cart": cart}))))
}

async fn update_cart_item(
    State(state): State<AppState>,
    shopper: Shopper,
    Json(input): Json<UpdateCartItem>,
) -> ApiResult<Json<Value>> {
    shopper.throttle(&state.throttle.cart).await?;
    let cart = state.carts.update(&shopper.owner, input).await?;
    Ok(Json(json!({"message": "Cart item updated successfully", "cart": cart})))
}

async fn remove_cart_item(
    State(state): State<AppState>,
    shopper: Shopper,
    Json(input): Json<RemoveCartItem>,
) -> ApiResult<Json<Value>> {
    shopper.throttle(&state.throttle.cart).await?;
    let item_id = input.item_id;
    let cart = state.carts.remove(&shopper.owner, input).await?;
    let message = if cart.items.iter().any(|line| line.id == item_id) {
        "Cart item quantity decreased successfully"
    } else {
        "Cart item removed successfully"
    };
    Ok(Json(json!({"message": message, "cart": cart})))
}

async fn checkout(
    State(state): State<AppState>,
    shopper: Shopper,
    Json(input): Json<CheckoutInput>,
) -> ApiResult<(StatusCode, Json<CheckoutResponse>)> {
    shopper.throttle(&state.throttle.checkout).await?;
    let placed = state.orders.checkout(&shopper.owner, shopper.customer.as_ref(), input).await?;
    Ok((StatusCode::CREATED, Json(placed)))
}

// =============================================================================
// Orders
// =============================================================================

async fn orders(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Vec<OrderView>>> {
    Ok(Json(state.orders.orders_for(&user.customer.email).await?))
}

async fn order(State(state): State<AppState>, user: AuthUser, Path(id): Path<i64>) -> ApiResult<Json<OrderView>> {
    Ok(Json(state.orders.order_for(&user.customer.email, id).await?))
}

async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    body: Option<Json<CancelInput>>,
) -> ApiResult<Json<CancellationView>> {
    let input = body.map(|Json(input)| input).unwrap_or_default();
    Ok(Json(state.orders.cancel(&user.customer.email, id, input).await?))
}

async fn track_order(State(state): State<AppState>, user: AuthUser, Path(id): Path<i64>) -> ApiResult<Json<TrackingInfo>> {
    Ok(Json(state.orders.track(&user.customer.email, id).await?))
}

// =============================================================================
// Wishlist
// =============================================================================

async fn wishlist(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Vec<WishlistView>>> {
    Ok(Json(state.wishlists.list(user.customer.id).await?))
}

async fn save_to_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<WishlistInput>,
) -> ApiResult<(StatusCode, Json<WishlistView>)> {
    let (view, created) = state.wishlists.upsert(user.customer.id, input).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(view)))
}

async fn remove_from_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.wishlists.remove(user.customer.id, product_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<ToggleInput>,
) -> ApiResult<Json<ToggleResult>> {
    Ok(Json(state.wishlists.toggle(user.customer.id, input.product_id).await?))
}

async fn wishlist_status(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<BTreeMap<i64, bool>>> {
    let ids = params.get("product_ids").map(String::as_str).unwrap_or_default();
    Ok(Json(state.wishlists.status(user.customer.id, ids).await?))
}

// =============================================================================
// Special offers
// =============================================================================

async fn special_offers(State(state): State<AppState>) -> ApiResult<Json<Vec<OfferView>>> {
    Ok(Json(state.offers.valid_offers().await?))
}

async fn special_offer(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<OfferView>> {
    Ok(Json(state.offers.offer(id).await?))
}

async fn special_offer_click(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    state.offers.click(id).await?;
    Ok(Json(json!({"success": true, "message": "Click tracked successfully"})))
}

async fn special_offers_by_type(
    State(state): State<AppState>,
    Path(offer_type): Path<String>,
) -> ApiResult<Json<Vec<OfferView>>> {
    Ok(Json(state.offers.by_type(&offer_type).await?))
}
