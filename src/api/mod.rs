//! HTTP surface: shared state, router and handlers.
//!
//! Routes live under `/api/accounts`, `/api/shop` and `/api/admin`; every path
//! ends with a slash.

pub mod accounts;
pub mod admin;
pub mod error;
pub mod extract;
pub mod shop;

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::services::{
    AccountService, CartService, CatalogService, EmailBackend, EventPublisher, LoginSecurity, Mailer, OfferService,
    OrderService, SessionService, ShopThrottle, TokenService, WishlistService,
};
use crate::store::Store;

pub use error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub accounts: AccountService,
    pub security: LoginSecurity,
    pub sessions: SessionService,
    pub catalog: CatalogService,
    pub carts: CartService,
    pub orders: OrderService,
    pub wishlists: WishlistService,
    pub offers: OfferService,
    pub throttle: ShopThrottle,
}

/// Wires the services over one store.
pub fn build_state(
    config: Config,
    store: Arc<dyn Store>,
    backend: Arc<dyn EmailBackend>,
    nats: Option<async_nats::Client>,
) -> AppState {
    let events = EventPublisher::new(nats);
    let mailer = Mailer::new(backend, config.mail_from.clone(), config.public_base_url.clone());
    let tokens = TokenService::new(&config.jwt_secret, config.access_token_ttl, config.refresh_token_ttl);
    let security = LoginSecurity::new(store.clone(), config.security.clone(), mailer.clone(), events.clone());
    let sessions = SessionService::new(store.clone());
    let accounts =
        AccountService::new(store.clone(), tokens, security.clone(), sessions.clone(), mailer, events.clone());

    AppState {
        accounts,
        security,
        sessions,
        catalog: CatalogService::new(store.clone(), events.clone()),
        carts: CartService::new(store.clone()),
        orders: OrderService::new(store.clone(), events.clone()),
        wishlists: WishlistService::new(store.clone()),
        offers: OfferService::new(store.clone(), events),
        throttle: ShopThrottle::default(),
        store,
        config: Arc::new(config),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/accounts", accounts::routes())
        .nest("/api/shop", shop::routes())
        .nest("/api/admin", admin::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy", "service": "myshop"}))
}
