//! Request extractors: client address, bearer auth and cart ownership.

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::header::{AUTHORIZATION, USER_AGENT};
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::domain::aggregates::{CartOwner, Customer};
use crate::domain::value_objects::DeviceId;
use crate::services::rate_limit::THROTTLED_MESSAGE;
use crate::services::{Claims, ClientInfo, RateLimiter};
use crate::ShopError;

pub const DEVICE_HEADER: &str = "x-device-id";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim).filter(|v| !v.is_empty())
}

/// First `X-Forwarded-For` hop, else `X-Real-IP`, else the peer address.
pub fn client_ip(parts: &Parts) -> String {
    if let Some(forwarded) = header(&parts.headers, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|ip| !ip.is_empty()) {
            return first.to_string();
        }
    }
    if let Some(real) = header(&parts.headers, "x-real-ip") {
        return real.to_string();
    }
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn bearer(parts: &Parts) -> Option<&str> {
    header(&parts.headers, AUTHORIZATION.as_str()).and_then(|v| v.strip_prefix("Bearer ")).map(str::trim)
}

#[async_trait]
impl FromRequestParts<AppState> for ClientInfo {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &AppState) -> Result<Self, Self::Rejection> {
        let user_agent = header(&parts.headers, USER_AGENT.as_str()).unwrap_or_default();
        Ok(ClientInfo::new(client_ip(parts), user_agent))
    }
}

/// A customer authenticated by a bearer access token.
pub struct AuthUser {
    pub customer: Customer,
    pub claims: Claims,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer(parts)
            .ok_or_else(|| ShopError::Unauthorized("Authentication credentials were not provided.".to_string()))?;
        let (customer, claims) = state.accounts.authenticate_access(token).await?;
        Ok(Self { customer, claims })
    }
}

/// Like [`AuthUser`] but anonymous requests pass through. A token that is sent
/// but does not verify still rejects.
pub struct OptionalAuth(pub Option<AuthUser>);

#[async_trait]
impl FromRequestParts<AppState> for OptionalAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if bearer(parts).is_none() {
            return Ok(Self(None));
        }
        AuthUser::from_request_parts(parts, state).await.map(|user| Self(Some(user)))
    }
}

pub struct StaffUser(pub Customer);

#[async_trait]
impl FromRequestParts<AppState> for StaffUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.customer.is_staff {
            return Err(ShopError::Forbidden("You do not have permission to perform this action.".to_string()).into());
        }
        Ok(Self(user.customer))
    }
}

/// Who a cart request acts for: the signed-in customer, else the guest device.
pub struct Shopper {
    pub owner: CartOwner,
    pub customer: Option<Customer>,
    pub client: ClientInfo,
}

impl Shopper {
    /// Applies `limiter` per IP and, for guests, per device.
    pub async fn throttle(&self, limiter: &RateLimiter) -> Result<(), ApiError> {
        let mut allowed = limiter.allow(&format!("ip:{}", self.client.ip)).await;
        if let CartOwner::Guest(device) = &self.owner {
            allowed &= limiter.allow(&format!("device:{}", device.as_str())).await;
        }
        if !allowed {
            tracing::warn!(ip = %self.client.ip, "shop request throttled");
            return Err(ShopError::RateLimited(THROTTLED_MESSAGE.to_string()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Shopper {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let client = ClientInfo::from_request_parts(parts, state).await?;
        if let OptionalAuth(Some(user)) = OptionalAuth::from_request_parts(parts, state).await? {
            return Ok(Self { owner: CartOwner::Customer(user.customer.id), customer: Some(user.customer), client });
        }
        let raw = header(&parts.headers, DEVICE_HEADER).unwrap_or_default();
        let device = DeviceId::parse(raw).map_err(|e| ShopError::Validation(e.to_string()))?;
        Ok(Self { owner: CartOwner::Guest(device), customer: None, client })
    }
}
