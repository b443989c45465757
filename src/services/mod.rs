//! Application services: the use cases behind the HTTP routes.
//!
//! Each service holds an `Arc<dyn Store>` plus whatever collaborators it
//! needs and is cheap to clone into handler state.

pub mod accounts;
pub mod auth;
pub mod cart;
pub mod catalog;
pub mod events;
pub mod mail;
pub mod offers;
pub mod orders;
pub mod rate_limit;
pub mod security;
pub mod sessions;
pub mod wishlist;

use std::time::Instant;

pub use accounts::AccountService;
pub use auth::{Claims, TokenPair, TokenService, TokenType};
pub use cart::CartService;
pub use catalog::CatalogService;
pub use events::EventPublisher;
pub use mail::{EmailBackend, LogBackend, Mailer, MemoryBackend, SmtpBackend};
pub use offers::OfferService;
pub use orders::OrderService;
pub use rate_limit::{RateLimiter, ShopThrottle};
pub use security::LoginSecurity;
pub use sessions::SessionService;
pub use wishlist::WishlistService;

/// Where a request came from and when it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: String,
    pub received_at: Instant,
}

impl ClientInfo {
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self { ip: ip.into(), user_agent: user_agent.into(), received_at: Instant::now() }
    }

    /// Milliseconds since the request arrived.
    pub fn elapsed_ms(&self) -> i32 { i32::try_from(self.received_at.elapsed().as_millis()).unwrap_or(i32::MAX) }
}

/// Runs the `validator` rules on a request body, folding the failures into one message.
pub fn validate<T: validator::Validate>(input: &T) -> crate::Result<()> {
    input.validate().map_err(|errors| {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(message) => format!("{field}: {message}"),
                    None => format!("{field}: invalid value"),
                })
            })
            .collect();
        messages.sort();
        crate::ShopError::Validation(messages.join("; "))
    })
}
