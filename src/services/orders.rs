//! Checkout and order management.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::aggregates::customer::{DEFAULT_COUNTRY, MAX_ADDRESSES};
use crate::domain::aggregates::order::{split_name, DEFAULT_CITY, DEFAULT_POSTAL_CODE};
use crate::domain::aggregates::{
    Address, AddressFields, CartError, CartOwner, Customer, DeliveryOption, Order, OrderItem, PaymentMethod, TrackingInfo,
};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::services::EventPublisher;
use crate::store::{OrderFilter, Page, Store};
use crate::{Result, ShopError};

pub const MISSING_ADDRESS_FIELDS: &str =
    "Missing required address fields: receiver_name, street_address, city, and phone are required";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutInput {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub address_id: Option<i64>,
    #[serde(default)]
    pub receiver_name: String,
    #[serde(default, alias = "delivery_address")]
    pub street_address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub province: String,
    #[serde(default, alias = "unit")]
    pub vahed: String,
    #[serde(default, alias = "phone_number")]
    pub phone: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub address_label: String,
    #[serde(default = "default_delivery")]
    pub delivery_option: String,
    #[serde(default = "default_payment")]
    pub payment_method: String,
    #[serde(default, alias = "delivery_notes")]
    pub notes: String,
}

fn default_delivery() -> String { "standard".to_string() }
fn default_payment() -> String { "cod".to_string() }

#[derive(Debug, Clone, Serialize)]
pub struct PlacedOrder {
    pub id: i64,
    pub order_number: String,
    pub status: &'static str,
    pub total_toman: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub success: bool,
    pub order: PlacedOrder,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CancelInput {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancellationView {
    pub message: &'static str,
    pub order_id: i64,
    pub order_number: String,
    pub status: &'static str,
    pub reason: String,
    pub comment: String,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderLineView {
    pub id: i64,
    pub product_id: Option<i64>,
    pub product_name: String,
    pub price: Decimal,
    pub quantity: i32,
    pub total: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderSummary {
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub total: Decimal,
    pub item_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub id: i64,
    pub order_number: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub address: String,
    pub postal_code: String,
    pub city: String,
    pub paid: bool,
    pub status: &'static str,
    pub delivery_option: String,
    pub payment_method: String,
    pub total_amount: Decimal,
    pub notes: String,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderLineView>,
    pub order_summary: OrderSummary,
}

impl From<&Order> for OrderView {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number(),
            first_name: order.first_name.clone(),
            last_name: order.last_name.clone(),
            email: order.email.clone(),
            address: order.address.clone(),
            postal_code: order.postal_code.clone(),
            city: order.city.clone(),
            paid: order.paid,
            status: order.status(),
            delivery_option: order.delivery_option.clone(),
            payment_method: order.payment_method.clone(),
            total_amount: order.total(),
            notes: order.notes.clone(),
            cancellation_reason: order.cancellation_reason.clone(),
            created_at: order.created,
            updated_at: order.updated,
            items: order
                .items
                .iter()
                .map(|i| OrderLineView {
                    id: i.id,
                    product_id: i.product_id,
                    product_name: i.product_name.clone(),
                    price: i.price,
                    quantity: i.quantity,
                    total: i.total(),
                })
                .collect(),
            order_summary: OrderSummary {
                subtotal: order.subtotal(),
                delivery_fee: order.shipping_cost,
                total: order.total(),
                item_count: order.items.len(),
            },
        }
    }
}

/// Where the parcel goes, resolved from a saved address or inline fields.
struct Destination {
    receiver_name: String,
    address: String,
    postal_code: String,
    city: String,
}

impl Destination {
    fn from_fields(fields: &AddressFields) -> Self {
        let or = |value: &str, fallback: &str| {
            let value = value.trim();
            if value.is_empty() { fallback.to_string() } else { value.to_string() }
        };
        Self {
            receiver_name: fields.receiver_name.trim().to_string(),
            address: fields.full_address(),
            postal_code: or(&fields.postal_code, DEFAULT_POSTAL_CODE),
            city: or(&fields.city, DEFAULT_CITY),
        }
    }
}

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn Store>,
    events: EventPublisher,
}

impl OrderService {
    pub fn new(store: Arc<dyn Store>, events: EventPublisher) -> Self { Self { store, events } }

    /// Turns the owner's cart into an order and empties the cart.
    pub async fn checkout(&self, owner: &CartOwner, customer: Option<&Customer>, input: CheckoutInput) -> Result<CheckoutResponse> {
        let cart = match self.store.cart_for(owner).await? {
            Some(cart) if !cart.is_empty() => cart,
            _ => return Err(CartError::Empty.into()),
        };

        let (email, first_name, last_name) = match customer {
            Some(c) => {
                let first = if c.first_name.trim().is_empty() { c.username.clone() } else { c.first_name.clone() };
                (c.email.clone(), first, c.last_name.clone())
            }
            None => {
                let email = input.email.trim().to_lowercase();
                if email.is_empty() {
                    return Err(ShopError::Validation("Email is required for guest checkout".to_string()));
                }
                (email, input.first_name.trim().to_string(), input.last_name.trim().to_string())
            }
        };

        let destination = match (input.address_id, customer) {
            (Some(address_id), Some(c)) => {
                let address = self
                    .store
                    .addresses(c.id)
                    .await?
                    .into_iter()
                    .find(|a| a.id == address_id)
                    .ok_or(ShopError::NotFound("Address"))?;
                Destination::from_fields(&address.fields)
            }
            _ => {
                let mut fields = AddressFields {
                    label: if input.address_label.trim().is_empty() { "Home".to_string() } else { input.address_label.clone() },
                    receiver_name: input.receiver_name.clone(),
                    street_address: input.street_address.clone(),
                    city: input.city.clone(),
                    province: input.province.clone(),
                    vahed: input.vahed.clone(),
                    phone: input.phone.clone(),
                    country: if input.country.trim().is_empty() { DEFAULT_COUNTRY.to_string() } else { input.country.clone() },
                    postal_code: input.postal_code.clone(),
                };
                if fields.receiver_name.trim().is_empty() {
                    fields.receiver_name = format!("{first_name} {last_name}").trim().to_string();
                }
                if fields.missing_required().is_some() {
                    return Err(ShopError::Validation(MISSING_ADDRESS_FIELDS.to_string()));
                }
                if let Some(c) = customer {
                    self.remember_address(c.id, &fields).await?;
                }
                Destination::from_fields(&fields)
            }
        };

        let (receiver_first, receiver_last) = split_name(&destination.receiver_name);
        let first_name = if first_name.is_empty() { receiver_first } else { first_name };
        let last_name = if last_name.is_empty() { receiver_last } else { last_name };

        let ids: Vec<i64> = cart.items.iter().map(|i| i.product_id).collect();
        let names: HashMap<i64, String> =
            self.store.products_by_ids(&ids).await?.into_iter().map(|p| (p.id, p.name)).collect();
        let items = cart
            .items
            .iter()
            .map(|line| OrderItem {
                id: 0,
                order_id: 0,
                product_id: Some(line.product_id),
                product_name: names.get(&line.product_id).cloned().unwrap_or_default(),
                price: line.unit_price,
                quantity: line.quantity,
            })
            .collect();

        let delivery = DeliveryOption::from_code(&input.delivery_option);
        let payment = PaymentMethod::from_code(&input.payment_method);
        let now = Utc::now();
        let order = Order {
            id: 0,
            first_name: if first_name.is_empty() { "Guest".to_string() } else { first_name },
            last_name,
            email,
            address: destination.address,
            postal_code: destination.postal_code,
            city: destination.city,
            paid: payment.marks_paid(),
            delivery_option: input.delivery_option.trim().to_string(),
            payment_method: input.payment_method.trim().to_string(),
            shipping_cost: delivery.shipping_cost(),
            notes: input.notes,
            cancellation_reason: None,
            cancellation_comment: None,
            cancellation_requested_at: None,
            created: now,
            updated: now,
            items,
        };
        let order = self.store.place_order(order, cart.id).await?;
        tracing::info!(order = order.id, email = %order.email, total = %order.total(), paid = order.paid, "order placed");
        self.events
            .publish(DomainEvent::Order(OrderEvent::Placed { order_id: order.id, email: order.email.clone(), total: order.total() }))
            .await;

        Ok(CheckoutResponse {
            success: true,
            order: PlacedOrder {
                id: order.id,
                order_number: order.order_number(),
                status: order.status(),
                total_toman: order.total(),
                created_at: order.created,
            },
        })
    }

    /// Saves an inline checkout address unless it is already known or the book is full.
    async fn remember_address(&self, customer_id: i64, fields: &AddressFields) -> Result<Option<Address>> {
        let existing = self.store.addresses(customer_id).await?;
        if let Some(same) = existing.iter().find(|a| a.fields.same_place(fields)) {
            return Ok(Some(same.clone()));
        }
        if existing.len() >= MAX_ADDRESSES {
            tracing::info!(customer = customer_id, "address book full, checkout address not saved");
            return Ok(None);
        }
        let now = Utc::now();
        let address = Address { id: 0, customer_id, fields: fields.clone(), created_at: now, updated_at: now };
        Ok(Some(self.store.insert_address(address).await?))
    }

    pub async fn orders_for(&self, email: &str) -> Result<Vec<OrderView>> {
        Ok(self.store.orders_by_email(email).await?.iter().map(OrderView::from).collect())
    }

    async fn owned_order(&self, email: &str, order_id: i64) -> Result<Order> {
        match self.store.order(order_id).await? {
            Some(order) if order.email == email => Ok(order),
            _ => Err(ShopError::NotFound("Order")),
        }
    }

    pub async fn order_for(&self, email: &str, order_id: i64) -> Result<OrderView> {
        Ok(OrderView::from(&self.owned_order(email, order_id).await?))
    }

    pub async fn cancel(&self, email: &str, order_id: i64, input: CancelInput) -> Result<CancellationView> {
        let mut order = self.owned_order(email, order_id).await?;
        order.request_cancellation(input.reason.as_deref(), &input.comment, Utc::now());
        self.store.update_order(&order).await?;
        let reason = order.cancellation_reason.clone().unwrap_or_default();
        tracing::info!(order = order.id, reason = %reason, "order cancellation requested");
        self.events
            .publish(DomainEvent::Order(OrderEvent::CancellationRequested { order_id: order.id, reason: reason.clone() }))
            .await;
        Ok(CancellationView {
            message: "Order cancellation request submitted successfully",
            order_id: order.id,
            order_number: order.order_number(),
            status: order.status(),
            reason,
            comment: order.cancellation_comment.clone().unwrap_or_default(),
            cancelled_at: order.cancellation_requested_at,
        })
    }

    pub async fn track(&self, email: &str, order_id: i64) -> Result<TrackingInfo> {
        Ok(self.owned_order(email, order_id).await?.tracking())
    }

    // --- admin ---------------------------------------------------------------

    pub async fn list(&self, filter: &OrderFilter) -> Result<Page<OrderView>> {
        let page = self.store.list_orders(filter).await?;
        Ok(Page { results: page.results.iter().map(OrderView::from).collect(), count: page.count, page: page.page, per_page: page.per_page })
    }

    pub async fn get(&self, order_id: i64) -> Result<OrderView> {
        let order = self.store.order(order_id).await?.ok_or(ShopError::NotFound("Order"))?;
        Ok(OrderView::from(&order))
    }

    pub async fn set_paid(&self, order_id: i64, paid: bool) -> Result<OrderView> {
        let mut order = self.store.order(order_id).await?.ok_or(ShopError::NotFound("Order"))?;
        if order.paid != paid {
            order.paid = paid;
            order.updated = Utc::now();
            self.store.update_order(&order).await?;
            tracing::info!(order = order.id, paid, "order payment status changed");
            self.events.publish(DomainEvent::Order(OrderEvent::PaidChanged { order_id: order.id, paid })).await;
        }
        Ok(OrderView::from(&order))
    }

    /// Every order as CSV, newest first.
    pub async fn export_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let csv_error = |e: csv::Error| ShopError::Internal(format!("CSV export failed: {e}"));
        writer
            .write_record([
                "ID", "Order Number", "First Name", "Last Name", "Email", "Address", "Postal Code", "City", "Paid",
                "Delivery", "Payment", "Shipping", "Total", "Created",
            ])
            .map_err(csv_error)?;
        for order in self.store.all_orders().await? {
            writer
                .write_record([
                    order.id.to_string(),
                    order.order_number(),
                    order.first_name.clone(),
                    order.last_name.clone(),
                    order.email.clone(),
                    order.address.clone(),
                    order.postal_code.clone(),
                    order.city.clone(),
                    if order.paid { "Yes" } else { "No" }.to_string(),
                    order.delivery_option.clone(),
                    order.payment_method.clone(),
                    order.shipping_cost.to_string(),
                    order.total().to_string(),
                    order.created.format("%Y-%m-%d %H:%M").to_string(),
                ])
                .map_err(csv_error)?;
        }
        writer.into_inner().map_err(|e| ShopError::Internal(format!("CSV export failed: {e}")))
    }
}
