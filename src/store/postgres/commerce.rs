use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};

use super::PgStore;
use crate::domain::aggregates::{
    Cart, CartItem, CartOwner, LineChange, Order, OrderItem, SpecialOffer, SpecialOfferProduct, WishlistEntry,
};
use crate::store::{CartStore, OfferCounter, OfferStore, OrderFilter, OrderStore, Page, WishlistStore};
use crate::{Result, ShopError};

impl PgStore {
    async fn attach_order_items(&self, orders: &mut [Order]) -> Result<()> {
        if orders.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = orders.iter().map(|o| o.id).collect();
        let items = sqlx::query_as::<_, OrderItem>("SELECT * FROM order_items WHERE order_id = ANY($1) ORDER BY id")
            .bind(ids).fetch_all(&self.pool).await?;
        let mut grouped: HashMap<i64, Vec<OrderItem>> = HashMap::new();
        for item in items {
            grouped.entry(item.order_id).or_default().push(item);
        }
        for order in orders.iter_mut() {
            order.items = grouped.remove(&order.id).unwrap_or_default();
        }
        Ok(())
    }
}

fn push_order_conditions(qb: &mut QueryBuilder<'_, Postgres>, f: &OrderFilter) {
    qb.push(" WHERE TRUE");
    if let Some(paid) = f.paid {
        qb.push(" AND paid = ").push_bind(paid);
    }
    if let Some(q) = f.search.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = format!("%{q}%");
        qb.push(" AND (first_name ILIKE ").push_bind(pattern.clone());
        qb.push(" OR last_name ILIKE ").push_bind(pattern.clone());
        qb.push(" OR email ILIKE ").push_bind(pattern.clone());
        qb.push(" OR city ILIKE ").push_bind(pattern);
        if let Ok(id) = q.parse::<i64>() {
            qb.push(" OR id = ").push_bind(id);
        }
        qb.push(")");
    }
}

#[async_trait]
impl CartStore for PgStore {
    async fn cart_for(&self, owner: &CartOwner) -> Result<Option<Cart>> {
        let cart = match owner {
            CartOwner::Customer(id) => {
                sqlx::query_as::<_, Cart>("SELECT * FROM carts WHERE customer_id = $1").bind(id).fetch_optional(&self.pool).await?
            }
            CartOwner::Guest(device) => {
                sqlx::query_as::<_, Cart>("SELECT * FROM carts WHERE customer_id IS NULL AND device_id = $1")
                    .bind(device.as_str()).fetch_optional(&self.pool).await?
            }
        };
        let Some(mut cart) = cart else { return Ok(None) };
        cart.items = sqlx::query_as::<_, CartItem>("SELECT * FROM cart_items WHERE cart_id = $1 ORDER BY id")
            .bind(cart.id).fetch_all(&self.pool).await?;
        Ok(Some(cart))
    }

    async fn create_cart(&self, c: Cart) -> Result<Cart> {
        Ok(sqlx::query_as::<_, Cart>(
            "INSERT INTO carts (customer_id, device_id, created_at, updated_at) VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(c.customer_id).bind(&c.device_id).bind(c.created_at).bind(c.updated_at)
        .fetch_one(&self.pool).await?)
    }

    async fn apply_line_change(&self, cart_id: i64, change: LineChange, now: DateTime<Utc>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        match change {
            LineChange::Insert { product_id, variant_id, quantity, unit_price } => {
                sqlx::query(
                    "INSERT INTO cart_items (cart_id, product_id, variant_id, quantity, unit_price, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $6)",
                )
                .bind(cart_id).bind(product_id).bind(variant_id).bind(quantity).bind(unit_price).bind(now)
                .execute(&mut *tx).await?;
            }
            LineChange::SetQuantity { item_id, quantity } => {
                let done = sqlx::query("UPDATE cart_items SET quantity = $3, updated_at = $4 WHERE id = $1 AND cart_id = $2")
                    .bind(item_id).bind(cart_id).bind(quantity).bind(now).execute(&mut *tx).await?;
                if done.rows_affected() == 0 {
                    return Err(ShopError::NotFound("Cart item"));
                }
            }
            LineChange::Delete { item_id } => {
                sqlx::query("DELETE FROM cart_items WHERE id = $1 AND cart_id = $2").bind(item_id).bind(cart_id).execute(&mut *tx).await?;
            }
        }
        sqlx::query("UPDATE carts SET updated_at = $2 WHERE id = $1").bind(cart_id).bind(now).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn place_order(&self, o: Order, cart_id: i64) -> Result<Order> {
        let mut tx = self.pool.begin().await?;
        let mut saved = sqlx::query_as::<_, Order>(
            "INSERT INTO orders (first_name, last_name, email, address, postal_code, city, paid, delivery_option, payment_method, shipping_cost, \
             notes, created, updated) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) RETURNING *",
        )
        .bind(&o.first_name).bind(&o.last_name).bind(&o.email).bind(&o.address).bind(&o.postal_code).bind(&o.city)
        .bind(o.paid).bind(&o.delivery_option).bind(&o.payment_method).bind(o.shipping_cost).bind(&o.notes)
        .bind(o.created).bind(o.updated)
        .fetch_one(&mut *tx).await?;
        for item in &o.items {
            let row = sqlx::query_as::<_, OrderItem>(
                "INSERT INTO order_items (order_id, product_id, product_name, price, quantity) VALUES ($1, $2, $3, $4, $5) RETURNING *",
            )
            .bind(saved.id).bind(item.product_id).bind(&item.product_name).bind(item.price).bind(item.quantity)
            .fetch_one(&mut *tx).await?;
            saved.items.push(row);
        }
        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1").bind(cart_id).execute(&mut *tx).await?;
        sqlx::query("UPDATE carts SET updated_at = $2 WHERE id = $1").bind(cart_id).bind(o.created).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(saved)
    }

    async fn order(&self, id: i64) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        let Some(order) = order else { return Ok(None) };
        let mut orders = [order];
        self.attach_order_items(&mut orders).await?;
        let [order] = orders;
        Ok(Some(order))
    }

    async fn orders_by_email(&self, email: &str) -> Result<Vec<Order>> {
        let mut orders = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE email = $1 ORDER BY created DESC, id DESC")
            .bind(email).fetch_all(&self.pool).await?;
        self.attach_order_items(&mut orders).await?;
        Ok(orders)
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Page<Order>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM orders");
        push_order_conditions(&mut count, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let per_page = filter.per_page();
        let mut page = QueryBuilder::<Postgres>::new("SELECT * FROM orders");
        push_order_conditions(&mut page, filter);
        page.push(" ORDER BY created DESC, id DESC LIMIT ").push_bind(i64::from(per_page)).push(" OFFSET ").push_bind(filter.offset());
        let mut results = page.build_query_as::<Order>().fetch_all(&self.pool).await?;
        self.attach_order_items(&mut results).await?;
        Ok(Page { results, count: total, page: filter.page.max(1), per_page })
    }

    async fn all_orders(&self) -> Result<Vec<Order>> {
        let mut orders = sqlx::query_as::<_, Order>("SELECT * FROM orders ORDER BY created DESC, id DESC").fetch_all(&self.pool).await?;
        self.attach_order_items(&mut orders).await?;
        Ok(orders)
    }

    async fn update_order(&self, o: &Order) -> Result<()> {
        sqlx::query(
            "UPDATE orders SET first_name = $2, last_name = $3, email = $4, address = $5, postal_code = $6, city = $7, paid = $8, \
             notes = $9, cancellation_reason = $10, cancellation_comment = $11, cancellation_requested_at = $12, updated = $13 WHERE id = $1",
        )
        .bind(o.id).bind(&o.first_name).bind(&o.last_name).bind(&o.email).bind(&o.address).bind(&o.postal_code).bind(&o.city)
        .bind(o.paid).bind(&o.notes).bind(&o.cancellation_reason).bind(&o.cancellation_comment)
        .bind(o.cancellation_requested_at).bind(o.updated)
        .execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl WishlistStore for PgStore {
    async fn wishlist(&self, customer_id: i64) -> Result<Vec<WishlistEntry>> {
        Ok(sqlx::query_as::<_, WishlistEntry>("SELECT * FROM wishlist WHERE customer_id = $1 ORDER BY created_at DESC, id DESC")
            .bind(customer_id).fetch_all(&self.pool).await?)
    }

    async fn wishlist_entry(&self, customer_id: i64, product_id: i64) -> Result<Option<WishlistEntry>> {
        Ok(sqlx::query_as::<_, WishlistEntry>("SELECT * FROM wishlist WHERE customer_id = $1 AND product_id = $2")
            .bind(customer_id).bind(product_id).fetch_optional(&self.pool).await?)
    }

    async fn upsert_wishlist(&self, w: WishlistEntry) -> Result<WishlistEntry> {
        Ok(sqlx::query_as::<_, WishlistEntry>(
            "INSERT INTO wishlist (customer_id, product_id, notes, priority, reminder_date, quantity, is_public, tags, gift_message, \
             estimated_budget, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (customer_id, product_id) DO UPDATE SET notes = EXCLUDED.notes, priority = EXCLUDED.priority, \
             reminder_date = EXCLUDED.reminder_date, quantity = EXCLUDED.quantity, is_public = EXCLUDED.is_public, tags = EXCLUDED.tags, \
             gift_message = EXCLUDED.gift_message, estimated_budget = EXCLUDED.estimated_budget RETURNING *",
        )
        .bind(w.customer_id).bind(w.product_id).bind(&w.notes).bind(&w.priority).bind(w.reminder_date).bind(w.quantity)
        .bind(w.is_public).bind(&w.tags).bind(&w.gift_message).bind(w.estimated_budget).bind(w.created_at)
        .fetch_one(&self.pool).await?)
    }

    async fn delete_wishlist(&self, customer_id: i64, product_id: i64) -> Result<bool> {
        let done = sqlx::query("DELETE FROM wishlist WHERE customer_id = $1 AND product_id = $2")
            .bind(customer_id).bind(product_id).execute(&self.pool).await?;
        Ok(done.rows_affected() > 0)
    }
}

#[async_trait]
impl OfferStore for PgStore {
    async fn offers(&self) -> Result<Vec<SpecialOffer>> {
        Ok(sqlx::query_as::<_, SpecialOffer>("SELECT * FROM special_offers ORDER BY display_order, created_at DESC")
            .fetch_all(&self.pool).await?)
    }

    async fn offer(&self, id: i64) -> Result<Option<SpecialOffer>> {
        Ok(sqlx::query_as::<_, SpecialOffer>("SELECT * FROM special_offers WHERE id = $1").bind(id).fetch_optional(&self.pool).await?)
    }

    async fn insert_offer(&self, o: SpecialOffer) -> Result<SpecialOffer> {
        Ok(sqlx::query_as::<_, SpecialOffer>(
            "INSERT INTO special_offers (title, description, offer_type, display_style, banner_action_type, banner_action_target, \
             banner_external_url, valid_from, valid_until, enabled, is_active, display_order, views_count, clicks_count, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) RETURNING *",
        )
        .bind(&o.title).bind(&o.description).bind(o.offer_type.as_str()).bind(o.display_style.as_str())
        .bind(o.banner_action_type.as_str()).bind(&o.banner_action_target).bind(&o.banner_external_url)
        .bind(o.valid_from).bind(o.valid_until).bind(o.enabled).bind(o.is_active).bind(o.display_order)
        .bind(o.views_count).bind(o.clicks_count).bind(o.created_at).bind(o.updated_at)
        .fetch_one(&self.pool).await?)
    }

    async fn update_offer(&self, o: &SpecialOffer) -> Result<()> {
        sqlx::query(
            "UPDATE special_offers SET title = $2, description = $3, offer_type = $4, display_style = $5, banner_action_type = $6, \
             banner_action_target = $7, banner_external_url = $8, valid_from = $9, valid_until = $10, enabled = $11, is_active = $12, \
             display_order = $13, updated_at = $14 WHERE id = $1",
        )
        .bind(o.id).bind(&o.title).bind(&o.description).bind(o.offer_type.as_str()).bind(o.display_style.as_str())
        .bind(o.banner_action_type.as_str()).bind(&o.banner_action_target).bind(&o.banner_external_url)
        .bind(o.valid_from).bind(o.valid_until).bind(o.enabled).bind(o.is_active).bind(o.display_order).bind(o.updated_at)
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_offer(&self, id: i64) -> Result<bool> {
        let done = sqlx::query("DELETE FROM special_offers WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(done.rows_affected() > 0)
    }

    async fn increment_offer_counter(&self, id: i64, counter: OfferCounter) -> Result<()> {
        let sql = match counter {
            OfferCounter::Views => "UPDATE special_offers SET views_count = views_count + 1 WHERE id = $1",
            OfferCounter::Clicks => "UPDATE special_offers SET clicks_count = clicks_count + 1 WHERE id = $1",
        };
        sqlx::query(sql).bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn offer_products(&self, offer_id: i64) -> Result<Vec<SpecialOfferProduct>> {
        Ok(sqlx::query_as::<_, SpecialOfferProduct>(
            "SELECT * FROM special_offer_products WHERE offer_id = $1 ORDER BY display_order, created_at, id",
        )
        .bind(offer_id).fetch_all(&self.pool).await?)
    }

    async fn offer_links_for_product(&self, product_id: i64) -> Result<Vec<SpecialOfferProduct>> {
        Ok(sqlx::query_as::<_, SpecialOfferProduct>("SELECT * FROM special_offer_products WHERE product_id = $1")
            .bind(product_id).fetch_all(&self.pool).await?)
    }

    async fn upsert_offer_product(&self, l: SpecialOfferProduct) -> Result<SpecialOfferProduct> {
        Ok(sqlx::query_as::<_, SpecialOfferProduct>(
            "INSERT INTO special_offer_products (offer_id, product_id, discount_percentage, discount_amount, original_price, discounted_price, \
             display_order, is_active, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (offer_id, product_id) DO UPDATE SET discount_percentage = EXCLUDED.discount_percentage, \
             discount_amount = EXCLUDED.discount_amount, original_price = EXCLUDED.original_price, discounted_price = EXCLUDED.discounted_price, \
             display_order = EXCLUDED.display_order, is_active = EXCLUDED.is_active RETURNING *",
        )
        .bind(l.offer_id).bind(l.product_id).bind(l.discount_percentage).bind(l.discount_amount).bind(l.original_price)
        .bind(l.discounted_price).bind(l.display_order).bind(l.is_active).bind(l.created_at)
        .fetch_one(&self.pool).await?)
    }

    async fn delete_offer_product(&self, offer_id: i64, product_id: i64) -> Result<bool> {
        let done = sqlx::query("DELETE FROM special_offer_products WHERE offer_id = $1 AND product_id = $2")
            .bind(offer_id).bind(product_id).execute(&self.pool).await?;
        Ok(done.rows_affected() > 0)
    }
}
