use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};

use super::PgStore;
use crate::domain::aggregates::{
    AttributeValue, Category, CategoryAttribute, DeletedProduct, Product, ProductAttributeValue, ProductVariant,
};
use crate::store::{CatalogStore, Page, ProductFilter, ProductOrdering};
use crate::Result;

fn push_product_conditions(qb: &mut QueryBuilder<'_, Postgres>, f: &ProductFilter) {
    qb.push(" WHERE TRUE");
    if !f.include_inactive {
        qb.push(" AND p.is_active");
    }
    if let Some(ids) = &f.category_ids {
        qb.push(" AND p.category_id = ANY(").push_bind(ids.clone()).push(")");
    }
    if let Some(q) = f.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = format!("%{q}%");
        qb.push(" AND (p.name ILIKE ").push_bind(pattern.clone());
        qb.push(" OR p.description ILIKE ").push_bind(pattern.clone());
        qb.push(" OR p.model ILIKE ").push_bind(pattern.clone());
        qb.push(" OR p.sku ILIKE ").push_bind(pattern.clone());
        qb.push(" OR EXISTS (SELECT 1 FROM unnest(p.tags) t WHERE t ILIKE ").push_bind(pattern).push("))");
    }
    if let Some(min) = f.min_price {
        qb.push(" AND p.price_toman >= ").push_bind(min);
    }
    if let Some(max) = f.max_price {
        qb.push(" AND p.price_toman <= ").push_bind(max);
    }
    if f.new_arrivals {
        qb.push(" AND p.is_new_arrival");
    }
    if f.special_offers {
        qb.push(" AND p.is_in_special_offers");
    }
    if let Some(tag) = &f.tag {
        qb.push(" AND ").push_bind(tag.clone()).push(" = ANY(p.tags)");
    }
    if let Some(id) = f.exclude_id {
        qb.push(" AND p.id <> ").push_bind(id);
    }
    for (key, value) in &f.attributes {
        qb.push(" AND EXISTS (SELECT 1 FROM product_attribute_values v WHERE v.product_id = p.id AND v.key = ")
            .push_bind(key.clone())
            .push(" AND v.value = ")
            .push_bind(value.clone())
            .push(")");
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn categories(&self) -> Result<Vec<Category>> {
        Ok(sqlx::query_as::<_, Category>("SELECT * FROM categories ORDER BY name").fetch_all(&self.pool).await?)
    }

    async fn category(&self, id: i64) -> Result<Option<Category>> {
        Ok(sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE id = $1").bind(id).fetch_optional(&self.pool).await?)
    }

    async fn insert_category(&self, c: Category) -> Result<Category> {
        Ok(sqlx::query_as::<_, Category>(
            "INSERT INTO categories (name, parent_id, label, category_type, is_visible, display_section, categorization_attribute_key, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING *",
        )
        .bind(&c.name).bind(c.parent_id).bind(&c.label).bind(c.category_type.as_str()).bind(c.is_visible)
        .bind(&c.display_section).bind(&c.categorization_attribute_key).bind(c.created_at).bind(c.updated_at)
        .fetch_one(&self.pool).await?)
    }

    async fn update_category(&self, c: &Category) -> Result<()> {
        sqlx::query(
            "UPDATE categories SET name = $2, parent_id = $3, label = $4, category_type = $5, is_visible = $6, display_section = $7, \
             categorization_attribute_key = $8, updated_at = $9 WHERE id = $1",
        )
        .bind(c.id).bind(&c.name).bind(c.parent_id).bind(&c.label).bind(c.category_type.as_str()).bind(c.is_visible)
        .bind(&c.display_section).bind(&c.categorization_attribute_key).bind(c.updated_at)
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_category(&self, id: i64) -> Result<bool> {
        let done = sqlx::query("DELETE FROM categories WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(done.rows_affected() > 0)
    }

    async fn attributes(&self, category_id: i64) -> Result<Vec<CategoryAttribute>> {
        Ok(sqlx::query_as::<_, CategoryAttribute>(
            "SELECT * FROM category_attributes WHERE category_id = $1 ORDER BY display_order, id",
        )
        .bind(category_id).fetch_all(&self.pool).await?)
    }

    async fn attribute(&self, id: i64) -> Result<Option<CategoryAttribute>> {
        Ok(sqlx::query_as::<_, CategoryAttribute>("SELECT * FROM category_attributes WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?)
    }

    async fn attribute_by_key(&self, category_id: i64, key: &str) -> Result<Option<CategoryAttribute>> {
        Ok(sqlx::query_as::<_, CategoryAttribute>("SELECT * FROM category_attributes WHERE category_id = $1 AND key = $2")
            .bind(category_id).bind(key).fetch_optional(&self.pool).await?)
    }

    async fn insert_attribute(&self, a: CategoryAttribute) -> Result<CategoryAttribute> {
        Ok(sqlx::query_as::<_, CategoryAttribute>(
            "INSERT INTO category_attributes (category_id, key, attr_type, required, display_order, label_fa, is_displayed_in_product, display_in_basket) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
        )
        .bind(a.category_id).bind(&a.key).bind(a.attr_type.as_str()).bind(a.required).bind(a.display_order)
        .bind(&a.label_fa).bind(a.is_displayed_in_product).bind(a.display_in_basket)
        .fetch_one(&self.pool).await?)
    }

    async fn update_attribute(&self, a: &CategoryAttribute) -> Result<()> {
        sqlx::query(
            "UPDATE category_attributes SET key = $2, attr_type = $3, required = $4, display_order = $5, label_fa = $6, \
             is_displayed_in_product = $7, display_in_basket = $8 WHERE id = $1",
        )
        .bind(a.id).bind(&a.key).bind(a.attr_type.as_str()).bind(a.required).bind(a.display_order)
        .bind(&a.label_fa).bind(a.is_displayed_in_product).bind(a.display_in_basket)
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_attribute(&self, id: i64) -> Result<bool> {
        let done = sqlx::query("DELETE FROM category_attributes WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(done.rows_affected() > 0)
    }

    async fn values(&self, attribute_id: i64) -> Result<Vec<AttributeValue>> {
        Ok(sqlx::query_as::<_, AttributeValue>(
            "SELECT * FROM attribute_values WHERE attribute_id = $1 ORDER BY display_order, id",
        )
        .bind(attribute_id).fetch_all(&self.pool).await?)
    }

    async fn value(&self, id: i64) -> Result<Option<AttributeValue>> {
        Ok(sqlx::query_as::<_, AttributeValue>("SELECT * FROM attribute_values WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?)
    }

    async fn insert_value(&self, v: AttributeValue) -> Result<AttributeValue> {
        Ok(sqlx::query_as::<_, AttributeValue>(
            "INSERT INTO attribute_values (attribute_id, value, display_order) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(v.attribute_id).bind(&v.value).bind(v.display_order).fetch_one(&self.pool).await?)
    }

    async fn update_value(&self, v: &AttributeValue) -> Result<()> {
        sqlx::query("UPDATE attribute_values SET value = $2, display_order = $3 WHERE id = $1")
            .bind(v.id).bind(&v.value).bind(v.display_order).execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_value(&self, id: i64) -> Result<bool> {
        let done = sqlx::query("DELETE FROM attribute_values WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(done.rows_affected() > 0)
    }

    async fn products(&self, filter: &ProductFilter) -> Result<Page<Product>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM products p");
        push_product_conditions(&mut count, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut page = QueryBuilder::<Postgres>::new("SELECT p.* FROM products p");
        push_product_conditions(&mut page, filter);
        page.push(match filter.ordering {
            ProductOrdering::Newest => " ORDER BY p.created_at DESC, p.id DESC",
            ProductOrdering::PriceAsc => " ORDER BY p.price_toman ASC, p.id",
            ProductOrdering::PriceDesc => " ORDER BY p.price_toman DESC, p.id",
            ProductOrdering::Name => " ORDER BY p.name, p.id",
        });
        let per_page = filter.per_page();
        page.push(" LIMIT ").push_bind(i64::from(per_page)).push(" OFFSET ").push_bind(filter.offset());
        let results = page.build_query_as::<Product>().fetch_all(&self.pool).await?;
        Ok(Page { results, count: total, page: filter.page.max(1), per_page })
    }

    async fn product(&self, id: i64) -> Result<Option<Product>> {
        Ok(sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1").bind(id).fetch_optional(&self.pool).await?)
    }

    async fn products_by_ids(&self, ids: &[i64]) -> Result<Vec<Product>> {
        let rows = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ANY($1)")
            .bind(ids.to_vec()).fetch_all(&self.pool).await?;
        let mut by_id: HashMap<i64, Product> = rows.into_iter().map(|p| (p.id, p)).collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn product_counts(&self) -> Result<HashMap<i64, i64>> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            "SELECT category_id, COUNT(*) FROM products WHERE is_active AND category_id IS NOT NULL GROUP BY category_id",
        )
        .fetch_all(&self.pool).await?;
        Ok(rows.into_iter().collect())
    }

    async fn tag_counts(&self, limit: i64) -> Result<Vec<(String, i64)>> {
        Ok(sqlx::query_as::<_, (String, i64)>(
            "SELECT tag, COUNT(*) AS uses FROM products, unnest(tags) AS tag WHERE is_active GROUP BY tag ORDER BY uses DESC, tag LIMIT $1",
        )
        .bind(limit).fetch_all(&self.pool).await?)
    }

    async fn insert_product(&self, p: Product) -> Result<Product> {
        Ok(sqlx::query_as::<_, Product>(
            "INSERT INTO products (name, slug, category_id, price_toman, price_usd, description, is_active, tags, model, sku, weight, dimensions, \
             warranty, stock_quantity, is_new_arrival, is_in_special_offers, reduced_price_toman, discount_percentage, distinctive_attribute_key, \
             created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21) RETURNING *",
        )
        .bind(&p.name).bind(&p.slug).bind(p.category_id).bind(p.price_toman).bind(p.price_usd).bind(&p.description)
        .bind(p.is_active).bind(&p.tags).bind(&p.model).bind(&p.sku).bind(p.weight).bind(&p.dimensions).bind(&p.warranty)
        .bind(p.stock_quantity).bind(p.is_new_arrival).bind(p.is_in_special_offers).bind(p.reduced_price_toman)
        .bind(p.discount_percentage).bind(&p.distinctive_attribute_key).bind(p.created_at).bind(p.updated_at)
        .fetch_one(&self.pool).await?)
    }

    async fn update_product(&self, p: &Product) -> Result<()> {
        sqlx::query(
            "UPDATE products SET name = $2, slug = $3, category_id = $4, price_toman = $5, price_usd = $6, description = $7, is_active = $8, \
             tags = $9, model = $10, sku = $11, weight = $12, dimensions = $13, warranty = $14, stock_quantity = $15, is_new_arrival = $16, \
             is_in_special_offers = $17, reduced_price_toman = $18, discount_percentage = $19, distinctive_attribute_key = $20, updated_at = $21 \
             WHERE id = $1",
        )
        .bind(p.id).bind(&p.name).bind(&p.slug).bind(p.category_id).bind(p.price_toman).bind(p.price_usd).bind(&p.description)
        .bind(p.is_active).bind(&p.tags).bind(&p.model).bind(&p.sku).bind(p.weight).bind(&p.dimensions).bind(&p.warranty)
        .bind(p.stock_quantity).bind(p.is_new_arrival).bind(p.is_in_special_offers).bind(p.reduced_price_toman)
        .bind(p.discount_percentage).bind(&p.distinctive_attribute_key).bind(p.updated_at)
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn set_special_offer_flag(&self, product_id: i64, flagged: bool) -> Result<()> {
        sqlx::query("UPDATE products SET is_in_special_offers = $2 WHERE id = $1 AND is_in_special_offers <> $2")
            .bind(product_id).bind(flagged).execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_product(&self, id: i64, r: DeletedProduct) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO deleted_products (original_id, name, price_toman, price_usd, description, category_name, model, sku, snapshot, \
             deletion_reason, deleted_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(r.original_id).bind(&r.name).bind(r.price_toman).bind(r.price_usd).bind(&r.description).bind(&r.category_name)
        .bind(&r.model).bind(&r.sku).bind(&r.snapshot).bind(&r.deletion_reason).bind(r.deleted_at)
        .execute(&mut *tx).await?;
        sqlx::query("DELETE FROM products WHERE id = $1").bind(id).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn product_attribute_values(&self, product_id: i64) -> Result<Vec<ProductAttributeValue>> {
        Ok(sqlx::query_as::<_, ProductAttributeValue>("SELECT * FROM product_attribute_values WHERE product_id = $1 ORDER BY id")
            .bind(product_id).fetch_all(&self.pool).await?)
    }

    async fn upsert_product_attribute_value(&self, v: ProductAttributeValue) -> Result<ProductAttributeValue> {
        Ok(sqlx::query_as::<_, ProductAttributeValue>(
            "INSERT INTO product_attribute_values (product_id, key, attribute_value_id, custom_value, value) VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (product_id, key) DO UPDATE SET attribute_value_id = EXCLUDED.attribute_value_id, \
             custom_value = EXCLUDED.custom_value, value = EXCLUDED.value RETURNING *",
        )
        .bind(v.product_id).bind(&v.key).bind(v.attribute_value_id).bind(&v.custom_value).bind(&v.value)
        .fetch_one(&self.pool).await?)
    }

    async fn retain_product_attribute_values(&self, product_id: i64, keep: &[String]) -> Result<u64> {
        let done = sqlx::query("DELETE FROM product_attribute_values WHERE product_id = $1 AND NOT (key = ANY($2))")
            .bind(product_id).bind(keep.to_vec()).execute(&self.pool).await?;
        Ok(done.rows_affected())
    }

    async fn variants(&self, product_id: i64) -> Result<Vec<ProductVariant>> {
        Ok(sqlx::query_as::<_, ProductVariant>("SELECT * FROM product_variants WHERE product_id = $1 ORDER BY id")
            .bind(product_id).fetch_all(&self.pool).await?)
    }

    async fn variant(&self, id: i64) -> Result<Option<ProductVariant>> {
        Ok(sqlx::query_as::<_, ProductVariant>("SELECT * FROM product_variants WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?)
    }

    async fn insert_variant(&self, v: ProductVariant) -> Result<ProductVariant> {
        Ok(sqlx::query_as::<_, ProductVariant>(
            "INSERT INTO product_variants (product_id, sku, attributes, price_toman, stock_quantity, is_active, is_default, is_distinctive, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING *",
        )
        .bind(v.product_id).bind(&v.sku).bind(&v.attributes).bind(v.price_toman).bind(v.stock_quantity)
        .bind(v.is_active).bind(v.is_default).bind(v.is_distinctive).bind(v.created_at)
        .fetch_one(&self.pool).await?)
    }

    async fn update_variant(&self, v: &ProductVariant) -> Result<()> {
        sqlx::query(
            "UPDATE product_variants SET sku = $2, attributes = $3, price_toman = $4, stock_quantity = $5, is_active = $6, is_default = $7, \
             is_distinctive = $8 WHERE id = $1",
        )
        .bind(v.id).bind(&v.sku).bind(&v.attributes).bind(v.price_toman).bind(v.stock_quantity)
        .bind(v.is_active).bind(v.is_default).bind(v.is_distinctive)
        .execute(&self.pool).await?;
        Ok(())
    }
}
