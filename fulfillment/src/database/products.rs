use super::Database;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use model::Product;

#[derive(sqlx::FromRow)]
struct ProductRow {
    product_id: String,
    price_unit_amount: f64,
    price_currency_id: String,
    max_order_size: i32,
    date_listed: Option<DateTime<Utc>>,
    date_available: Option<DateTime<Utc>>,
    native_token_id: String,
}

impl Database {
    pub async fn query_products(&self) -> Result<Vec<Product>> {
        let rows: Vec<ProductRow> = sqlx::query_as(&self.queries.query_products)
            .fetch_all(&self.pool)
            .await
            .context("query products failed")?;
        Ok(rows
            .into_iter()
            .map(|row| Product {
                product_id: row.product_id,
                price_unit_amount: row.price_unit_amount,
                price_currency_id: row.price_currency_id,
                max_order_size: row.max_order_size,
                date_listed: row.date_listed,
                date_available: row.date_available,
                native_token_id: row.native_token_id,
            })
            .collect())
    }
}
