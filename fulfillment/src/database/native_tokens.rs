use super::Database;
use anyhow::{Context, Result};
use std::collections::BTreeMap;

impl Database {
    /// Materializes the expanded bundle contents of an order. This is the
    /// reservation ledger: rows stay attached to the order for its whole
    /// lifetime and count as reserved while the order is AWAITING_PAYMENT
    /// or PAID.
    pub async fn insert_order_native_tokens(
        &self,
        order_id: &str,
        tokens: &BTreeMap<String, i64>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (native_token_id, quantity) in tokens {
            sqlx::query(&self.queries.insert_customer_order_native_tokens)
                .bind(order_id)
                .bind(native_token_id)
                .bind(quantity)
                .execute(&mut tx)
                .await
                .context("insert order native tokens failed")?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn query_order_native_tokens(
        &self,
        order_id: &str,
    ) -> Result<BTreeMap<String, i64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as(&self.queries.query_customer_order_native_tokens)
                .bind(order_id)
                .fetch_all(&self.pool)
                .await
                .context("query order native tokens failed")?;
        Ok(rows.into_iter().collect())
    }

    /// Total reserved quantity per native token across all orders whose
    /// status still holds a reservation.
    pub async fn query_reserved_native_tokens(&self) -> Result<BTreeMap<String, i64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as(&self.queries.query_reserved_native_tokens)
                .fetch_all(&self.pool)
                .await
                .context("query reserved native tokens failed")?;
        Ok(rows.into_iter().collect())
    }
}
