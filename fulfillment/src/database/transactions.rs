use super::Database;
use anyhow::{Context, Result};

impl Database {
    pub async fn insert_cardano_transaction(&self, order_id: &str, txid: &str) -> Result<()> {
        sqlx::query(&self.queries.insert_cardano_transaction)
            .bind(order_id)
            .bind(txid)
            .execute(&self.pool)
            .await
            .context("insert cardano transaction failed")?;
        Ok(())
    }

    /// An order can have several transactions from successive fulfillment
    /// attempts; all of them are kept.
    pub async fn query_cardano_transactions(&self, order_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(&self.queries.query_cardano_transactions)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await
            .context("query cardano transactions failed")?;
        Ok(rows.into_iter().map(|(txid,)| txid).collect())
    }
}
