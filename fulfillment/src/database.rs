mod native_tokens;
mod orders;
mod products;
mod transactions;

use crate::config;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use model::{Order, OrderStatus, PaymentRecord, Product};
use sqlx::PgPool;
use std::{
    collections::BTreeMap,
    path::Path,
    sync::Mutex,
    time::Duration,
};

/// Durable store contract. The coordinator and the chain adapter only ever
/// talk to this trait so they stay testable without Postgres.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn insert_order(&self, order: &Order, payment: &PaymentRecord) -> Result<()>;
    async fn update_order(&self, order: &Order, payment: &PaymentRecord) -> Result<()>;
    async fn query_order(&self, order_id: &str)
        -> Result<(Order, PaymentRecord, DateTime<Utc>)>;
    async fn query_orders_ready_for_check(
        &self,
        interval: Duration,
        required_status: OrderStatus,
    ) -> Result<Vec<String>>;
    async fn query_products(&self) -> Result<Vec<Product>>;
    async fn insert_cardano_transaction(&self, order_id: &str, txid: &str) -> Result<()>;
    async fn query_cardano_transactions(&self, order_id: &str) -> Result<Vec<String>>;
    async fn insert_order_native_tokens(
        &self,
        order_id: &str,
        tokens: &BTreeMap<String, i64>,
    ) -> Result<()>;
    async fn query_order_native_tokens(&self, order_id: &str) -> Result<BTreeMap<String, i64>>;
    async fn query_reserved_native_tokens(&self) -> Result<BTreeMap<String, i64>>;
    fn generate_order_id(&self, prefix: &str) -> String;
}

/// SQL statements live next to the deployment and are loaded once at
/// startup from `postgres.queries-path`.
pub struct Queries {
    insert_customer_order: String,
    insert_customer_order_item: String,
    insert_now_payments_payment: String,
    insert_cardano_transaction: String,
    insert_customer_order_native_tokens: String,
    update_customer_order: String,
    update_now_payments_payment: String,
    query_products: String,
    query_customer_order: String,
    query_customer_order_items: String,
    query_orders_ready_for_check: String,
    query_now_payments_payment: String,
    query_customer_order_native_tokens: String,
    query_cardano_transactions: String,
    query_reserved_native_tokens: String,
}

impl Queries {
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let read = |filename: &str| -> Result<String> {
            tracing::debug!(%filename, "loading SQL");
            std::fs::read_to_string(dir.join(filename))
                .with_context(|| format!("failed to read query file {}", filename))
        };
        Ok(Self {
            insert_customer_order: read("insert_customer_order.sql")?,
            insert_customer_order_item: read("insert_customer_order_item.sql")?,
            insert_now_payments_payment: read("insert_now_payments_payment.sql")?,
            insert_cardano_transaction: read("insert_cardano_transaction.sql")?,
            insert_customer_order_native_tokens: read("insert_customer_order_native_tokens.sql")?,
            update_customer_order: read("update_customer_order.sql")?,
            update_now_payments_payment: read("update_now_payments_payment.sql")?,
            query_products: read("query_products.sql")?,
            query_customer_order: read("query_customer_order.sql")?,
            query_customer_order_items: read("query_customer_order_items.sql")?,
            query_orders_ready_for_check: read("query_orders_ready_for_check.sql")?,
            query_now_payments_payment: read("query_now_payments_payment.sql")?,
            query_customer_order_native_tokens: read("query_customer_order_native_tokens.sql")?,
            query_cardano_transactions: read("query_cardano_transactions.sql")?,
            query_reserved_native_tokens: read("query_reserved_native_tokens.sql")?,
        })
    }
}

// The pool uses an Arc internally.
pub struct Database {
    pool: PgPool,
    queries: Queries,
    // The generator is monotonic within this process; ids across restarts
    // stay unique and time-sortable by construction.
    ulid_generator: Mutex<ulid::Generator>,
}

impl Database {
    pub fn new(config: &config::Config) -> Result<Self> {
        let pool = PgPool::connect_lazy(&config.postgres_url())
            .context("unable to connect to Postgres")?;
        let queries = Queries::load(&config.postgres.queries_path)?;
        Ok(Self {
            pool,
            queries,
            ulid_generator: Mutex::new(ulid::Generator::new()),
        })
    }

    /// Generates a prefixed ULID like `ORDER-01D78XYFJ1PRM1WPBCBT3VHMNV`.
    pub fn generate_order_id(&self, prefix: &str) -> String {
        let ulid = {
            let mut generator = self.ulid_generator.lock().unwrap();
            generator.generate().unwrap_or_else(|_| ulid::Ulid::new())
        };
        format!("{}-{}", prefix, ulid)
    }

    /// Delete all data in the database. Only used by tests.
    #[cfg(test)]
    pub async fn clear(&self) -> Result<()> {
        use sqlx::Executor;
        for table in [
            "cardano_transactions",
            "customer_order_native_tokens",
            "customer_order_items",
            "now_payments_payments",
            "customer_orders",
        ] {
            self.pool
                .execute(sqlx::query(&format!("DELETE FROM {};", table)))
                .await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Store for Database {
    async fn insert_order(&self, order: &Order, payment: &PaymentRecord) -> Result<()> {
        Database::insert_order(self, order, payment).await
    }

    async fn update_order(&self, order: &Order, payment: &PaymentRecord) -> Result<()> {
        Database::update_order(self, order, payment).await
    }

    async fn query_order(
        &self,
        order_id: &str,
    ) -> Result<(Order, PaymentRecord, DateTime<Utc>)> {
        Database::query_order(self, order_id).await
    }

    async fn query_orders_ready_for_check(
        &self,
        interval: Duration,
        required_status: OrderStatus,
    ) -> Result<Vec<String>> {
        Database::query_orders_ready_for_check(self, interval, required_status).await
    }

    async fn query_products(&self) -> Result<Vec<Product>> {
        Database::query_products(self).await
    }

    async fn insert_cardano_transaction(&self, order_id: &str, txid: &str) -> Result<()> {
        Database::insert_cardano_transaction(self, order_id, txid).await
    }

    async fn query_cardano_transactions(&self, order_id: &str) -> Result<Vec<String>> {
        Database::query_cardano_transactions(self, order_id).await
    }

    async fn insert_order_native_tokens(
        &self,
        order_id: &str,
        tokens: &BTreeMap<String, i64>,
    ) -> Result<()> {
        Database::insert_order_native_tokens(self, order_id, tokens).await
    }

    async fn query_order_native_tokens(&self, order_id: &str) -> Result<BTreeMap<String, i64>> {
        Database::query_order_native_tokens(self, order_id).await
    }

    async fn query_reserved_native_tokens(&self) -> Result<BTreeMap<String, i64>> {
        Database::query_reserved_native_tokens(self).await
    }

    fn generate_order_id(&self, prefix: &str) -> String {
        Database::generate_order_id(self, prefix)
    }
}

fn parse_provider_timestamp(value: &str, fallback: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generated_order_ids_are_unique_and_sortable() {
        let database = Database {
            pool: PgPool::connect_lazy("postgresql://localhost").unwrap(),
            queries: Queries::load("../queries").unwrap(),
            ulid_generator: Mutex::new(ulid::Generator::new()),
        };
        let ids: Vec<_> = (0..100)
            .map(|_| database.generate_order_id("ORDER"))
            .collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted, "ids must be monotonic within a process");
        sorted.dedup();
        assert_eq!(sorted.len(), 100);
        assert!(ids[0].starts_with("ORDER-"));
    }

    #[test]
    fn loads_all_query_files() {
        let queries = Queries::load("../queries").unwrap();
        assert!(queries.query_customer_order.contains("customer_orders"));
        assert!(queries
            .query_reserved_native_tokens
            .contains("customer_order_native_tokens"));
    }

    #[test]
    fn parses_provider_timestamps() {
        let fallback = Utc::now();
        let parsed = parse_provider_timestamp("2021-05-11T02:00:03.859Z", fallback);
        assert_eq!(parsed.timestamp(), 1620698403);
        assert_eq!(parse_provider_timestamp("", fallback), fallback);
    }
}
