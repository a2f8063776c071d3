use super::{parse_provider_timestamp, Database};
use crate::constants::ISO8601_DATE_FORMAT;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use model::{Order, OrderCustomer, OrderItem, OrderPayment, OrderStatus, PaymentRecord};
use std::time::Duration;

#[derive(sqlx::FromRow)]
struct OrderRow {
    order_id: String,
    order_status: String,
    description: String,
    delivery_address: String,
    payment_address: String,
    price_currency_id: String,
    price_amount: f64,
    checked_last: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    product_id: String,
    quantity: i32,
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    payment_id: String,
    payment_status: String,
    pay_address: String,
    price_amount: f64,
    price_currency: String,
    pay_amount: f64,
    actually_paid: f64,
    pay_currency: String,
    order_id: String,
    order_description: String,
    purchase_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    outcome_amount: f64,
    outcome_currency: String,
}

impl PaymentRow {
    fn into_record(self) -> PaymentRecord {
        PaymentRecord {
            payment_id: self.payment_id,
            payment_status: self.payment_status,
            pay_address: self.pay_address,
            price_amount: self.price_amount,
            price_currency: self.price_currency,
            pay_amount: self.pay_amount,
            actually_paid: self.actually_paid,
            pay_currency: self.pay_currency,
            order_id: self.order_id,
            order_description: self.order_description,
            purchase_id: self.purchase_id,
            created_at: self.created_at.format(ISO8601_DATE_FORMAT).to_string(),
            updated_at: self.updated_at.format(ISO8601_DATE_FORMAT).to_string(),
            outcome_amount: self.outcome_amount,
            outcome_currency: self.outcome_currency,
            ..Default::default()
        }
    }
}

impl Database {
    /// Inserts the order row, its payment row and one row per item as a
    /// single transaction.
    pub async fn insert_order(&self, order: &Order, payment: &PaymentRecord) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        sqlx::query(&self.queries.insert_customer_order)
            .bind(&order.order_id)
            .bind(order.order_status.as_str())
            .bind(&order.description)
            .bind(now)
            .bind(&order.customer.delivery_address)
            .bind(&order.payment.payment_address)
            .bind(&order.payment.price_currency_id)
            .bind(order.payment.price_amount)
            .execute(&mut tx)
            .await
            .context("insert customer order failed")?;
        sqlx::query(&self.queries.insert_now_payments_payment)
            .bind(&payment.payment_id)
            .bind(&payment.payment_status)
            .bind(&payment.pay_address)
            .bind(payment.price_amount)
            .bind(&payment.price_currency)
            .bind(payment.pay_amount)
            .bind(&payment.pay_currency)
            .bind(&payment.order_id)
            .bind(&payment.order_description)
            .bind(&payment.purchase_id)
            .bind(parse_provider_timestamp(&payment.created_at, now))
            .bind(parse_provider_timestamp(&payment.updated_at, now))
            .bind(&payment.ipn_callback_url)
            .execute(&mut tx)
            .await
            .context("insert payment failed")?;
        for item in &order.items {
            sqlx::query(&self.queries.insert_customer_order_item)
                .bind(&order.order_id)
                .bind(&item.product_id)
                .bind(item.quantity)
                .execute(&mut tx)
                .await
                .context("insert order item failed")?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Updates the order status, advances `checked_last` to now and writes
    /// back the refreshed payment fields, atomically.
    pub async fn update_order(&self, order: &Order, payment: &PaymentRecord) -> Result<()> {
        let now = Utc::now();
        let updated_at = if payment.updated_at.is_empty() {
            now
        } else {
            parse_provider_timestamp(&payment.updated_at, now)
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(&self.queries.update_customer_order)
            .bind(&order.order_id)
            .bind(order.order_status.as_str())
            .bind(now)
            .execute(&mut tx)
            .await
            .context("update customer order failed")?;
        sqlx::query(&self.queries.update_now_payments_payment)
            .bind(&order.order_id)
            .bind(&payment.payment_status)
            .bind(payment.actually_paid)
            .bind(updated_at)
            .bind(payment.outcome_amount)
            .bind(&payment.outcome_currency)
            .execute(&mut tx)
            .await
            .context("update payment failed")?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn query_order(
        &self,
        order_id: &str,
    ) -> Result<(Order, PaymentRecord, DateTime<Utc>)> {
        let row: OrderRow = sqlx::query_as(&self.queries.query_customer_order)
            .bind(order_id)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("order not found: {}", order_id))?;

        let item_rows: Vec<OrderItemRow> = sqlx::query_as(&self.queries.query_customer_order_items)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await
            .context("query order items failed")?;

        // TODO: handle the case of multiple payments, e.g. if the first one
        // expired and a replacement was created.
        let payment_row: PaymentRow = sqlx::query_as(&self.queries.query_now_payments_payment)
            .bind(order_id)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("payment not found for order: {}", order_id))?;

        let checked_last = row.checked_last;
        let order = Order {
            order_id: row.order_id,
            order_status: row.order_status.parse()?,
            description: row.description,
            customer: OrderCustomer {
                delivery_address: row.delivery_address,
            },
            payment: OrderPayment {
                payment_address: row.payment_address,
                price_currency_id: row.price_currency_id,
                price_amount: row.price_amount,
                payment_status: None,
            },
            items: item_rows
                .into_iter()
                .map(|item| OrderItem {
                    product_id: item.product_id,
                    quantity: item.quantity,
                })
                .collect(),
        };
        Ok((order, payment_row.into_record(), checked_last))
    }

    /// Returns ids of orders in `required_status` whose `checked_last` is at
    /// least `interval` in the past.
    pub async fn query_orders_ready_for_check(
        &self,
        interval: Duration,
        required_status: OrderStatus,
    ) -> Result<Vec<String>> {
        let min_checked_last = Utc::now()
            - chrono::Duration::from_std(interval).context("check interval out of range")?;
        let rows: Vec<(String,)> = sqlx::query_as(&self.queries.query_orders_ready_for_check)
            .bind(min_checked_last)
            .bind(required_status.as_str())
            .fetch_all(&self.pool)
            .await
            .context("query orders ready for check failed")?;
        Ok(rows.into_iter().map(|(order_id,)| order_id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn local_database() -> Database {
        let mut config = Config::default();
        config.postgres.username = "fulfillment".to_string();
        config.postgres.password = "fulfillment".to_string();
        config.postgres.host = "localhost:5432".to_string();
        config.postgres.database = "novellia".to_string();
        config.postgres.queries_path = "../queries".to_string();
        Database::new(&config).unwrap()
    }

    fn sample_order(order_id: &str) -> (Order, PaymentRecord) {
        let order = Order {
            order_id: order_id.to_string(),
            order_status: OrderStatus::AwaitingPayment,
            description: "Test Order".to_string(),
            customer: OrderCustomer {
                delivery_address: "addr1q8xyz".to_string(),
            },
            payment: OrderPayment {
                payment_address: "sandBox_ada_address".to_string(),
                price_currency_id: "ada".to_string(),
                price_amount: 80.,
                payment_status: None,
            },
            items: vec![OrderItem {
                product_id: "PROD-01F4MK45QJS4WZ1VBZW1A1THD7".to_string(),
                quantity: 3,
            }],
        };
        let payment = PaymentRecord {
            payment_id: "4945313421".to_string(),
            payment_status: "waiting".to_string(),
            pay_address: "sandBox_ada_address".to_string(),
            price_amount: 79.,
            price_currency: "ada".to_string(),
            order_id: order_id.to_string(),
            order_description: "Test Order".to_string(),
            created_at: "2021-05-11T02:00:03.859Z".to_string(),
            updated_at: "2021-05-11T02:00:03.859Z".to_string(),
            ..Default::default()
        };
        (order, payment)
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_order_roundtrip() {
        let db = local_database();
        db.clear().await.unwrap();

        let order_id = db.generate_order_id("ORDER");
        let (order, payment) = sample_order(&order_id);
        db.insert_order(&order, &payment).await.unwrap();

        let (stored, stored_payment, _) = db.query_order(&order_id).await.unwrap();
        assert_eq!(stored.items, order.items);
        assert_eq!(stored.payment.price_amount, order.payment.price_amount);
        assert_eq!(stored_payment.payment_id, payment.payment_id);
        assert_eq!(stored_payment.payment_status, "waiting");
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_checked_last_advances_on_update() {
        let db = local_database();
        db.clear().await.unwrap();

        let order_id = db.generate_order_id("ORDER");
        let (order, payment) = sample_order(&order_id);
        db.insert_order(&order, &payment).await.unwrap();
        let (_, _, first) = db.query_order(&order_id).await.unwrap();

        db.update_order(&order, &payment).await.unwrap();
        let (_, _, second) = db.query_order(&order_id).await.unwrap();
        assert!(second >= first);

        // An order checked just now is not ready for another check.
        let ready = db
            .query_orders_ready_for_check(Duration::from_secs(60), OrderStatus::AwaitingPayment)
            .await
            .unwrap();
        assert!(!ready.contains(&order_id));
    }
}
