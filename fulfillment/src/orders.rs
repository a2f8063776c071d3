//! Order lifecycle coordination: validation, stock reservation, payment
//! intent creation and the two reconciliation watchers.

use crate::{
    cardano::Chain,
    catalogue::{self, Catalogue},
    constants::{MIN_ADA, MIN_UNRESERVED_STOCK_PER_NATIVE_TOKEN, ORDER_FEE},
    database::Store,
    metrics::Metrics,
    now_payments::{CreatePaymentRequest, PaymentProvider},
};
use anyhow::{anyhow, bail, ensure, Context, Result};
use model::{Order, OrderStatus, PaymentRecord, PaymentStatus};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::{sync::Mutex, task::JoinHandle};

const CHECK_ORDERS_FOR_PAYMENT_INTERVAL: Duration = Duration::from_secs(60);
// 0.1 seconds per provider API call
const CHECK_ORDERS_FOR_PAYMENT_RATE_LIMIT: Duration = Duration::from_millis(100);
const CHECK_ORDERS_FOR_FULFILLMENT_INTERVAL: Duration = Duration::from_secs(60);
// 3 * Cardano blocktime, so a prior transaction can propagate before the
// next submission attempt
const CHECK_ORDERS_FOR_FULFILLMENT_RATE_LIMIT: Duration = Duration::from_secs(60);

pub struct OrderService {
    store: Arc<dyn Store>,
    now_payments: Arc<dyn PaymentProvider>,
    catalogue: Arc<dyn Catalogue>,
    cardano: Arc<dyn Chain>,
    metrics: Arc<Metrics>,
    // Serializes the whole create path so the stock check and the
    // reservation write stay consistent under concurrent creation.
    create_order_lock: Mutex<()>,
}

fn add_payment_to_order(order: &mut Order, payment: &PaymentRecord) -> Result<()> {
    order.payment.payment_address = payment.pay_address.clone();
    order.payment.payment_status = Some(PaymentStatus::from_provider(&payment.payment_status)?);
    Ok(())
}

fn update_order_status(order: &mut Order, payment: &PaymentRecord) -> Result<()> {
    let payment_status = PaymentStatus::from_provider(&payment.payment_status)?;
    if payment_status == PaymentStatus::Finished
        && order.order_status == OrderStatus::AwaitingPayment
    {
        order.order_status = OrderStatus::Paid;
    }
    // TODO: release the reservation when a payment expires or fails
    if payment_status == PaymentStatus::Expired || payment_status == PaymentStatus::Failed {
        order.order_status = OrderStatus::Failed;
    }
    Ok(())
}

impl OrderService {
    pub fn new(
        store: Arc<dyn Store>,
        now_payments: Arc<dyn PaymentProvider>,
        catalogue: Arc<dyn Catalogue>,
        cardano: Arc<dyn Chain>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            now_payments,
            catalogue,
            cardano,
            metrics,
            create_order_lock: Mutex::new(()),
        }
    }

    pub async fn validate_order(&self, order: &Order) -> Result<()> {
        let products = self.catalogue.get_products().await?;

        let mut total_cost = 0f64;
        for item in &order.items {
            let product = products
                .get(&item.product_id)
                .ok_or_else(|| anyhow!("product ID does not exist: {}", item.product_id))?;

            // Some products are not orderable directly, only via bundles.
            match product.product_id.as_str() {
                catalogue::DELISTED_COLLECTORS_KIT_PRODUCT_ID => {
                    bail!("collector's kit is delisted and can no longer be ordered")
                }
                "PROD-01F4MK4ZCVTKAAZF1QZAPWMPFP" => {
                    bail!("cannot order Glacial Draculi directly")
                }
                "PROD-01F4MK4ZNC8FMVR2ANHDW9E1N4" => bail!("cannot order Cryptic Cat directly"),
                "PROD-01F4MK4ZYC6P9EGG4W0DNFQTWS" => {
                    bail!("cannot order Ghost Rotakin directly")
                }
                _ => {}
            }

            ensure!(
                item.quantity > 0,
                "product quantity must be greater than 0, got {}",
                item.quantity
            );
            ensure!(
                item.quantity <= product.max_order_size,
                "cannot order more than {} of product {}, tried to order {}",
                product.max_order_size,
                product.product_id,
                item.quantity
            );
            // this is a restriction on the listing, not the order
            ensure!(
                product.price_unit_amount > 0.,
                "price unit amount cannot be negative, {}",
                product.price_unit_amount
            );

            total_cost += f64::from(item.quantity) * product.price_unit_amount;
            ensure!(
                product.price_currency_id == order.payment.price_currency_id,
                "order currency_id does not match listed currency_id: {}, {} (listing) != {} (order)",
                product.product_id,
                product.price_currency_id,
                order.payment.price_currency_id
            );
        }

        ensure!(
            total_cost == order.payment.price_amount,
            "total order value does not match listed total value: {} (listing) != {} (order)",
            total_cost,
            order.payment.price_amount
        );
        ensure!(
            total_cost > (MIN_ADA + ORDER_FEE) as f64,
            "total order value must be greater than min-ada + processing fee"
        );

        self.cardano
            .validate_address(&order.customer.delivery_address)
            .await
            .with_context(|| {
                format!(
                    "got invalid customer address: {}",
                    order.customer.delivery_address
                )
            })?;

        ensure!(
            order.payment.price_currency_id == "ada",
            "received unaccepted payment currency_id, only ADA is accepted at this time: {}",
            order.payment.price_currency_id
        );

        Ok(())
    }

    /// Checks that, after subtracting committed reservations and the
    /// operational buffer from the live wallet balance, enough of every
    /// required token remains.
    pub async fn validate_stock_available(&self, tokens: &BTreeMap<String, i64>) -> Result<()> {
        let reserved_tokens = self
            .store
            .query_reserved_native_tokens()
            .await
            .context("failed to query reserved native tokens")?;
        let available_tokens = self
            .cardano
            .get_stock(&[self.cardano.hot_wallet_address()])
            .await
            .context("failed to query available (wallet) native tokens")?;

        for (native_token_id, required_quantity) in tokens {
            let amount_reserved = reserved_tokens.get(native_token_id).copied().unwrap_or(0);
            let in_wallet = match available_tokens.get(native_token_id) {
                Some(quantity) => *quantity,
                None => bail!(
                    "{} has no tokens available in wallet, wanted {}",
                    native_token_id,
                    required_quantity
                ),
            };

            let adjusted_stock_available =
                (in_wallet - amount_reserved - MIN_UNRESERVED_STOCK_PER_NATIVE_TOKEN).max(0);
            ensure!(
                *required_quantity <= adjusted_stock_available,
                "{} not enough unreserved tokens available, wanted {} > {}",
                native_token_id,
                required_quantity,
                adjusted_stock_available
            );
        }

        Ok(())
    }

    /// Validates and persists a new order together with its payment intent
    /// and token reservation. Returns the minted order id.
    pub async fn create_order(&self, mut order: Order) -> Result<String> {
        let _guard = self.create_order_lock.lock().await;

        order.order_status = OrderStatus::AwaitingPayment;

        self.validate_order(&order)
            .await
            .context("failed to validate order")?;

        let native_tokens = self.cardano.native_tokens_from_order(&order).await?;
        if let Err(err) = self.validate_stock_available(&native_tokens).await {
            self.metrics.tick_validate_stock_failed();
            return Err(err.context("failed to validate stock available"));
        }

        order.order_id = self.store.generate_order_id("ORDER");
        ensure!(
            !order.order_id.is_empty(),
            "failed to create order, got empty order id"
        );
        // collision guard
        ensure!(
            self.store.query_order(&order.order_id).await.is_err(),
            "failed to create order, {} already exists",
            order.order_id
        );

        // We record the full amount paid, but only require receipt of the
        // amount less the service fee from the provider.
        let create_payment_request = CreatePaymentRequest {
            price_amount: order.payment.price_amount - ORDER_FEE as f64,
            price_currency: order.payment.price_currency_id.clone(),
            pay_currency: order.payment.price_currency_id.clone(),
            order_id: order.order_id.clone(),
            order_description: order.description.clone(),
            ..Default::default()
        };
        let payment = self
            .now_payments
            .create_payment(create_payment_request)
            .await?;

        add_payment_to_order(&mut order, &payment)?;

        if let Err(err) = self.store.insert_order(&order, &payment).await {
            self.metrics.tick_payment_created_without_order();
            return Err(err);
        }
        self.store
            .insert_order_native_tokens(&order.order_id, &native_tokens)
            .await?;

        self.metrics.tick_created_order();
        Ok(order.order_id)
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Order> {
        let (mut order, payment, _) = self.store.query_order(order_id).await?;
        add_payment_to_order(&mut order, &payment)?;
        Ok(order)
    }

    /// Refreshes the payment state of one order from the provider and
    /// applies the status transition rules. The check interval is the
    /// caller's responsibility.
    pub async fn check_and_update_order_payment(&self, order_id: &str) -> Result<Order> {
        let (mut order, payment, _) = self.store.query_order(order_id).await?;
        add_payment_to_order(&mut order, &payment)?;

        // advance checked_last
        self.store.update_order(&order, &payment).await?;

        let refreshed_payment = self
            .now_payments
            .get_payment_status(&payment.payment_id)
            .await?;

        if payment.payment_status != refreshed_payment.payment_status
            || order.order_status == OrderStatus::AwaitingPayment
        {
            add_payment_to_order(&mut order, &refreshed_payment)?;
            update_order_status(&mut order, &refreshed_payment)?;
            self.store.update_order(&order, &refreshed_payment).await?;
        }

        Ok(order)
    }

    /// Submits the delivery transaction for a paid order and records the
    /// transaction id. The check interval is the caller's responsibility.
    pub async fn check_and_update_order_fulfillment(&self, order_id: &str) -> Result<Order> {
        let (mut order, payment, _) = self.store.query_order(order_id).await?;
        add_payment_to_order(&mut order, &payment)?;

        // advance checked_last
        self.store.update_order(&order, &payment).await?;

        if order.order_status == OrderStatus::Paid {
            let txid = match self.cardano.submit_order(&order).await {
                Ok(txid) => txid,
                Err(err) => {
                    self.metrics.tick_cardano_submit_order_failed();
                    return Err(err.context(format!("submit order failed: {}", order.order_id)));
                }
            };
            tracing::info!(order_id = %order.order_id, "filling order");

            order.order_status = OrderStatus::Filled;
            update_order_status(&mut order, &payment)?;
            self.store.update_order(&order, &payment).await?;
            self.store
                .insert_cardano_transaction(&order.order_id, &txid)
                .await?;

            tracing::info!(order_id = %order.order_id, %txid, "successfully fulfilled order");
        }

        Ok(order)
    }

    /// Applies a verified IPN callback to the order it references.
    pub async fn ipn_update_order(&self, payment: &PaymentRecord) -> Result<()> {
        let (mut order, _, _) = self.store.query_order(&payment.order_id).await?;
        order.payment.payment_status =
            Some(PaymentStatus::from_provider(&payment.payment_status)?);
        self.store.update_order(&order, payment).await?;
        Ok(())
    }

    async fn run_payment_iteration(&self) {
        tracing::debug!("payment watcher, running iteration");
        let order_ids = match self
            .store
            .query_orders_ready_for_check(
                CHECK_ORDERS_FOR_PAYMENT_INTERVAL,
                OrderStatus::AwaitingPayment,
            )
            .await
        {
            Ok(order_ids) => order_ids,
            Err(err) => {
                tracing::error!(?err, "payment watcher failed to query order ids");
                self.metrics.set_watch_orders_for_payment_status(false);
                return;
            }
        };

        for order_id in &order_ids {
            if let Err(err) = self.check_and_update_order_payment(order_id).await {
                tracing::error!(?err, %order_id, "payment watcher failed to update order");
                self.metrics.set_watch_orders_for_payment_status(false);
                return;
            }
            tokio::time::sleep(CHECK_ORDERS_FOR_PAYMENT_RATE_LIMIT).await;
        }

        self.metrics.set_watch_orders_for_payment_status(true);
        tracing::debug!("payment watcher, completed iteration");
    }

    async fn run_fulfillment_iteration(&self) {
        tracing::debug!("fulfillment watcher, running iteration");
        let order_ids = match self
            .store
            .query_orders_ready_for_check(
                CHECK_ORDERS_FOR_FULFILLMENT_INTERVAL,
                OrderStatus::Paid,
            )
            .await
        {
            Ok(order_ids) => order_ids,
            Err(err) => {
                tracing::error!(?err, "fulfillment watcher failed to query order ids");
                self.metrics.set_watch_orders_for_fulfillment_status(false);
                return;
            }
        };

        for order_id in &order_ids {
            if let Err(err) = self.check_and_update_order_fulfillment(order_id).await {
                tracing::error!(?err, %order_id, "fulfillment watcher failed to update order");
                self.metrics.set_watch_orders_for_fulfillment_status(false);
                return;
            }
            tokio::time::sleep(CHECK_ORDERS_FOR_FULFILLMENT_RATE_LIMIT).await;
        }

        self.metrics.set_watch_orders_for_fulfillment_status(true);
        tracing::debug!("fulfillment watcher, completed iteration");
    }

    /// Spawns the payment reconciliation loop. The task wakes every minute,
    /// refreshes all due AWAITING_PAYMENT orders and exits once the service
    /// is dropped.
    pub fn watch_orders_for_payment(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(CHECK_ORDERS_FOR_PAYMENT_INTERVAL).await;
                match service.upgrade() {
                    Some(service) => service.run_payment_iteration().await,
                    None => {
                        tracing::debug!("exiting payment watcher");
                        break;
                    }
                }
            }
        })
    }

    /// Spawns the fulfillment loop over PAID orders; same shape as the
    /// payment watcher.
    pub fn watch_orders_for_fulfillment(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(CHECK_ORDERS_FOR_FULFILLMENT_INTERVAL).await;
                match service.upgrade() {
                    Some(service) => service.run_fulfillment_iteration().await,
                    None => {
                        tracing::debug!("exiting fulfillment watcher");
                        break;
                    }
                }
            }
        })
    }
}
