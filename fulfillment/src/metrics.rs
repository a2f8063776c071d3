use anyhow::Result;
use prometheus::{Encoder, Gauge, IntCounter, Opts, Registry, TextEncoder};
use serde::Deserialize;
use std::{sync::Arc, time::Duration};

const NAMESPACE: &str = "order_fulfillment";
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

pub struct Metrics {
    registry: Registry,
    microservice_status: Gauge,
    now_payments_status: Gauge,
    created_order: IntCounter,
    payments_created_without_order: IntCounter,
    now_payments_ipn_failed: IntCounter,
    watch_orders_for_payment_status: Gauge,
    watch_orders_for_fulfillment_status: Gauge,
    cardano_submit_order_failed: IntCounter,
    cardano_insufficient_utxos: IntCounter,
    cardano_submitted: IntCounter,
    validate_stock_failed: IntCounter,
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<Gauge> {
    let gauge = Gauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        Ok(Self {
            microservice_status: gauge(
                &registry,
                "microservice_status",
                "Health status indicator for the order-fulfillment microservice",
            )?,
            now_payments_status: gauge(
                &registry,
                "now_payments_status",
                "Health status indicator for NowPayments",
            )?,
            created_order: counter(
                &registry,
                "created_order",
                "The total number of times an order was successfully created",
            )?,
            payments_created_without_order: counter(
                &registry,
                "payments_created_without_order",
                "The total number of times a payment was created on NowPayments but the order \
                 wasn't registered successfully in the database",
            )?,
            now_payments_ipn_failed: counter(
                &registry,
                "now_payments_ipn_failed",
                "The total number of times the IPN webhook failed",
            )?,
            watch_orders_for_payment_status: gauge(
                &registry,
                "watch_orders_for_payment_status",
                "Health status indicator for the payment watcher task",
            )?,
            watch_orders_for_fulfillment_status: gauge(
                &registry,
                "watch_orders_for_fulfillment_status",
                "Health status indicator for the fulfillment watcher task",
            )?,
            cardano_submit_order_failed: counter(
                &registry,
                "cardano_submit_order_failed",
                "The total number of times fulfilling tokens through Cardano has failed",
            )?,
            cardano_insufficient_utxos: counter(
                &registry,
                "cardano_insufficient_utxos",
                "The total number of times fulfilling tokens through Cardano has failed because \
                 of insufficient UTXOs",
            )?,
            cardano_submitted: counter(
                &registry,
                "cardano_submitted",
                "The total number of times an order has been submitted successfully to Cardano",
            )?,
            validate_stock_failed: counter(
                &registry,
                "validate_stock_failed_metric",
                "The total number of times there wasn't enough stock to reserve an order",
            )?,
            registry,
        })
    }

    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn set_service_status(&self, up: bool) {
        let value = if up { 1. } else { 0. };
        self.microservice_status.set(value);
        self.now_payments_status.set(value);
    }

    pub fn tick_created_order(&self) {
        self.created_order.inc();
    }

    pub fn tick_payment_created_without_order(&self) {
        self.payments_created_without_order.inc();
    }

    pub fn tick_now_payments_ipn_failed(&self) {
        self.now_payments_ipn_failed.inc();
    }

    pub fn set_watch_orders_for_payment_status(&self, healthy: bool) {
        self.watch_orders_for_payment_status
            .set(if healthy { 1. } else { 0. });
    }

    pub fn set_watch_orders_for_fulfillment_status(&self, healthy: bool) {
        self.watch_orders_for_fulfillment_status
            .set(if healthy { 1. } else { 0. });
    }

    pub fn tick_cardano_submit_order_failed(&self) {
        self.cardano_submit_order_failed.inc();
    }

    pub fn tick_cardano_insufficient_utxos(&self) {
        self.cardano_insufficient_utxos.inc();
    }

    pub fn tick_cardano_submitted(&self) {
        self.cardano_submitted.inc();
    }

    pub fn tick_validate_stock_failed(&self) {
        self.validate_stock_failed.inc();
    }
}

#[derive(Deserialize)]
struct StatusBody {
    status: String,
}

async fn check_status(client: &reqwest::Client, status_url: &str) -> Result<bool> {
    let response = client.get(status_url).send().await?;
    anyhow::ensure!(
        response.status().is_success(),
        "status health check failed: {}",
        response.status()
    );
    let body: StatusBody = response.json().await?;
    tracing::debug!(status = %body.status, "checked service status");
    Ok(body.status == "UP")
}

/// Polls the service's own status route and drives the two health gauges.
/// Runs until the process exits.
pub async fn record_status(metrics: Arc<Metrics>, status_url: String) -> ! {
    let client = reqwest::Client::new();
    loop {
        let up = match check_status(&client, &status_url).await {
            Ok(up) => up,
            Err(err) => {
                tracing::warn!(?err, "status health check failed");
                false
            }
        };
        metrics.set_service_status(up);
        tokio::time::sleep(STATUS_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_all_collectors_under_namespace() {
        let metrics = Metrics::new().unwrap();
        metrics.tick_created_order();
        metrics.set_watch_orders_for_payment_status(true);
        let encoded = metrics.encode().unwrap();
        for name in [
            "order_fulfillment_microservice_status",
            "order_fulfillment_now_payments_status",
            "order_fulfillment_created_order",
            "order_fulfillment_payments_created_without_order",
            "order_fulfillment_now_payments_ipn_failed",
            "order_fulfillment_watch_orders_for_payment_status",
            "order_fulfillment_watch_orders_for_fulfillment_status",
            "order_fulfillment_cardano_submit_order_failed",
            "order_fulfillment_cardano_insufficient_utxos",
            "order_fulfillment_cardano_submitted",
            "order_fulfillment_validate_stock_failed_metric",
        ] {
            assert!(encoded.contains(name), "missing metric {}", name);
        }
        assert!(encoded.contains("order_fulfillment_created_order 1"));
    }
}
