use crate::{metrics::Metrics, now_payments::PaymentProvider, orders::OrderService};
use anyhow::{anyhow, Result};
use std::{convert::Infallible, sync::Arc};
use warp::{hyper::body::Bytes, hyper::StatusCode, Filter, Rejection, Reply};

/// Inbound NowPayments IPN callbacks.
///
/// The route always answers 200 so the provider does not retry, even on a
/// verification failure. With verification disabled the callback is only
/// acknowledged; order state then advances through the payment watcher.
pub fn ipn_webhook(
    orders: Arc<OrderService>,
    now_payments: Arc<dyn PaymentProvider>,
    metrics: Arc<Metrics>,
    verification_enabled: bool,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("order-fulfillment" / "v0" / "ipn")
        .and(warp::post())
        .and(warp::header::optional::<String>("x-nowpayments-sig"))
        .and(warp::body::bytes())
        .and_then(move |signature: Option<String>, body: Bytes| {
            let orders = orders.clone();
            let now_payments = now_payments.clone();
            let metrics = metrics.clone();
            async move {
                if !verification_enabled {
                    tracing::info!("hit IPN webhook, verification disabled");
                    return Result::<_, Infallible>::Ok(StatusCode::OK);
                }

                let outcome: Result<()> = async {
                    let signature =
                        signature.ok_or_else(|| anyhow!("IPN callback missing signature header"))?;
                    let payment = now_payments.verify_ipn(&signature, &body)?;
                    orders.ipn_update_order(&payment).await
                }
                .await;
                if let Err(err) = outcome {
                    tracing::error!(?err, "failed to process IPN webhook");
                    metrics.tick_now_payments_ipn_failed();
                }

                Ok(StatusCode::OK)
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cardano::MockChain, catalogue::MockCatalogue, database::MockStore,
        now_payments::MockPaymentProvider,
    };
    use chrono::Utc;
    use model::{Order, OrderStatus, PaymentRecord, PaymentStatus};

    fn orders_with_store(store: MockStore) -> Arc<OrderService> {
        Arc::new(OrderService::new(
            Arc::new(store),
            Arc::new(MockPaymentProvider::new()),
            Arc::new(MockCatalogue::new()),
            Arc::new(MockChain::new()),
            Arc::new(Metrics::new().unwrap()),
        ))
    }

    fn confirming_payment() -> PaymentRecord {
        PaymentRecord {
            payment_id: "4945313421".to_string(),
            payment_status: "confirming".to_string(),
            order_id: "ORDER-66".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn acknowledges_without_verification_when_disabled() {
        let mut provider = MockPaymentProvider::new();
        provider.expect_verify_ipn().times(0);
        let filter = ipn_webhook(
            orders_with_store(MockStore::new()),
            Arc::new(provider),
            Arc::new(Metrics::new().unwrap()),
            false,
        );
        let response = warp::test::request()
            .path("/order-fulfillment/v0/ipn")
            .method("POST")
            .body("{}")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn verified_callback_updates_the_order() {
        let mut provider = MockPaymentProvider::new();
        provider
            .expect_verify_ipn()
            .withf(|signature, _| signature == "feed")
            .returning(|_, _| Ok(confirming_payment()));

        let mut store = MockStore::new();
        store.expect_query_order().returning(|order_id| {
            Ok((
                Order {
                    order_id: order_id.to_string(),
                    order_status: OrderStatus::AwaitingPayment,
                    ..Default::default()
                },
                confirming_payment(),
                Utc::now(),
            ))
        });
        store
            .expect_update_order()
            .withf(|order, _| {
                order.payment.payment_status == Some(PaymentStatus::Confirming)
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let filter = ipn_webhook(
            orders_with_store(store),
            Arc::new(provider),
            Arc::new(Metrics::new().unwrap()),
            true,
        );
        let response = warp::test::request()
            .path("/order-fulfillment/v0/ipn")
            .method("POST")
            .header("x-nowpayments-sig", "feed")
            .body("{}")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn failed_verification_still_returns_ok_and_ticks_metric() {
        let mut provider = MockPaymentProvider::new();
        provider
            .expect_verify_ipn()
            .returning(|_, _| Err(anyhow!("IPN callback signature did not match")));
        let metrics = Arc::new(Metrics::new().unwrap());

        let filter = ipn_webhook(
            orders_with_store(MockStore::new()),
            Arc::new(provider),
            metrics.clone(),
            true,
        );
        let response = warp::test::request()
            .path("/order-fulfillment/v0/ipn")
            .method("POST")
            .header("x-nowpayments-sig", "bad")
            .body("{}")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(metrics
            .encode()
            .unwrap()
            .contains("order_fulfillment_now_payments_ipn_failed 1"));
    }

    #[tokio::test]
    async fn missing_signature_header_ticks_metric() {
        let provider = MockPaymentProvider::new();
        let metrics = Arc::new(Metrics::new().unwrap());
        let filter = ipn_webhook(
            orders_with_store(MockStore::new()),
            Arc::new(provider),
            metrics.clone(),
            true,
        );
        let response = warp::test::request()
            .path("/order-fulfillment/v0/ipn")
            .method("POST")
            .body("{}")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(metrics
            .encode()
            .unwrap()
            .contains("order_fulfillment_now_payments_ipn_failed 1"));
    }
}
