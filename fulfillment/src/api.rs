mod create_order;
mod get_order;
mod get_status;
mod ipn;
pub mod mocked;

use crate::{metrics::Metrics, now_payments::PaymentProvider, orders::OrderService};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::{convert::Infallible, sync::Arc};
use warp::{
    hyper::StatusCode,
    reply::{json, with_status, Json},
    Filter, Rejection, Reply,
};

pub fn handle_all_routes(
    orders: Arc<OrderService>,
    now_payments: Arc<dyn PaymentProvider>,
    metrics: Arc<Metrics>,
    ipn_verification_enabled: bool,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let get_status = get_status::get_status(now_payments.clone());
    let get_order = get_order::get_order(orders.clone());
    let create_order = create_order::create_order(orders.clone());
    let ipn_webhook = ipn::ipn_webhook(
        orders,
        now_payments,
        metrics.clone(),
        ipn_verification_enabled,
    );
    let metrics_exposition = metrics_exposition(metrics);
    get_status
        .or(get_order)
        .or(create_order)
        .or(ipn_webhook)
        .or(metrics_exposition)
}

#[derive(Serialize)]
struct Error<'a> {
    error_type: &'a str,
    description: &'a str,
}

fn internal_error() -> Json {
    json(&Error {
        error_type: "InternalServerError",
        description: "",
    })
}

const MAX_JSON_BODY_PAYLOAD: u64 = 1024 * 16;

fn extract_payload<T: DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    // (rejecting huge payloads)...
    warp::body::content_length_limit(MAX_JSON_BODY_PAYLOAD).and(warp::body::json())
}

fn metrics_exposition(
    metrics: Arc<Metrics>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("metrics").and(warp::get()).and_then(move || {
        let metrics = metrics.clone();
        async move {
            Result::<_, Infallible>::Ok(match metrics.encode() {
                Ok(body) => with_status(body, StatusCode::OK),
                Err(err) => {
                    tracing::error!(?err, "failed to encode metrics");
                    with_status(String::new(), StatusCode::INTERNAL_SERVER_ERROR)
                }
            })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metrics_route_exposes_registry() {
        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.tick_created_order();
        let filter = metrics_exposition(metrics);
        let response = warp::test::request()
            .path("/metrics")
            .method("GET")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = String::from_utf8(response.body().to_vec()).unwrap();
        assert!(body.contains("order_fulfillment_created_order 1"));
    }
}
