use crate::{api::extract_payload, orders::OrderService};
use model::{Order, OrderCreated};
use std::{convert::Infallible, sync::Arc};
use warp::{
    hyper::StatusCode,
    reply::{with_status, WithStatus},
    Filter, Rejection, Reply,
};

pub fn create_order_request() -> impl Filter<Extract = (Order,), Error = Rejection> + Clone {
    warp::path!("orders").and(warp::post()).and(extract_payload())
}

pub fn create_order(
    orders: Arc<OrderService>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    create_order_request().and_then(move |order: Order| {
        let orders = orders.clone();
        async move {
            let reply: WithStatus<_> = match orders.create_order(order).await {
                Ok(order_id) => with_status(
                    warp::reply::json(&OrderCreated { order_id }),
                    StatusCode::OK,
                ),
                Err(err) => {
                    tracing::error!(?err, "create_order error");
                    with_status(super::internal_error(), StatusCode::INTERNAL_SERVER_ERROR)
                }
            };
            Result::<_, Infallible>::Ok(reply)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{OrderCustomer, OrderItem, OrderPayment};
    use serde_json::json;

    fn order_payload() -> Order {
        Order {
            description: "Occulta Novellia Presale Order".to_string(),
            customer: OrderCustomer {
                delivery_address: "addr1q8xyzmst2jnww".to_string(),
            },
            payment: OrderPayment {
                price_currency_id: "ada".to_string(),
                price_amount: 80.,
                ..Default::default()
            },
            items: vec![
                OrderItem {
                    product_id: "PROD-01F4MK45QJS4WZ1VBZW1A1THD7".to_string(),
                    quantity: 3,
                },
                OrderItem {
                    product_id: "PROD-01F4MK4YVW4JSV717E0XK920AZ".to_string(),
                    quantity: 2,
                },
            ],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_order_request_parses_payload() {
        let filter = create_order_request();
        let payload = order_payload();
        let parsed = warp::test::request()
            .path("/orders")
            .method("POST")
            .header("content-type", "application/json")
            .json(&payload)
            .filter(&filter)
            .await
            .unwrap();
        assert_eq!(parsed, payload);
    }

    #[tokio::test]
    async fn order_created_response_shape() {
        let body = serde_json::to_value(OrderCreated {
            order_id: "ORDER-01D78XYFJ1PRM1WPBCBT3VHMNV".to_string(),
        })
        .unwrap();
        assert_eq!(body, json!({"order_id": "ORDER-01D78XYFJ1PRM1WPBCBT3VHMNV"}));
    }
}
