//! Canned responses for local development without any backends.

use super::get_status::Status;
use model::{
    Order, OrderCreated, OrderCustomer, OrderItem, OrderPayment, OrderStatus, PaymentStatus,
};
use warp::{hyper::StatusCode, Filter, Rejection, Reply};

fn sample_order() -> Order {
    Order {
        order_id: "ORDER-01D78XYFJ1PRM1WPBCBT3VHMNV".to_string(),
        order_status: OrderStatus::AwaitingPayment,
        description: "Occulta Novellia Presale Order".to_string(),
        customer: OrderCustomer {
            delivery_address: "addr1".to_string(),
        },
        payment: OrderPayment {
            payment_address: "addr1".to_string(),
            price_currency_id: "ada".to_string(),
            price_amount: 20.,
            payment_status: Some(PaymentStatus::Waiting),
        },
        items: vec![
            OrderItem {
                product_id: "PROD-01D78XYFJ1PRM1WPBAOU8JQMNV".to_string(),
                quantity: 4,
            },
            OrderItem {
                product_id: "PROD-01D78XYFJ1PRM1WPBCBT3VHMNV".to_string(),
                quantity: 2,
            },
        ],
    }
}

pub fn handle_all_routes() -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let get_status = warp::path!("status").and(warp::get()).map(|| {
        warp::reply::json(&Status {
            status: "UP".to_string(),
            maintenance: false,
        })
    });
    let get_order = warp::path!("orders" / String)
        .and(warp::get())
        .map(|_order_id| warp::reply::json(&sample_order()));
    let create_order = warp::path!("orders").and(warp::post()).map(|| {
        warp::reply::json(&OrderCreated {
            order_id: "ORDER-01D78XYFJ1PRM1WPBCBT3VHMNV".to_string(),
        })
    });
    let ipn_webhook = warp::path!("order-fulfillment" / "v0" / "ipn")
        .and(warp::post())
        .map(|| StatusCode::OK);
    get_status
        .or(get_order)
        .or(create_order)
        .or(ipn_webhook)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_canned_order() {
        let filter = handle_all_routes();
        let response = warp::test::request()
            .path("/orders/ORDER-ANY")
            .method("GET")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let order: Order = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(order.order_id, "ORDER-01D78XYFJ1PRM1WPBCBT3VHMNV");
        assert_eq!(order.items.len(), 2);
    }

    #[tokio::test]
    async fn acknowledges_ipn() {
        let filter = handle_all_routes();
        let response = warp::test::request()
            .path("/order-fulfillment/v0/ipn")
            .method("POST")
            .body("{}")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
