use crate::orders::OrderService;
use std::{convert::Infallible, sync::Arc};
use warp::{
    hyper::StatusCode,
    reply::{with_status, WithStatus},
    Filter, Rejection, Reply,
};

pub fn get_order(
    orders: Arc<OrderService>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("orders" / String)
        .and(warp::get())
        .and_then(move |order_id: String| {
            let orders = orders.clone();
            async move {
                let reply: WithStatus<_> = match orders.get_order(&order_id).await {
                    Ok(order) => with_status(warp::reply::json(&order), StatusCode::OK),
                    Err(err) => {
                        tracing::error!(?err, %order_id, "get_order error");
                        with_status(super::internal_error(), StatusCode::INTERNAL_SERVER_ERROR)
                    }
                };
                Result::<_, Infallible>::Ok(reply)
            }
        })
}
