use crate::now_payments::PaymentProvider;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use warp::{Filter, Rejection, Reply};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub status: String,
    pub maintenance: bool,
}

/// Health check: "UP" unless the payment provider reports otherwise.
pub fn get_status(
    now_payments: Arc<dyn PaymentProvider>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("status").and(warp::get()).and_then(move || {
        let now_payments = now_payments.clone();
        async move {
            let mut status = Status {
                status: "UP".to_string(),
                maintenance: false,
            };
            match now_payments.status().await {
                Ok(message) if message == "OK" => {}
                Ok(message) => {
                    status.status = format!("NowPayments is down: {}", message);
                }
                Err(err) => {
                    status.status = format!("failed to check NowPayments status: {}", err);
                }
            }
            Result::<_, Infallible>::Ok(warp::reply::json(&status))
        }
    })
}
