use crate::payment::PaymentStatus;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lifecycle state of a customer order.
///
/// `PartiallyFilled` and `Refund` are reserved states; no transition writes
/// them yet.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    AwaitingPayment,
    Paid,
    Filled,
    PartiallyFilled,
    Refund,
    Failed,
}

impl Default for OrderStatus {
    fn default() -> Self {
        Self::AwaitingPayment
    }
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingPayment => "AWAITING_PAYMENT",
            Self::Paid => "PAID",
            Self::Filled => "FILLED",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Refund => "REFUND",
            Self::Failed => "FAILED",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "AWAITING_PAYMENT" => Self::AwaitingPayment,
            "PAID" => Self::Paid,
            "FILLED" => Self::Filled,
            "PARTIALLY_FILLED" => Self::PartiallyFilled,
            "REFUND" => Self::Refund,
            "FAILED" => Self::Failed,
            _ => bail!("unknown order status: {}", s),
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    pub quantity: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderCustomer {
    pub delivery_address: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderPayment {
    #[serde(default)]
    pub payment_address: String,
    pub price_currency_id: String,
    pub price_amount: f64,
    #[serde(default)]
    pub payment_status: Option<PaymentStatus>,
}

/// A customer order as accepted on `POST /orders` and returned on
/// `GET /orders/{order_id}`. `order_id` and `order_status` are assigned by
/// the service; clients leave them defaulted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub order_status: OrderStatus,
    #[serde(default)]
    pub description: String,
    pub customer: OrderCustomer,
    pub payment: OrderPayment,
    pub items: Vec<OrderItem>,
}

/// Response body of a successful order creation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn order_status_string_roundtrip() {
        for status in [
            OrderStatus::AwaitingPayment,
            OrderStatus::Paid,
            OrderStatus::Filled,
            OrderStatus::PartiallyFilled,
            OrderStatus::Refund,
            OrderStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("PENDING".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn deserializes_client_order_without_service_fields() {
        let value = json!({
            "description": "Occulta Novellia Presale Order",
            "customer": {
                "delivery_address": "addr1q8xyz",
            },
            "payment": {
                "price_currency_id": "ada",
                "price_amount": 80.0,
            },
            "items": [
                {"product_id": "PROD-01F4MK45QJS4WZ1VBZW1A1THD7", "quantity": 3},
            ],
        });
        let order: Order = serde_json::from_value(value).unwrap();
        assert_eq!(order.order_id, "");
        assert_eq!(order.order_status, OrderStatus::AwaitingPayment);
        assert_eq!(order.payment.payment_status, None);
        assert_eq!(order.items.len(), 1);
    }

    #[test]
    fn serializes_status_in_canonical_form() {
        let serialized = serde_json::to_value(OrderStatus::AwaitingPayment).unwrap();
        assert_eq!(serialized, json!("AWAITING_PAYMENT"));
    }
}
