use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A catalogue listing. Read-only from the service's point of view;
/// administration happens directly against the store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: String,
    pub price_unit_amount: f64,
    pub price_currency_id: String,
    pub max_order_size: i32,
    pub date_listed: Option<DateTime<Utc>>,
    pub date_available: Option<DateTime<Utc>>,
    pub native_token_id: String,
}
