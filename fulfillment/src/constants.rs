//! Operator-tunable constants. The deployed values live in ops
//! documentation; these are the development defaults.

/// Minimum ada (not lovelace) that must accompany any output carrying
/// native tokens. The delivery output always includes this dust payment.
pub const MIN_ADA: i64 = 2;

/// Service fee in ada absorbed by the merchant: the payment provider is
/// asked to collect `price_amount - ORDER_FEE`.
pub const ORDER_FEE: i64 = 1;

/// Stock floor per native token that may never be reserved.
pub const MIN_UNRESERVED_STOCK_PER_NATIVE_TOKEN: i64 = 5;

/// Slots added to the current chain tip to form a transaction TTL.
pub const TTL_OFFSET: i64 = 1000;

/// Timestamp format used for payment records, e.g. `2021-05-11T02:00:03.859Z`.
pub const ISO8601_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub const LOVELACE_PER_ADA: i64 = 1_000_000;
