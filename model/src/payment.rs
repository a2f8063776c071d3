use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Canonical payment state, mapped from the provider's lowercase vocabulary.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Waiting,
    Confirming,
    Confirmed,
    Sending,
    PartiallyPaid,
    Finished,
    Failed,
    Refunded,
    Expired,
}

impl PaymentStatus {
    /// Maps a NowPayments status string. An unknown status is a hard error;
    /// it must never be silently carried forward.
    pub fn from_provider(status: &str) -> Result<Self> {
        Ok(match status {
            "waiting" => Self::Waiting,
            "confirming" => Self::Confirming,
            "confirmed" => Self::Confirmed,
            "sending" => Self::Sending,
            "partially_paid" => Self::PartiallyPaid,
            "finished" => Self::Finished,
            "failed" => Self::Failed,
            "refunded" => Self::Refunded,
            "expired" => Self::Expired,
            _ => bail!("failed to map NowPayments status, unknown status: {}", status),
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Confirming => "CONFIRMING",
            Self::Confirmed => "CONFIRMED",
            Self::Sending => "SENDING",
            Self::PartiallyPaid => "PARTIALLY_PAID",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Refunded => "REFUNDED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "WAITING" => Self::Waiting,
            "CONFIRMING" => Self::Confirming,
            "CONFIRMED" => Self::Confirmed,
            "SENDING" => Self::Sending,
            "PARTIALLY_PAID" => Self::PartiallyPaid,
            "FINISHED" => Self::Finished,
            "FAILED" => Self::Failed,
            "REFUNDED" => Self::Refunded,
            "EXPIRED" => Self::Expired,
            _ => bail!("unknown payment status: {}", s),
        })
    }
}

/// Mirror of a NowPayments payment record. `payment_status` keeps the
/// provider's lowercase vocabulary; the canonical form lives on the order.
///
/// The provider is inconsistent about numeric fields across its endpoints
/// (`payment_id` and the amounts arrive quoted or unquoted depending on the
/// route), hence the lenient serde helpers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    #[serde(default, with = "crate::number_string")]
    pub payment_id: String,
    #[serde(default)]
    pub payment_status: String,
    #[serde(default)]
    pub pay_address: String,
    #[serde(default, with = "crate::number_f64")]
    pub price_amount: f64,
    #[serde(default)]
    pub price_currency: String,
    #[serde(default, with = "crate::number_f64")]
    pub pay_amount: f64,
    #[serde(default, with = "crate::number_f64")]
    pub actually_paid: f64,
    #[serde(default)]
    pub pay_currency: String,
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub order_description: String,
    #[serde(default)]
    pub purchase_id: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default, with = "crate::number_f64")]
    pub outcome_amount: f64,
    #[serde(default)]
    pub outcome_currency: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub case: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ipn_callback_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_every_provider_status() {
        for (provider, canonical) in [
            ("waiting", PaymentStatus::Waiting),
            ("confirming", PaymentStatus::Confirming),
            ("confirmed", PaymentStatus::Confirmed),
            ("sending", PaymentStatus::Sending),
            ("partially_paid", PaymentStatus::PartiallyPaid),
            ("finished", PaymentStatus::Finished),
            ("failed", PaymentStatus::Failed),
            ("refunded", PaymentStatus::Refunded),
            ("expired", PaymentStatus::Expired),
        ] {
            assert_eq!(PaymentStatus::from_provider(provider).unwrap(), canonical);
        }
    }

    #[test]
    fn unknown_provider_status_is_an_error() {
        assert!(PaymentStatus::from_provider("settled").is_err());
        assert!(PaymentStatus::from_provider("").is_err());
    }

    #[test]
    fn deserializes_ipn_payload() {
        let body = r#"{
            "payment_id": 4945313421,
            "payment_status": "confirming",
            "pay_address": "sandBox_ada_address",
            "price_amount": 10,
            "price_currency": "ada",
            "pay_amount": 10,
            "actually_paid": 10,
            "pay_currency": "ada",
            "order_id": "ORDER-66",
            "order_description": "Test Order",
            "purchase_id": "5831731753",
            "created_at": "2021-05-11T02:00:03.859Z",
            "updated_at": "2021-05-11T02:04:00.061Z",
            "outcome_amount": 9.9,
            "outcome_currency": "ada"
        }"#;
        let record: PaymentRecord = serde_json::from_str(body).unwrap();
        assert_eq!(record.payment_id, "4945313421");
        assert_eq!(record.payment_status, "confirming");
        assert_eq!(record.outcome_amount, 9.9);
        assert_eq!(record.case, "");
    }

    #[test]
    fn deserializes_creation_response_with_quoted_amounts() {
        let body = r#"{
            "payment_id": "5745459419",
            "payment_status": "waiting",
            "pay_address": "sandBox_ada_address",
            "price_amount": 79,
            "price_currency": "ada",
            "pay_amount": "79",
            "pay_currency": "ada",
            "order_id": "ORDER-123",
            "order_description": "Test Order",
            "ipn_callback_url": "https://example.invalid/ipn",
            "created_at": "2021-05-11T02:00:03.859Z",
            "updated_at": "2021-05-11T02:00:03.859Z",
            "purchase_id": "5831731753"
        }"#;
        let record: PaymentRecord = serde_json::from_str(body).unwrap();
        assert_eq!(record.payment_id, "5745459419");
        assert_eq!(record.pay_amount, 79.);
        assert_eq!(record.actually_paid, 0.);
    }
}
