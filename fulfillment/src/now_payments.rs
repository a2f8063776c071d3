//! Typed facade over the NowPayments HTTPS API, including IPN webhook
//! signature verification.

use crate::config;
use anyhow::{anyhow, bail, Context, Result};
use hmac::{Hmac, Mac};
use model::PaymentRecord;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use sha2::Sha512;

const BASE_URL: &str = "https://api.nowpayments.io/v1/";
const SANDBOX_BASE_URL: &str = "https://api.sandbox.nowpayments.io/v1/";

#[derive(Clone, Debug, Default, Serialize)]
pub struct CreatePaymentRequest {
    pub price_amount: f64,
    pub price_currency: String,
    pub pay_currency: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ipn_callback_url: String,
    pub order_id: String,
    pub order_description: String,
    /// Sandbox-only: forces the payment onto a given lifecycle path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn status(&self) -> Result<String>;
    async fn create_payment(&self, request: CreatePaymentRequest) -> Result<PaymentRecord>;
    async fn get_payment_status(&self, payment_id: &str) -> Result<PaymentRecord>;
    fn verify_ipn(&self, signature: &str, body: &[u8]) -> Result<PaymentRecord>;
}

pub struct NowPaymentsService {
    client: Client,
    base_url: Url,
    api_key: String,
    ipn_secret_key: String,
    is_sandbox: bool,
    ipn_callback_url: String,
}

impl NowPaymentsService {
    pub fn new(config: &config::NowPayments) -> Result<Self> {
        let base_url = if config.is_sandbox {
            SANDBOX_BASE_URL
        } else {
            BASE_URL
        };
        Ok(Self {
            client: Client::new(),
            base_url: Url::parse(base_url).context("failed to parse NowPayments base url")?,
            api_key: config.api_key.clone(),
            ipn_secret_key: config.ipn_secret_key.clone(),
            is_sandbox: config.is_sandbox,
            ipn_callback_url: config.ipn_callback_url.clone(),
        })
    }

    fn from_base_url(&self, route: &str) -> Result<Url> {
        self.base_url
            .join(route)
            .with_context(|| format!("failed to build NowPayments url for route {}", route))
    }
}

#[derive(Deserialize)]
struct GetStatusResponse {
    message: String,
}

#[async_trait::async_trait]
impl PaymentProvider for NowPaymentsService {
    async fn status(&self) -> Result<String> {
        let url = self.from_base_url("status")?;
        let response: GetStatusResponse = self.client.get(url).send().await?.json().await?;
        Ok(response.message)
    }

    async fn create_payment(&self, mut request: CreatePaymentRequest) -> Result<PaymentRecord> {
        if self.is_sandbox {
            tracing::debug!("creating payment with success case (sandbox)");
            request.case = Some("success".to_string());
        }
        if request.ipn_callback_url.is_empty() {
            request.ipn_callback_url = self.ipn_callback_url.clone();
        }

        let url = self.from_base_url("payment")?;
        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;
        if response.status().as_u16() != 201 {
            bail!(
                "create payment failed with status {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            );
        }
        Ok(response.json().await?)
    }

    async fn get_payment_status(&self, payment_id: &str) -> Result<PaymentRecord> {
        let url = self.from_base_url(&format!("payment/{}", payment_id))?;
        let response = self
            .client
            .get(url)
            .header("x-api-key", &self.api_key)
            .send()
            .await?;
        if response.status().as_u16() != 200 {
            bail!(
                "get payment status failed with status {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            );
        }
        Ok(response.json().await?)
    }

    fn verify_ipn(&self, signature: &str, body: &[u8]) -> Result<PaymentRecord> {
        let canonical = canonicalize_ipn_payload(body)?;

        let mut mac = Hmac::<Sha512>::new_from_slice(self.ipn_secret_key.as_bytes())
            .map_err(|_| anyhow!("invalid IPN secret key length"))?;
        mac.update(canonical.as_bytes());
        let signature = hex::decode(signature).context("IPN signature is not valid hex")?;
        mac.verify_slice(&signature)
            .map_err(|_| anyhow!("IPN callback signature did not match"))?;

        serde_json::from_slice(body).context("failed to parse verified IPN payload")
    }
}

/// Canonical decimal formatting: shortest representation, no trailing zeros,
/// matching what the provider hashes over (`10`, not `10.0`).
fn format_amount(value: f64) -> String {
    format!("{}", value)
}

/// Re-serializes an IPN payload into the exact byte sequence the provider
/// signs: the fixed payment-record field set, keys sorted lexicographically,
/// no whitespace, the amount fields and `payment_id` as bare JSON numbers,
/// everything else as JSON strings. Unknown fields are dropped, missing
/// fields take their zero values, and `case` appears only when non-empty.
pub fn canonicalize_ipn_payload(body: &[u8]) -> Result<String> {
    let record: PaymentRecord =
        serde_json::from_slice(body).context("failed to parse IPN payload")?;

    let payment_id = if record.payment_id.is_empty() {
        "0".to_string()
    } else {
        record.payment_id.clone()
    };

    enum Field {
        Number(String),
        Text(String),
    }
    use Field::{Number, Text};

    // Already in lexicographic key order.
    let mut fields = vec![
        ("actually_paid", Number(format_amount(record.actually_paid))),
        ("case", Text(record.case.clone())),
        ("created_at", Text(record.created_at.clone())),
        ("order_description", Text(record.order_description.clone())),
        ("order_id", Text(record.order_id.clone())),
        ("outcome_amount", Number(format_amount(record.outcome_amount))),
        ("outcome_currency", Text(record.outcome_currency.clone())),
        ("pay_address", Text(record.pay_address.clone())),
        ("pay_amount", Number(format_amount(record.pay_amount))),
        ("pay_currency", Text(record.pay_currency.clone())),
        ("payment_id", Number(payment_id)),
        ("payment_status", Text(record.payment_status.clone())),
        ("price_amount", Number(format_amount(record.price_amount))),
        ("price_currency", Text(record.price_currency.clone())),
        ("purchase_id", Text(record.purchase_id.clone())),
        ("updated_at", Text(record.updated_at.clone())),
    ];
    if record.case.is_empty() {
        fields.retain(|(key, _)| *key != "case");
    }

    let mut out = String::with_capacity(body.len());
    out.push('{');
    for (i, (key, value)) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push('"');
        out.push_str(key);
        out.push_str("\":");
        match value {
            Number(literal) => out.push_str(literal),
            Text(text) => out.push_str(&serde_json::to_string(text)?),
        }
    }
    out.push('}');
    Ok(out)
}
