//! Serde helper for provider fields that arrive either as a JSON number or a
//! JSON string (NowPayments emits `payment_id` both ways depending on the
//! endpoint). The value is kept as its textual form.

use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S>(value: &str, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(value)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(serde_json::Number),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(number) => Ok(number.to_string()),
        NumberOrString::String(string) => Ok(string),
    }
}
