//! Serde helper for provider amount fields that arrive either as a JSON
//! number or a stringified decimal (`"pay_amount": "10.5"` on the payment
//! creation endpoint, a plain number everywhere else).

use serde::{de, Deserialize, Deserializer, Serializer};

pub fn serialize<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(*value)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(number) => Ok(number),
        NumberOrString::String(string) if string.is_empty() => Ok(0.),
        NumberOrString::String(string) => string.parse().map_err(de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Wrapper(#[serde(with = "super")] f64);

    #[test]
    fn accepts_number_and_string() {
        let Wrapper(amount) = serde_json::from_str("9.9").unwrap();
        assert_eq!(amount, 9.9);
        let Wrapper(amount) = serde_json::from_str("\"9.9\"").unwrap();
        assert_eq!(amount, 9.9);
        let Wrapper(amount) = serde_json::from_str("\"\"").unwrap();
        assert_eq!(amount, 0.);
    }
}
