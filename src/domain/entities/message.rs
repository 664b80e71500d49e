use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::entities::order::OrderType;

/// A chat message as delivered by the message source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel_id: String,
    pub message_id: i64,
    pub text: String,
    #[serde(default)]
    pub is_reply: bool,
    #[serde(default)]
    pub reply_to_message_id: Option<i64>,
    #[serde(default)]
    pub channel_display_name: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Structured fields extracted from a message by the parser
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedSignal {
    #[serde(default, deserialize_with = "non_empty_string")]
    pub symbol: Option<String>,
    #[serde(default, deserialize_with = "lenient_order_type")]
    pub order_type: Option<OrderType>,
    #[serde(default)]
    pub entry_price: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub take_profits: Vec<f64>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_cancellation: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_modification: bool,
}

fn non_empty_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null")))
}

// The model sometimes answers "Buy Limit" or "HOLD"; unknown values are treated as absent.
fn lenient_order_type<'de, D>(deserializer: D) -> Result<Option<OrderType>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.and_then(|s| s.parse::<OrderType>().ok()))
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Vec<f64>> = Option::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<bool> = Option::deserialize(deserializer)?;
    Ok(value.unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_signal_defaults_missing_fields() {
        let parsed: ParsedSignal = serde_json::from_str(r#"{"symbol": "GOLD", "entry_price": 3373.0}"#).unwrap();
        assert_eq!(parsed.symbol.as_deref(), Some("GOLD"));
        assert_eq!(parsed.entry_price, Some(3373.0));
        assert!(parsed.take_profits.is_empty());
        assert!(!parsed.is_cancellation);
        assert!(!parsed.is_modification);
    }

    #[test]
    fn test_parsed_signal_tolerates_nulls_and_odd_values() {
        let parsed: ParsedSignal = serde_json::from_str(
            r#"{"symbol": "", "order_type": "Buy Limit", "take_profits": null, "is_cancellation": null}"#,
        )
        .unwrap();
        assert_eq!(parsed.symbol, None);
        assert_eq!(parsed.order_type, Some(OrderType::BuyLimit));
        assert!(parsed.take_profits.is_empty());
        assert!(!parsed.is_cancellation);

        let parsed: ParsedSignal = serde_json::from_str(r#"{"order_type": "HOLD"}"#).unwrap();
        assert_eq!(parsed.order_type, None);
    }

    #[test]
    fn test_inbound_message_defaults() {
        let message: InboundMessage =
            serde_json::from_str(r#"{"channel_id": "-100", "message_id": 7, "text": "cancel"}"#).unwrap();
        assert!(!message.is_reply);
        assert_eq!(message.reply_to_message_id, None);
    }
}
