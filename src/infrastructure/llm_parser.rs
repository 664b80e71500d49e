//! LLM Signal Parser
//!
//! Sends the raw message to a Gemini `generateContent` endpoint with a fixed
//! extraction prompt and reads back one JSON object with the signal fields.

use crate::domain::entities::message::ParsedSignal;
use crate::domain::errors::ParseError;
use crate::domain::repositories::signal_parser::SignalParser;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const EXTRACTION_PROMPT: &str = r#"You extract trading signals from chat messages.
Answer with ONE JSON object and nothing else, using exactly these keys:
{
  "symbol": string or null,
  "order_type": one of "BUY", "SELL", "BUY_LIMIT", "SELL_LIMIT", "BUY_STOP", "SELL_STOP", or null,
  "entry_price": number or null (first price of an entry zone),
  "stop_loss": number or null,
  "take_profits": array of numbers (empty if none),
  "is_cancellation": true if the message cancels or closes a previous signal,
  "is_modification": true if the message changes stop loss or take profit of a running signal
}
Do not invent values that are not in the message.

Message:
"#;

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone)]
pub struct LlmSignalParser {
    api_key: String,
    model_name: String,
    base_url: String,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl LlmSignalParser {
    pub fn new(
        api_key: String,
        model_name: String,
        base_url: String,
        timeout_secs: u64,
    ) -> Result<Self, ParseError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ParseError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            model_name,
            base_url,
            timeout_secs,
            client,
        })
    }

    fn api_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model_name,
            self.api_key
        )
    }
}

/// First balanced `{...}` in `text`, ignoring code fences and prose around it.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn parse_reply(reply: &str) -> Result<ParsedSignal, ParseError> {
    let json = extract_json_object(reply).ok_or(ParseError::NoJson)?;
    serde_json::from_str(json).map_err(|e| ParseError::InvalidJson(e.to_string()))
}

#[async_trait]
impl SignalParser for LlmSignalParser {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn parse(&self, text: &str) -> Result<ParsedSignal, ParseError> {
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: format!("{}{}", EXTRACTION_PROMPT, text),
                }],
            }],
            generation_config: GenerationConfig { temperature: 0.0 },
        };

        let response = self
            .client
            .post(self.api_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ParseError::Timeout(self.timeout_secs)
                } else {
                    // Strip the URL, it carries the API key
                    ParseError::Transport(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ParseError::BadStatus {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }

        let reply: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ParseError::InvalidJson(e.without_url().to_string()))?;

        let text: String = reply
            .candidates
            .into_iter()
            .next()
            .map(|c| c.content.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        debug!("Parser reply: {}", text);

        parse_reply(&text)
    }
}

/// Stand-in when no parser API key is configured. Every message is dropped.
#[derive(Debug, Default, Clone)]
pub struct UnconfiguredParser;

#[async_trait]
impl SignalParser for UnconfiguredParser {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn parse(&self, _text: &str) -> Result<ParsedSignal, ParseError> {
        Err(ParseError::Transport("no parser API key configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::order::OrderType;

    #[test]
    fn test_extract_json_from_fenced_reply() {
        let reply = "```json\n{\"symbol\": \"GOLD\", \"note\": \"a } inside\"}\n```";
        assert_eq!(
            extract_json_object(reply),
            Some("{\"symbol\": \"GOLD\", \"note\": \"a } inside\"}")
        );
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("{\"open\": 1"), None);
    }

    #[test]
    fn test_parse_reply_defaults_missing_flags() {
        let parsed = parse_reply(
            r#"Here you go: {"symbol": "BTCUSD", "order_type": "BUY", "stop_loss": 67000, "take_profits": [69500]}"#,
        )
        .unwrap();
        assert_eq!(parsed.symbol.as_deref(), Some("BTCUSD"));
        assert_eq!(parsed.order_type, Some(OrderType::Buy));
        assert_eq!(parsed.entry_price, None);
        assert_eq!(parsed.take_profits, vec![69500.0]);
        assert!(!parsed.is_cancellation);
        assert!(!parsed.is_modification);
    }

    #[test]
    fn test_parse_reply_errors() {
        assert_eq!(parse_reply("sorry"), Err(ParseError::NoJson));
        assert!(matches!(
            parse_reply(r#"{"take_profits": "many"}"#),
            Err(ParseError::InvalidJson(_))
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_parser_drops_everything() {
        assert!(matches!(
            UnconfiguredParser.parse("Buy gold").await,
            Err(ParseError::Transport(_))
        ));
    }

    #[test]
    fn test_api_url() {
        let parser = LlmSignalParser::new(
            "k".to_string(),
            "gemini-1.5-flash".to_string(),
            "https://example.test/v1beta/".to_string(),
            5,
        )
        .unwrap();
        assert_eq!(
            parser.api_url(),
            "https://example.test/v1beta/models/gemini-1.5-flash:generateContent?key=k"
        );
    }
}
