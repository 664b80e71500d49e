//! HTTP Bridge Venue
//!
//! JSON client for a small HTTP bridge running next to the trading terminal.
//! The bridge owns the terminal session; this client only maps the venue
//! operations onto its endpoints:
//!
//! - `GET  /symbols/{symbol}`              -> `SymbolInfo`
//! - `POST /orders`                        -> `{"ticket": ...}`
//! - `POST /positions/{ticket}/close`
//! - `DELETE /orders/{ticket}`
//! - `POST /tickets/{ticket}/modify`       (`{"stop_loss", "take_profit"}`)
//! - `GET  /deals?days=N`
//! - `GET  /positions?tickets=1,2`
//! - `GET  /account`
//! - `GET  /tagged?magic=N`
//! - `GET  /candles/{symbol}?count=N`
//!
//! Errors come back as `{"error": "..."}` with a non-2xx status.

use crate::domain::entities::order::LegOrder;
use crate::domain::entities::signal::Ticket;
use crate::domain::repositories::venue_client::{
    AccountInfo, Deal, OpenPosition, SymbolInfo, TaggedOrder, VenueClient, VenueError, VenueResult,
};
use crate::domain::services::indicators::Candle;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Deserialize)]
struct BridgeError {
    error: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TicketValue {
    Number(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct PlacedOrder {
    ticket: TicketValue,
}

#[derive(Debug, Serialize)]
struct ModifyRequest {
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
}

pub struct HttpBridgeVenue {
    client: Client,
    base_url: Url,
}

impl HttpBridgeVenue {
    pub fn new(base_url: &str, timeout: Duration) -> VenueResult<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| VenueError::InvalidOrder(format!("Invalid bridge URL '{}': {}", base_url, e)))?;
        // Keep a trailing slash so joins append instead of replacing the last segment
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("signalbridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| VenueError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> VenueResult<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| VenueError::Malformed(format!("Bad bridge path '{}': {}", path, e)))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<String>,
        not_found: impl FnOnce() -> VenueError,
    ) -> VenueResult<T> {
        let raw = self.send(method, url, body, not_found).await?;
        serde_json::from_str(&raw)
            .map_err(|e| VenueError::Malformed(format!("{} in '{}'", e, truncate(&raw, 200))))
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<String>,
        not_found: impl FnOnce() -> VenueError,
    ) -> VenueResult<String> {
        debug!("bridge {} {}", method, url);
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                VenueError::Network(format!("bridge request timed out: {}", e))
            } else {
                VenueError::Network(format!("bridge request failed: {}", e))
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| VenueError::Network(format!("Failed to read bridge response: {}", e)))?;

        if status.is_success() {
            return Ok(text);
        }

        let message = serde_json::from_str::<BridgeError>(&text)
            .map(|e| e.error)
            .unwrap_or_else(|_| truncate(&text, 200).to_string());
        Err(match status {
            StatusCode::NOT_FOUND => not_found(),
            s if s.is_client_error() => VenueError::Rejected(format!("{} - {}", s, message)),
            s => VenueError::Network(format!("bridge error {} - {}", s, message)),
        })
    }
}

fn to_json<T: Serialize>(value: &T) -> VenueResult<String> {
    serde_json::to_string(value).map_err(|e| VenueError::InvalidOrder(e.to_string()))
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn rejected() -> VenueError {
    VenueError::Rejected("not found".to_string())
}

#[async_trait]
impl VenueClient for HttpBridgeVenue {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn symbol_info(&self, symbol: &str) -> VenueResult<SymbolInfo> {
        let url = self.url(&format!("symbols/{}", symbol))?;
        self.call(Method::GET, url, None, || VenueError::UnknownSymbol(symbol.to_string()))
            .await
    }

    async fn submit_leg(&self, leg: &LegOrder) -> VenueResult<String> {
        let url = self.url("orders")?;
        let body = to_json(leg)?;
        let placed: PlacedOrder = self
            .call(Method::POST, url, Some(body), || VenueError::UnknownSymbol(leg.symbol.clone()))
            .await?;
        Ok(match placed.ticket {
            TicketValue::Number(n) => n.to_string(),
            TicketValue::Text(s) => s,
        })
    }

    async fn close_position(&self, ticket: Ticket) -> VenueResult<()> {
        let url = self.url(&format!("positions/{}/close", ticket))?;
        self.send(Method::POST, url, None, || VenueError::TicketNotFound(ticket))
            .await
            .map(|_| ())
    }

    async fn cancel_order(&self, ticket: Ticket) -> VenueResult<()> {
        let url = self.url(&format!("orders/{}", ticket))?;
        self.send(Method::DELETE, url, None, || VenueError::TicketNotFound(ticket))
            .await
            .map(|_| ())
    }

    async fn modify_stop_take(
        &self,
        ticket: Ticket,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> VenueResult<()> {
        let url = self.url(&format!("tickets/{}/modify", ticket))?;
        let body = ModifyRequest {
            stop_loss,
            take_profit,
        };
        self.send(Method::POST, url, Some(to_json(&body)?), || VenueError::TicketNotFound(ticket))
            .await
            .map(|_| ())
    }

    async fn get_deals_history(&self, days: u32) -> VenueResult<Vec<Deal>> {
        let mut url = self.url("deals")?;
        url.query_pairs_mut().append_pair("days", &days.to_string());
        self.call(Method::GET, url, None, rejected).await
    }

    async fn get_open_positions(&self, tickets: &[Ticket]) -> VenueResult<Vec<OpenPosition>> {
        if tickets.is_empty() {
            return Ok(Vec::new());
        }
        let joined = tickets.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(",");
        let mut url = self.url("positions")?;
        url.query_pairs_mut().append_pair("tickets", &joined);
        self.call(Method::GET, url, None, rejected).await
    }

    async fn get_account_info(&self) -> VenueResult<AccountInfo> {
        let url = self.url("account")?;
        self.call(Method::GET, url, None, rejected).await
    }

    async fn get_tagged_orders(&self, magic: u64) -> VenueResult<Vec<TaggedOrder>> {
        let mut url = self.url("tagged")?;
        url.query_pairs_mut().append_pair("magic", &magic.to_string());
        self.call(Method::GET, url, None, rejected).await
    }

    async fn get_candles(&self, symbol: &str, count: usize) -> VenueResult<Vec<Candle>> {
        let mut url = self.url(&format!("candles/{}", symbol))?;
        url.query_pairs_mut().append_pair("count", &count.to_string());
        self.call(Method::GET, url, None, || VenueError::UnknownSymbol(symbol.to_string()))
            .await
    }
}
