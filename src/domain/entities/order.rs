use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Direction of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells. Handy for "entry ± offset" style arithmetic.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order types understood by the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Buy,
    Sell,
    BuyLimit,
    SellLimit,
    BuyStop,
    SellStop,
}

impl OrderType {
    pub fn side(&self) -> Side {
        match self {
            OrderType::Buy | OrderType::BuyLimit | OrderType::BuyStop => Side::Buy,
            OrderType::Sell | OrderType::SellLimit | OrderType::SellStop => Side::Sell,
        }
    }

    /// Market orders execute immediately; everything else rests as a pending order.
    pub fn is_market(&self) -> bool {
        matches!(self, OrderType::Buy | OrderType::Sell)
    }

    pub fn limit_for(side: Side) -> Self {
        match side {
            Side::Buy => OrderType::BuyLimit,
            Side::Sell => OrderType::SellLimit,
        }
    }

    pub fn market_for(side: Side) -> Self {
        match side {
            Side::Buy => OrderType::Buy,
            Side::Sell => OrderType::Sell,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Buy => "BUY",
            OrderType::Sell => "SELL",
            OrderType::BuyLimit => "BUY_LIMIT",
            OrderType::SellLimit => "SELL_LIMIT",
            OrderType::BuyStop => "BUY_STOP",
            OrderType::SellStop => "SELL_STOP",
        }
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "BUY" => Ok(OrderType::Buy),
            "SELL" => Ok(OrderType::Sell),
            "BUY_LIMIT" => Ok(OrderType::BuyLimit),
            "SELL_LIMIT" => Ok(OrderType::SellLimit),
            "BUY_STOP" => Ok(OrderType::BuyStop),
            "SELL_STOP" => Ok(OrderType::SellStop),
            other => Err(format!("Unknown order type: {}", other)),
        }
    }
}

/// Everything needed to submit a signal to the venue. One leg is sent per take-profit.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRequest {
    pub signal_id: i64,
    pub symbol: String,
    pub order_type: OrderType,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profits: Vec<f64>,
}

impl TradeRequest {
    /// Take-profit per leg; an empty TP list still yields one leg without a target.
    pub fn legs(&self) -> Vec<Option<f64>> {
        if self.take_profits.is_empty() {
            vec![None]
        } else {
            self.take_profits.iter().copied().map(Some).collect()
        }
    }
}

/// A single order sent to the venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegOrder {
    pub symbol: String,
    pub order_type: OrderType,
    pub volume: f64,
    /// Requested price; None for market orders
    pub price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub magic: u64,
    pub comment: String,
}

/// Bot-specific identifier stamped on every leg, used to find our orders after a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTag {
    pub magic: u64,
    pub prefix: String,
}

impl OrderTag {
    pub fn new(magic: u64, prefix: impl Into<String>) -> Self {
        Self {
            magic,
            prefix: prefix.into(),
        }
    }

    /// Comment for leg `leg` (1-based) of signal `signal_id`, e.g. "sb:42:1"
    pub fn comment(&self, signal_id: i64, leg: usize) -> String {
        format!("{}:{}:{}", self.prefix, signal_id, leg)
    }

    /// Signal id encoded in a comment produced by [`OrderTag::comment`]
    pub fn signal_id_from(&self, comment: &str) -> Option<i64> {
        let mut parts = comment.trim().split(':');
        if parts.next()? != self.prefix {
            return None;
        }
        let id = parts.next()?.parse().ok()?;
        parts.next()?.parse::<usize>().ok()?;
        Some(id)
    }
}
