//! Database Models
//!
//! Persistent data structures for trade signals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

use crate::domain::entities::order::{OrderType, TradeRequest};
use crate::domain::entities::signal::{parse_stored_tickets, SignalStatus, Ticket, TicketParseError};

/// Signal record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SignalRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub channel_id: String,
    pub channel_name: Option<String>,
    pub message_id: i64,
    pub original_message: String,
    pub symbol: String,
    pub order_type: Option<OrderType>,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profits: Json<Vec<f64>>,
    pub comment: Option<String>,
    pub status: SignalStatus,
    pub broker_tickets: Option<String>, // JSON array, kept raw so corruption is detectable
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SignalRecord {
    pub fn tickets(&self) -> Result<Vec<Ticket>, TicketParseError> {
        parse_stored_tickets(self.broker_tickets.as_deref())
    }

    pub fn has_trade_levels(&self) -> bool {
        self.stop_loss.is_some() || !self.take_profits.is_empty()
    }

    /// Order type to submit. When the message never named one, the side is
    /// implied by where the stop sits relative to the entry.
    pub fn effective_order_type(&self) -> Option<OrderType> {
        if self.order_type.is_some() {
            return self.order_type;
        }
        match (self.entry_price, self.stop_loss) {
            (Some(entry), Some(sl)) if sl < entry => Some(OrderType::Buy),
            (Some(entry), Some(sl)) if sl > entry => Some(OrderType::Sell),
            _ => None,
        }
    }

    pub fn trade_request(&self) -> Option<TradeRequest> {
        Some(TradeRequest {
            signal_id: self.id,
            symbol: self.symbol.clone(),
            order_type: self.effective_order_type()?,
            entry_price: self.entry_price,
            stop_loss: self.stop_loss,
            take_profits: self.take_profits.0.clone(),
        })
    }
}

/// Create signal input
#[derive(Debug, Clone)]
pub struct CreateSignal {
    pub timestamp: DateTime<Utc>,
    pub channel_id: String,
    pub channel_name: Option<String>,
    pub message_id: i64,
    pub original_message: String,
    pub symbol: String,
    pub order_type: Option<OrderType>,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profits: Vec<f64>,
    pub comment: Option<String>,
    pub status: SignalStatus,
}

/// New trade levels for an existing signal. `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct UpdateLevels {
    pub order_type: Option<OrderType>,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profits: Option<Vec<f64>>,
}
