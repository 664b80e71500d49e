//! Venue Client Trait
//!
//! This module defines the `VenueClient` trait, the single seam between the
//! signal engine and a trading venue. Implementations only provide raw I/O;
//! the leg fan-out for `place_order` and the close-then-cancel fallback are
//! provided methods so every venue follows the same contract:
//!
//! - one order per take-profit leg (or a single leg when there is no TP),
//!   all sharing entry, side and stop-loss
//! - prices normalized to the venue tick and validated before any leg is sent
//! - no all-or-nothing guarantee: a failure after some legs opened is reported
//!   as [`VenueError::PartialFill`] carrying the opened tickets

use crate::domain::entities::order::{LegOrder, OrderTag, Side, TradeRequest};
use crate::domain::entities::signal::Ticket;
use crate::domain::services::indicators::Candle;
use crate::domain::services::order_validation;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

/// Common result type for venue operations
pub type VenueResult<T> = Result<T, VenueError>;

/// Errors that can occur during venue operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VenueError {
    /// Trade data rejected before anything was sent
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Venue refused the request
    #[error("Rejected by venue: {0}")]
    Rejected(String),

    /// Some legs opened, then one failed. The opened tickets are live.
    #[error("Leg {failed_leg}/{total_legs} failed after opening {opened:?}: {reason}")]
    PartialFill {
        opened: Vec<String>,
        failed_leg: usize,
        total_legs: usize,
        reason: String,
    },

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Ticket not found: {0}")]
    TicketNotFound(Ticket),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Venue call timed out after {0}ms")]
    Timeout(u64),

    #[error("Malformed venue response: {0}")]
    Malformed(String),
}

/// Trading parameters of one symbol plus the current quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    /// Smallest price increment
    pub point: f64,
    /// Tick size orders must be rounded to (usually equal to `point`)
    pub tick_size: f64,
    pub digits: u32,
    /// Minimum SL/TP distance from price, in points
    #[serde(default)]
    pub stops_level: u32,
    pub bid: f64,
    pub ask: f64,
}

impl SymbolInfo {
    /// Conventional pip: ten points on 3/5-digit quotes, one point otherwise
    pub fn pip_size(&self) -> f64 {
        if self.digits == 3 || self.digits == 5 {
            self.point * 10.0
        } else {
            self.point
        }
    }

    pub fn min_stop_distance(&self) -> f64 {
        self.stops_level as f64 * self.point
    }

    /// Price a market order on `side` would fill at
    pub fn market_price(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.ask,
            Side::Sell => self.bid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub balance: f64,
    pub equity: f64,
    #[serde(default)]
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealEntry {
    In,
    Out,
    InOut,
}

/// One executed deal from the venue history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub ticket: u64,
    /// Position the deal belongs to; equals the ticket returned when the leg was placed
    pub position_id: Ticket,
    pub symbol: String,
    pub entry: DealEntry,
    pub profit: f64,
    #[serde(default)]
    pub magic: u64,
    #[serde(default)]
    pub comment: String,
    pub time: DateTime<Utc>,
}

impl Deal {
    /// Deals that take (part of) a position off the book
    pub fn is_close(&self) -> bool {
        matches!(self.entry, DealEntry::Out | DealEntry::InOut)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub ticket: Ticket,
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub price_open: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

/// A live position or pending order carrying our magic number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedOrder {
    pub ticket: Ticket,
    pub symbol: String,
    pub comment: String,
    pub pending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    PositionClosed,
    OrderCancelled,
}

/// Venue client trait providing the common interface for all venues
#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Get the name of this venue
    fn name(&self) -> &str;

    /// Tick size, stop constraints and current quote for a symbol
    async fn symbol_info(&self, symbol: &str) -> VenueResult<SymbolInfo>;

    /// Submit one already-validated leg and return the venue ticket as text
    async fn submit_leg(&self, leg: &LegOrder) -> VenueResult<String>;

    /// Close an open position at market
    async fn close_position(&self, ticket: Ticket) -> VenueResult<()>;

    /// Delete a pending order
    async fn cancel_order(&self, ticket: Ticket) -> VenueResult<()>;

    /// Change SL and/or TP of a position or pending order. `None` keeps the current value.
    async fn modify_stop_take(
        &self,
        ticket: Ticket,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> VenueResult<()>;

    /// Deals executed in the last `days` days
    async fn get_deals_history(&self, days: u32) -> VenueResult<Vec<Deal>>;

    /// Subset of `tickets` that are still open positions
    async fn get_open_positions(&self, tickets: &[Ticket]) -> VenueResult<Vec<OpenPosition>>;

    async fn get_account_info(&self) -> VenueResult<AccountInfo>;

    /// All live positions and pending orders stamped with `magic`
    async fn get_tagged_orders(&self, magic: u64) -> VenueResult<Vec<TaggedOrder>>;

    /// Most recent `count` closed candles, oldest first
    async fn get_candles(&self, symbol: &str, count: usize) -> VenueResult<Vec<Candle>>;

    /// Place one order per take-profit leg.
    ///
    /// Everything is validated before the first leg is sent. Returns the raw
    /// ticket strings in leg order.
    async fn place_order(
        &self,
        trade: &TradeRequest,
        volume_per_leg: f64,
        tag: &OrderTag,
    ) -> VenueResult<Vec<String>> {
        let info = self.symbol_info(&trade.symbol).await?;
        let legs = order_validation::build_legs(trade, volume_per_leg, &info, tag)?;
        let total_legs = legs.len();

        let mut opened = Vec::with_capacity(total_legs);
        for (idx, leg) in legs.iter().enumerate() {
            match self.submit_leg(leg).await {
                Ok(ticket) => {
                    info!(
                        "[{}] signal {} leg {}/{} placed: ticket {}",
                        self.name(),
                        trade.signal_id,
                        idx + 1,
                        total_legs,
                        ticket
                    );
                    opened.push(ticket);
                }
                Err(e) if opened.is_empty() => return Err(e),
                Err(e) => {
                    error!(
                        "[{}] signal {} leg {}/{} failed after {} opened: {}",
                        self.name(),
                        trade.signal_id,
                        idx + 1,
                        total_legs,
                        opened.len(),
                        e
                    );
                    return Err(VenueError::PartialFill {
                        opened,
                        failed_leg: idx + 1,
                        total_legs,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(opened)
    }

    /// Close the position; if that fails the ticket is treated as a pending order and deleted.
    async fn close_or_cancel(&self, ticket: Ticket) -> VenueResult<CloseOutcome> {
        match self.close_position(ticket).await {
            Ok(()) => Ok(CloseOutcome::PositionClosed),
            Err(close_err) => match self.cancel_order(ticket).await {
                Ok(()) => Ok(CloseOutcome::OrderCancelled),
                Err(cancel_err) => Err(VenueError::Rejected(format!(
                    "close failed ({}), cancel failed ({})",
                    close_err, cancel_err
                ))),
            },
        }
    }
}
