//! Paper Venue
//!
//! Deterministic in-memory venue for demo runs and tests. Market orders fill
//! at the current quote, pending orders rest until [`PaperVenue::set_quote`]
//! moves the price through them, and stops/targets are checked on every
//! quote change. Nothing here is random.

use crate::domain::entities::order::{LegOrder, OrderType, Side};
use crate::domain::entities::signal::Ticket;
use crate::domain::repositories::venue_client::{
    AccountInfo, Deal, DealEntry, OpenPosition, SymbolInfo, TaggedOrder, VenueClient, VenueError,
    VenueResult,
};
use crate::domain::services::indicators::Candle;
use async_trait::async_trait;
use chrono::{Duration, DurationRound, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct PaperPosition {
    symbol: String,
    side: Side,
    volume: f64,
    price_open: f64,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
    magic: u64,
    comment: String,
}

#[derive(Debug, Clone)]
struct PaperOrder {
    leg: LegOrder,
}

#[derive(Debug)]
struct PaperBook {
    next_ticket: Ticket,
    next_deal: u64,
    balance: f64,
    symbols: HashMap<String, SymbolInfo>,
    contract_sizes: HashMap<String, f64>,
    candles: HashMap<String, Vec<Candle>>,
    positions: BTreeMap<Ticket, PaperPosition>,
    pending: BTreeMap<Ticket, PaperOrder>,
    deals: Vec<Deal>,
    modifications: Vec<(Ticket, Option<f64>, Option<f64>)>,
    // Scripted faults
    submits_before_reject: Option<usize>,
    stuck_tickets: HashSet<Ticket>,
}

pub struct PaperVenue {
    book: Mutex<PaperBook>,
}

fn default_symbols() -> Vec<(SymbolInfo, f64)> {
    vec![
        (
            SymbolInfo {
                symbol: "XAUUSD".to_string(),
                point: 0.01,
                tick_size: 0.01,
                digits: 2,
                stops_level: 50,
                bid: 3375.00,
                ask: 3375.30,
            },
            100.0,
        ),
        (
            SymbolInfo {
                symbol: "BTCUSD".to_string(),
                point: 0.01,
                tick_size: 0.01,
                digits: 2,
                stops_level: 0,
                bid: 68_000.00,
                ask: 68_015.00,
            },
            1.0,
        ),
        (
            SymbolInfo {
                symbol: "EURUSD".to_string(),
                point: 0.00001,
                tick_size: 0.00001,
                digits: 5,
                stops_level: 10,
                bid: 1.10000,
                ask: 1.10012,
            },
            100_000.0,
        ),
    ]
}

impl PaperVenue {
    pub fn new(balance: f64) -> Self {
        let mut symbols = HashMap::new();
        let mut contract_sizes = HashMap::new();
        for (info, contract) in default_symbols() {
            contract_sizes.insert(info.symbol.clone(), contract);
            symbols.insert(info.symbol.clone(), info);
        }

        Self {
            book: Mutex::new(PaperBook {
                next_ticket: 100_001,
                next_deal: 500_001,
                balance,
                symbols,
                contract_sizes,
                candles: HashMap::new(),
                positions: BTreeMap::new(),
                pending: BTreeMap::new(),
                deals: Vec::new(),
                modifications: Vec::new(),
                submits_before_reject: None,
                stuck_tickets: HashSet::new(),
            }),
        }
    }

    fn book(&self) -> MutexGuard<'_, PaperBook> {
        self.book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add or replace a tradable symbol
    pub fn add_symbol(&self, info: SymbolInfo, contract_size: f64) {
        let mut book = self.book();
        book.contract_sizes.insert(info.symbol.clone(), contract_size);
        book.symbols.insert(info.symbol.clone(), info);
    }

    /// Move the quote, then fill pending orders and trigger stops/targets it crosses
    pub fn set_quote(&self, symbol: &str, bid: f64, ask: f64) -> VenueResult<()> {
        let mut book = self.book();
        let info = book
            .symbols
            .get_mut(symbol)
            .ok_or_else(|| VenueError::UnknownSymbol(symbol.to_string()))?;
        info.bid = bid;
        info.ask = ask;
        book.sweep(symbol);
        Ok(())
    }

    /// Serve these candles from `get_candles` instead of the generated series
    pub fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.book().candles.insert(symbol.to_string(), candles);
    }

    /// Accept `count` more legs, then reject every submission
    pub fn reject_submits_after(&self, count: usize) {
        self.book().submits_before_reject = Some(count);
    }

    /// Make close and cancel fail for `ticket`
    pub fn stick_ticket(&self, ticket: Ticket) {
        self.book().stuck_tickets.insert(ticket);
    }

    /// Open positions and pending orders, ascending
    pub fn open_tickets(&self) -> Vec<Ticket> {
        let book = self.book();
        let mut tickets: Vec<Ticket> = book.positions.keys().chain(book.pending.keys()).copied().collect();
        tickets.sort_unstable();
        tickets
    }

    /// Every SL/TP modification accepted so far
    pub fn modifications(&self) -> Vec<(Ticket, Option<f64>, Option<f64>)> {
        self.book().modifications.clone()
    }

    pub fn position_stop_loss(&self, ticket: Ticket) -> Option<f64> {
        self.book().positions.get(&ticket).and_then(|p| p.stop_loss)
    }
}

impl PaperBook {
    fn allocate_ticket(&mut self) -> Ticket {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    fn record_deal(&mut self, position_id: Ticket, pos: &PaperPosition, entry: DealEntry, profit: f64) {
        let ticket = self.next_deal;
        self.next_deal += 1;
        self.deals.push(Deal {
            ticket,
            position_id,
            symbol: pos.symbol.clone(),
            entry,
            profit,
            magic: pos.magic,
            comment: pos.comment.clone(),
            time: Utc::now(),
        });
    }

    fn open_position(&mut self, ticket: Ticket, leg: &LegOrder, price: f64) {
        let position = PaperPosition {
            symbol: leg.symbol.clone(),
            side: leg.order_type.side(),
            volume: leg.volume,
            price_open: price,
            stop_loss: leg.stop_loss,
            take_profit: leg.take_profit,
            magic: leg.magic,
            comment: leg.comment.clone(),
        };
        self.record_deal(ticket, &position, DealEntry::In, 0.0);
        self.positions.insert(ticket, position);
        debug!("[paper] opened {} {} {} @ {}", ticket, leg.order_type, leg.symbol, price);
    }

    fn profit(&self, pos: &PaperPosition, exit: f64) -> f64 {
        let contract = self.contract_sizes.get(&pos.symbol).copied().unwrap_or(1.0);
        (exit - pos.price_open) * pos.side.sign() * pos.volume * contract
    }

    fn close(&mut self, ticket: Ticket, exit: f64) {
        if let Some(pos) = self.positions.remove(&ticket) {
            let profit = self.profit(&pos, exit);
            self.balance += profit;
            self.record_deal(ticket, &pos, DealEntry::Out, profit);
            info!("[paper] closed {} {} @ {} profit {:.2}", ticket, pos.symbol, exit, profit);
        }
    }

    fn sweep(&mut self, symbol: &str) {
        let Some(info) = self.symbols.get(symbol).cloned() else {
            return;
        };

        let triggered: Vec<(Ticket, f64)> = self
            .pending
            .iter()
            .filter(|(_, o)| o.leg.symbol == symbol)
            .filter_map(|(ticket, o)| {
                let price = o.leg.price?;
                let hit = match o.leg.order_type {
                    OrderType::BuyLimit => info.ask <= price,
                    OrderType::SellLimit => info.bid >= price,
                    OrderType::BuyStop => info.ask >= price,
                    OrderType::SellStop => info.bid <= price,
                    OrderType::Buy | OrderType::Sell => true,
                };
                hit.then_some((*ticket, price))
            })
            .collect();
        for (ticket, price) in triggered {
            if let Some(order) = self.pending.remove(&ticket) {
                self.open_position(ticket, &order.leg, price);
            }
        }

        let exits: Vec<(Ticket, f64)> = self
            .positions
            .iter()
            .filter(|(_, p)| p.symbol == symbol)
            .filter_map(|(ticket, p)| {
                let mark = info.market_price(opposite(p.side));
                let stopped = p.stop_loss.filter(|sl| match p.side {
                    Side::Buy => mark <= *sl,
                    Side::Sell => mark >= *sl,
                });
                let target = p.take_profit.filter(|tp| match p.side {
                    Side::Buy => mark >= *tp,
                    Side::Sell => mark <= *tp,
                });
                stopped.or(target).map(|exit| (*ticket, exit))
            })
            .collect();
        for (ticket, exit) in exits {
            self.close(ticket, exit);
        }
    }
}

fn opposite(side: Side) -> Side {
    match side {
        Side::Buy => Side::Sell,
        Side::Sell => Side::Buy,
    }
}

#[async_trait]
impl VenueClient for PaperVenue {
    fn name(&self) -> &str {
        "paper"
    }

    async fn symbol_info(&self, symbol: &str) -> VenueResult<SymbolInfo> {
        self.book()
            .symbols
            .get(symbol)
            .cloned()
            .ok_or_else(|| VenueError::UnknownSymbol(symbol.to_string()))
    }

    async fn submit_leg(&self, leg: &LegOrder) -> VenueResult<String> {
        let mut book = self.book();
        let info = book
            .symbols
            .get(&leg.symbol)
            .cloned()
            .ok_or_else(|| VenueError::UnknownSymbol(leg.symbol.clone()))?;

        if let Some(remaining) = book.submits_before_reject {
            if remaining == 0 {
                return Err(VenueError::Rejected("paper venue rejected the order".to_string()));
            }
            book.submits_before_reject = Some(remaining - 1);
        }

        let ticket = book.allocate_ticket();
        if leg.order_type.is_market() {
            let price = info.market_price(leg.order_type.side());
            book.open_position(ticket, leg, price);
        } else {
            book.pending.insert(ticket, PaperOrder { leg: leg.clone() });
            book.sweep(&leg.symbol);
        }
        Ok(ticket.to_string())
    }

    async fn close_position(&self, ticket: Ticket) -> VenueResult<()> {
        let mut book = self.book();
        if book.stuck_tickets.contains(&ticket) {
            return Err(VenueError::Rejected(format!("ticket {} is frozen", ticket)));
        }
        let pos = book
            .positions
            .get(&ticket)
            .cloned()
            .ok_or(VenueError::TicketNotFound(ticket))?;
        let exit = book
            .symbols
            .get(&pos.symbol)
            .map(|info| info.market_price(opposite(pos.side)))
            .ok_or_else(|| VenueError::UnknownSymbol(pos.symbol.clone()))?;
        book.close(ticket, exit);
        Ok(())
    }

    async fn cancel_order(&self, ticket: Ticket) -> VenueResult<()> {
        let mut book = self.book();
        if book.stuck_tickets.contains(&ticket) {
            return Err(VenueError::Rejected(format!("ticket {} is frozen", ticket)));
        }
        book.pending
            .remove(&ticket)
            .map(|_| ())
            .ok_or(VenueError::TicketNotFound(ticket))
    }

    async fn modify_stop_take(
        &self,
        ticket: Ticket,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> VenueResult<()> {
        let mut book = self.book();
        if let Some(pos) = book.positions.get_mut(&ticket) {
            pos.stop_loss = stop_loss.or(pos.stop_loss);
            pos.take_profit = take_profit.or(pos.take_profit);
        } else if let Some(order) = book.pending.get_mut(&ticket) {
            order.leg.stop_loss = stop_loss.or(order.leg.stop_loss);
            order.leg.take_profit = take_profit.or(order.leg.take_profit);
        } else {
            return Err(VenueError::TicketNotFound(ticket));
        }
        book.modifications.push((ticket, stop_loss, take_profit));
        Ok(())
    }

    async fn get_deals_history(&self, days: u32) -> VenueResult<Vec<Deal>> {
        let since = Utc::now() - Duration::days(days as i64);
        Ok(self.book().deals.iter().filter(|d| d.time >= since).cloned().collect())
    }

    async fn get_open_positions(&self, tickets: &[Ticket]) -> VenueResult<Vec<OpenPosition>> {
        let book = self.book();
        Ok(tickets
            .iter()
            .filter_map(|ticket| {
                book.positions.get(ticket).map(|p| OpenPosition {
                    ticket: *ticket,
                    symbol: p.symbol.clone(),
                    side: p.side,
                    volume: p.volume,
                    price_open: p.price_open,
                    stop_loss: p.stop_loss,
                    take_profit: p.take_profit,
                })
            })
            .collect())
    }

    async fn get_account_info(&self) -> VenueResult<AccountInfo> {
        let book = self.book();
        let floating: f64 = book
            .positions
            .values()
            .filter_map(|p| {
                let info = book.symbols.get(&p.symbol)?;
                Some(book.profit(p, info.market_price(opposite(p.side))))
            })
            .sum();
        Ok(AccountInfo {
            balance: book.balance,
            equity: book.balance + floating,
            currency: "USD".to_string(),
        })
    }

    async fn get_tagged_orders(&self, magic: u64) -> VenueResult<Vec<TaggedOrder>> {
        let book = self.book();
        let positions = book.positions.iter().filter(|(_, p)| p.magic == magic).map(|(t, p)| TaggedOrder {
            ticket: *t,
            symbol: p.symbol.clone(),
            comment: p.comment.clone(),
            pending: false,
        });
        let pending = book.pending.iter().filter(|(_, o)| o.leg.magic == magic).map(|(t, o)| TaggedOrder {
            ticket: *t,
            symbol: o.leg.symbol.clone(),
            comment: o.leg.comment.clone(),
            pending: true,
        });
        Ok(positions.chain(pending).collect())
    }

    async fn get_candles(&self, symbol: &str, count: usize) -> VenueResult<Vec<Candle>> {
        let book = self.book();
        if let Some(candles) = book.candles.get(symbol) {
            let skip = candles.len().saturating_sub(count);
            return Ok(candles[skip..].to_vec());
        }

        let info = book
            .symbols
            .get(symbol)
            .ok_or_else(|| VenueError::UnknownSymbol(symbol.to_string()))?;
        let mid = (info.bid + info.ask) / 2.0;
        let step = Duration::minutes(5);
        let last_open = Utc::now()
            .duration_trunc(step)
            .map_err(|e| VenueError::Malformed(e.to_string()))?
            - step;

        // Gentle wave around the current mid, closed bars only
        let mut candles = Vec::with_capacity(count);
        let mut previous = mid;
        for i in 0..count {
            let phase = (i as f64) / 3.0;
            let close = mid * (1.0 + 0.001 * phase.sin());
            let open = previous;
            let high = open.max(close) * 1.0002;
            let low = open.min(close) * 0.9998;
            let time = last_open - step * (count - 1 - i) as i32;
            candles.push(
                Candle::new(open, high, low, close, 1.0, time).map_err(VenueError::Malformed)?,
            );
            previous = close;
        }
        Ok(candles)
    }
}
