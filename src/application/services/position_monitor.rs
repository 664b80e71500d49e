//! Position Monitor
//!
//! One iteration of the breakeven loop. Once any leg of an actively managed
//! signal closes in profit, the stops of its remaining open legs move to
//! entry plus a small offset and the signal leaves active management as
//! `BREAKEVEN_SET`. The same deal history feeds realized P&L to the risk
//! guard.

use crate::domain::entities::signal::{SignalStatus, Ticket};
use crate::domain::repositories::venue_client::{Deal, VenueClient, VenueError};
use crate::domain::services::order_validation::normalize_price;
use crate::domain::services::risk_guard::RiskGuard;
use crate::persistence::models::SignalRecord;
use crate::persistence::repository::SignalRepository;
use crate::persistence::DatabaseError;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Venue error: {0}")]
    Venue(#[from] VenueError),
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub breakeven_enabled: bool,
    pub offset_pips: f64,
    pub deal_history_days: u32,
    /// Only deals carrying this magic count towards risk P&L
    pub magic: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorReport {
    pub managed: usize,
    pub breakeven_set: Vec<i64>,
    pub stops_moved: usize,
    pub stop_failures: usize,
    pub quarantined: usize,
    pub pnl_recorded: f64,
}

struct RiskFeed {
    guard: Arc<Mutex<RiskGuard>>,
    day: NaiveDate,
    seen: HashMap<u64, DateTime<Utc>>,
}

pub struct PositionMonitor {
    venue: Arc<dyn VenueClient>,
    repo: SignalRepository,
    settings: MonitorSettings,
    risk: Option<Mutex<RiskFeed>>,
}

impl PositionMonitor {
    pub fn new(venue: Arc<dyn VenueClient>, repo: SignalRepository, settings: MonitorSettings) -> Self {
        Self {
            venue,
            repo,
            settings,
            risk: None,
        }
    }

    /// Feed realized P&L of our closed deals to `guard`, resetting it on day rollover
    pub fn with_risk_guard(mut self, guard: Arc<Mutex<RiskGuard>>) -> Self {
        self.risk = Some(Mutex::new(RiskFeed {
            guard,
            day: Utc::now().date_naive(),
            seen: HashMap::new(),
        }));
        self
    }

    pub async fn run_once(&self) -> Result<MonitorReport, MonitorError> {
        let mut report = MonitorReport::default();

        if !self.settings.breakeven_enabled && self.risk.is_none() {
            debug!("Breakeven disabled, nothing to monitor");
            return Ok(report);
        }

        let deals = self.venue.get_deals_history(self.settings.deal_history_days).await?;
        report.pnl_recorded = self.feed_risk(&deals).await;

        if !self.settings.breakeven_enabled {
            return Ok(report);
        }

        let managed = self.repo.get_actively_managed().await?;
        report.managed = managed.len();
        if managed.is_empty() {
            return Ok(report);
        }

        // Realized profit per position, summed over partial closes
        let mut closed_profit: HashMap<Ticket, f64> = HashMap::new();
        for deal in deals.iter().filter(|d| d.is_close()) {
            *closed_profit.entry(deal.position_id).or_insert(0.0) += deal.profit;
        }

        for signal in managed {
            let tickets = match signal.tickets() {
                Ok(tickets) => tickets,
                Err(e) => {
                    error!("Signal {}: {}, removing from management", signal.id, e);
                    self.repo.mark_ticket_parse_error(signal.id, &e.raw).await?;
                    report.quarantined += 1;
                    continue;
                }
            };

            let winner = tickets
                .iter()
                .find(|t| closed_profit.get(t).is_some_and(|p| *p > 0.0));
            let Some(winner) = winner else {
                continue;
            };
            info!(
                "Signal {}: ticket {} closed in profit, moving remaining stops to breakeven",
                signal.id, winner
            );

            // A venue failure here skips the signal; it is retried next tick
            match self.move_to_breakeven(&signal, &tickets, &closed_profit).await {
                Ok((moved, failed)) => {
                    report.stops_moved += moved;
                    report.stop_failures += failed;
                    if self.repo.mark_breakeven(signal.id).await? {
                        report.breakeven_set.push(signal.id);
                        info!(
                            "Signal {} -> {} ({} stops moved, {} failed)",
                            signal.id,
                            SignalStatus::BreakevenSet,
                            moved,
                            failed
                        );
                    }
                }
                Err(e) => warn!("Signal {}: breakeven deferred: {}", signal.id, e),
            }
        }

        Ok(report)
    }

    async fn move_to_breakeven(
        &self,
        signal: &SignalRecord,
        tickets: &[Ticket],
        closed_profit: &HashMap<Ticket, f64>,
    ) -> Result<(usize, usize), VenueError> {
        let remaining: Vec<Ticket> = tickets
            .iter()
            .copied()
            .filter(|t| !closed_profit.contains_key(t))
            .collect();
        if remaining.is_empty() {
            return Ok((0, 0));
        }

        let open = self.venue.get_open_positions(&remaining).await?;
        if open.is_empty() {
            return Ok((0, 0));
        }
        let info = self.venue.symbol_info(&signal.symbol).await?;
        let offset = self.settings.offset_pips * info.pip_size();

        let (mut moved, mut failed) = (0, 0);
        for position in open {
            let entry = position.price_open;
            let stop = normalize_price(entry + position.side.sign() * offset, &info);
            match self.venue.modify_stop_take(position.ticket, Some(stop), None).await {
                Ok(()) => {
                    info!(
                        "Signal {}: ticket {} stop moved to {} (entry {})",
                        signal.id, position.ticket, stop, entry
                    );
                    moved += 1;
                }
                Err(e) => {
                    error!(
                        "Signal {}: failed to move stop of ticket {}: {}",
                        signal.id, position.ticket, e
                    );
                    failed += 1;
                }
            }
        }
        Ok((moved, failed))
    }

    /// Add today's not-yet-seen closing deals to the risk guard. Returns the P&L added.
    async fn feed_risk(&self, deals: &[Deal]) -> f64 {
        let Some(feed) = &self.risk else {
            return 0.0;
        };
        let mut feed = feed.lock().await;
        let now = Utc::now();
        let today = now.date_naive();

        if today != feed.day {
            feed.guard.lock().await.reset_day();
            info!("Risk guard: new trading day {}, daily P&L reset", today);
            feed.day = today;
        }

        let retention = ChronoDuration::days(self.settings.deal_history_days as i64 + 1);
        feed.seen.retain(|_, time| now - *time < retention);

        let mut added = 0.0;
        for deal in deals.iter().filter(|d| d.is_close() && d.magic == self.settings.magic) {
            if deal.time.date_naive() != today || feed.seen.contains_key(&deal.ticket) {
                continue;
            }
            feed.seen.insert(deal.ticket, deal.time);
            added += deal.profit;
        }

        if added != 0.0 {
            let mut guard = feed.guard.lock().await;
            guard.update(added);
            info!("Risk guard: realized {:.2}, daily P&L {:.2}", added, guard.daily_pnl());
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::order::{OrderTag, OrderType, TradeRequest};
    use crate::infrastructure::paper_venue::PaperVenue;
    use crate::persistence::init_database;
    use crate::persistence::models::CreateSignal;

    const MAGIC: u64 = 770_001;

    async fn setup(enabled: bool) -> (Arc<PaperVenue>, SignalRepository, PositionMonitor) {
        let venue = Arc::new(PaperVenue::new(10_000.0));
        let repo = SignalRepository::new(init_database("sqlite::memory:").await.unwrap());
        let monitor = PositionMonitor::new(
            venue.clone(),
            repo.clone(),
            MonitorSettings {
                breakeven_enabled: enabled,
                offset_pips: 10.0,
                deal_history_days: 1,
                magic: MAGIC,
            },
        );
        (venue, repo, monitor)
    }

    /// Two-leg gold buy placed at the paper venue and stored as PROCESSED_ACTIVE
    async fn two_leg_buy(venue: &PaperVenue, repo: &SignalRepository) -> (i64, Vec<Ticket>) {
        let record = repo
            .create(CreateSignal {
                timestamp: Utc::now(),
                channel_id: "-1001".to_string(),
                channel_name: None,
                message_id: 1,
                original_message: "Buy gold".to_string(),
                symbol: "XAUUSD".to_string(),
                order_type: Some(OrderType::Buy),
                entry_price: None,
                stop_loss: Some(3370.0),
                take_profits: vec![3380.0, 3390.0],
                comment: None,
                status: SignalStatus::New,
            })
            .await
            .unwrap()
            .unwrap();
        let trade = TradeRequest {
            signal_id: record.id,
            symbol: "XAUUSD".to_string(),
            order_type: OrderType::Buy,
            entry_price: None,
            stop_loss: Some(3370.0),
            take_profits: vec![3380.0, 3390.0],
        };
        let tickets: Vec<Ticket> = venue
            .place_order(&trade, 0.01, &OrderTag::new(MAGIC, "sb"))
            .await
            .unwrap()
            .iter()
            .map(|t| t.parse().unwrap())
            .collect();
        repo.set_executed(record.id, &tickets, SignalStatus::ProcessedActive, None)
            .await
            .unwrap();
        (record.id, tickets)
    }

    #[tokio::test]
    async fn test_breakeven_after_first_target() {
        let (venue, repo, monitor) = setup(true).await;
        let (signal_id, tickets) = two_leg_buy(&venue, &repo).await;

        // Nothing closed yet
        let report = monitor.run_once().await.unwrap();
        assert_eq!(report.managed, 1);
        assert!(report.breakeven_set.is_empty());

        // First target hit
        venue.set_quote("XAUUSD", 3381.00, 3381.30).unwrap();
        let report = monitor.run_once().await.unwrap();
        assert_eq!(report.breakeven_set, vec![signal_id]);
        assert_eq!(report.stops_moved, 1);

        // Filled at ask 3375.30, plus 10 pips of 0.01
        assert_eq!(venue.position_stop_loss(tickets[1]), Some(3375.40));
        assert_eq!(venue.modifications().len(), 1);

        // Idempotent across iterations
        let report = monitor.run_once().await.unwrap();
        assert_eq!(report.managed, 0);
        assert_eq!(venue.modifications().len(), 1);
        let stored = repo.get(signal_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SignalStatus::BreakevenSet);
        assert_eq!(stored.tickets().unwrap(), tickets);
    }

    #[tokio::test]
    async fn test_losing_close_does_not_trigger() {
        let (venue, repo, monitor) = setup(true).await;
        let (signal_id, _) = two_leg_buy(&venue, &repo).await;

        // Stop hit on both legs
        venue.set_quote("XAUUSD", 3369.00, 3369.30).unwrap();
        let report = monitor.run_once().await.unwrap();
        assert!(report.breakeven_set.is_empty());
        assert_eq!(
            repo.get(signal_id).await.unwrap().unwrap().status,
            SignalStatus::ProcessedActive
        );
    }

    #[tokio::test]
    async fn test_disabled_monitor_does_nothing() {
        let (venue, repo, monitor) = setup(false).await;
        two_leg_buy(&venue, &repo).await;
        venue.set_quote("XAUUSD", 3381.00, 3381.30).unwrap();

        let report = monitor.run_once().await.unwrap();
        assert_eq!(report, MonitorReport::default());
        assert!(venue.modifications().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_tickets_are_quarantined() {
        let (venue, repo, monitor) = setup(true).await;
        let (signal_id, _) = two_leg_buy(&venue, &repo).await;
        repo.set_raw_tickets(signal_id, Some("[1, two]")).await.unwrap();

        let report = monitor.run_once().await.unwrap();
        assert_eq!(report.quarantined, 1);
        let stored = repo.get(signal_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SignalStatus::ErrorTicketParse);
    }

    #[tokio::test]
    async fn test_closed_deals_feed_risk_guard_once() {
        let (venue, repo, monitor) = setup(true).await;
        let guard = Arc::new(Mutex::new(RiskGuard::new(10_000.0, 0.05, 0.1)));
        let monitor = monitor.with_risk_guard(guard.clone());
        two_leg_buy(&venue, &repo).await;

        venue.set_quote("XAUUSD", 3369.00, 3369.30).unwrap();
        let first = monitor.run_once().await.unwrap();
        assert!(first.pnl_recorded < 0.0);
        let second = monitor.run_once().await.unwrap();
        assert_eq!(second.pnl_recorded, 0.0);

        let daily = guard.lock().await.daily_pnl();
        assert!((daily - first.pnl_recorded).abs() < 1e-9);
    }
}
