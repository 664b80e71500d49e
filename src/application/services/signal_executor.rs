//! Signal Executor
//!
//! Sends a stored signal to the venue and records the outcome on its row.
//! Shared by the message correlator and the autotrader so both paths apply
//! the same pre-checks and status rules.

use crate::domain::entities::order::OrderTag;
use crate::domain::entities::signal::{parse_venue_tickets, SignalStatus, Ticket};
use crate::domain::repositories::venue_client::{VenueClient, VenueError};
use crate::persistence::models::SignalRecord;
use crate::persistence::repository::SignalRepository;
use crate::persistence::DatabaseError;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    pub lot_per_leg: f64,
    pub min_lot: f64,
    pub tag: OrderTag,
}

/// Result of one execution attempt, as recorded on the signal row
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Every leg placed
    Executed { tickets: Vec<Ticket> },
    /// Some legs placed before the venue failed; the opened tickets are managed
    PartiallyExecuted { tickets: Vec<Ticket>, reason: String },
    /// Nothing recorded as live; the row carries the error status
    Failed { status: SignalStatus, reason: String },
}

impl ExecutionOutcome {
    pub fn status(&self) -> SignalStatus {
        match self {
            ExecutionOutcome::Executed { .. } | ExecutionOutcome::PartiallyExecuted { .. } => {
                SignalStatus::ProcessedActive
            }
            ExecutionOutcome::Failed { status, .. } => *status,
        }
    }
}

pub struct SignalExecutor {
    venue: Arc<dyn VenueClient>,
    repo: SignalRepository,
    settings: ExecutionSettings,
}

impl SignalExecutor {
    pub fn new(venue: Arc<dyn VenueClient>, repo: SignalRepository, settings: ExecutionSettings) -> Self {
        Self { venue, repo, settings }
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    /// Execute `signal` and persist the resulting status.
    ///
    /// Only store failures are returned as errors; venue and validation
    /// failures end up on the row.
    pub async fn execute(&self, signal: &SignalRecord) -> Result<ExecutionOutcome, DatabaseError> {
        if !signal.has_trade_levels() {
            return self
                .fail(signal, SignalStatus::ErrorNoTpSl, "signal has neither stop loss nor take profit".to_string())
                .await;
        }

        let volume = self.settings.lot_per_leg;
        if !volume.is_finite() || volume < self.settings.min_lot {
            return self
                .fail(
                    signal,
                    SignalStatus::ErrorInvalidVolume,
                    format!("volume {} below minimum lot {}", volume, self.settings.min_lot),
                )
                .await;
        }

        let trade = match signal.trade_request() {
            Some(trade) => trade,
            None => {
                return self
                    .fail(
                        signal,
                        SignalStatus::ErrorNoTpSl,
                        "order side cannot be determined from the signal".to_string(),
                    )
                    .await;
            }
        };

        info!(
            "Executing signal {} ({} {} entry {:?} SL {:?} TP {:?}) on {}",
            signal.id,
            trade.order_type,
            trade.symbol,
            trade.entry_price,
            trade.stop_loss,
            trade.take_profits,
            self.venue.name()
        );

        match self.venue.place_order(&trade, volume, &self.settings.tag).await {
            Ok(raw) => match parse_venue_tickets(&raw) {
                Ok(tickets) => {
                    self.repo
                        .set_executed(signal.id, &tickets, SignalStatus::ProcessedActive, None)
                        .await?;
                    info!("Signal {} active with tickets {:?}", signal.id, tickets);
                    Ok(ExecutionOutcome::Executed { tickets })
                }
                Err(e) => self.ticket_parse_failure(signal, e.raw).await,
            },
            Err(VenueError::PartialFill {
                opened,
                failed_leg,
                total_legs,
                reason,
            }) => {
                let reason = format!("leg {}/{} failed: {}", failed_leg, total_legs, reason);
                match parse_venue_tickets(&opened) {
                    Ok(tickets) => {
                        error!(
                            "Signal {} partially executed, managing opened tickets {:?}: {}",
                            signal.id, tickets, reason
                        );
                        self.repo
                            .set_executed(
                                signal.id,
                                &tickets,
                                SignalStatus::ProcessedActive,
                                Some(&format!("partial fill: {}", reason)),
                            )
                            .await?;
                        Ok(ExecutionOutcome::PartiallyExecuted { tickets, reason })
                    }
                    Err(e) => self.ticket_parse_failure(signal, e.raw).await,
                }
            }
            Err(e) => {
                let reason = match &e {
                    VenueError::Timeout(_) => format!("{} (order state unknown, reconcile by tag)", e),
                    _ => e.to_string(),
                };
                error!("Venue rejected signal {}: {}", signal.id, reason);
                self.fail(signal, SignalStatus::ErrorMt5, reason).await
            }
        }
    }

    async fn ticket_parse_failure(
        &self,
        signal: &SignalRecord,
        raw: String,
    ) -> Result<ExecutionOutcome, DatabaseError> {
        // Orders may be live at the venue; only manual reconciliation can tell
        error!(
            "Signal {} placed but venue tickets '{}' are unparseable, flagging for reconciliation",
            signal.id, raw
        );
        self.fail(signal, SignalStatus::ErrorTicketParse, format!("unparseable tickets: {}", raw))
            .await
    }

    async fn fail(
        &self,
        signal: &SignalRecord,
        status: SignalStatus,
        reason: String,
    ) -> Result<ExecutionOutcome, DatabaseError> {
        if status != SignalStatus::ErrorTicketParse && status != SignalStatus::ErrorMt5 {
            warn!(
                "Signal {} from {}/{} not executed: {}",
                signal.id, signal.channel_id, signal.message_id, reason
            );
        }
        self.repo.set_status(signal.id, status, Some(&reason)).await?;
        Ok(ExecutionOutcome::Failed { status, reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::order::OrderType;
    use crate::infrastructure::paper_venue::PaperVenue;
    use crate::persistence::init_database;
    use crate::persistence::models::CreateSignal;
    use chrono::Utc;

    async fn setup(venue: Arc<PaperVenue>, lot: f64) -> (SignalExecutor, SignalRepository) {
        let repo = SignalRepository::new(init_database("sqlite::memory:").await.unwrap());
        let executor = SignalExecutor::new(
            venue,
            repo.clone(),
            ExecutionSettings {
                lot_per_leg: lot,
                min_lot: 0.01,
                tag: OrderTag::new(770_001, "sb"),
            },
        );
        (executor, repo)
    }

    async fn store(repo: &SignalRepository, stop_loss: Option<f64>, take_profits: Vec<f64>) -> SignalRecord {
        repo.create(CreateSignal {
            timestamp: Utc::now(),
            channel_id: "-1001".to_string(),
            channel_name: None,
            message_id: 1,
            original_message: "Sell XAUUSD".to_string(),
            symbol: "XAUUSD".to_string(),
            order_type: Some(OrderType::Sell),
            entry_price: None,
            stop_loss,
            take_profits,
            comment: None,
            status: SignalStatus::New,
        })
        .await
        .unwrap()
        .unwrap()
    }

    #[tokio::test]
    async fn test_executes_one_leg_per_take_profit() {
        let venue = Arc::new(PaperVenue::new(10_000.0));
        let (executor, repo) = setup(venue.clone(), 0.01).await;
        let signal = store(&repo, Some(3390.0), vec![3360.0, 3350.0]).await;

        let outcome = executor.execute(&signal).await.unwrap();
        let tickets = match outcome {
            ExecutionOutcome::Executed { tickets } => tickets,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(tickets.len(), 2);

        let stored = repo.get(signal.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SignalStatus::ProcessedActive);
        assert_eq!(stored.tickets().unwrap(), tickets);
    }

    #[tokio::test]
    async fn test_missing_levels_marks_no_tp_sl() {
        let venue = Arc::new(PaperVenue::new(10_000.0));
        let (executor, repo) = setup(venue.clone(), 0.01).await;
        let signal = store(&repo, None, vec![]).await;

        let outcome = executor.execute(&signal).await.unwrap();
        assert_eq!(outcome.status(), SignalStatus::ErrorNoTpSl);
        assert!(venue.open_tickets().is_empty());
    }

    #[tokio::test]
    async fn test_volume_below_min_lot() {
        let venue = Arc::new(PaperVenue::new(10_000.0));
        let (executor, repo) = setup(venue.clone(), 0.001).await;
        let signal = store(&repo, Some(3390.0), vec![]).await;

        let outcome = executor.execute(&signal).await.unwrap();
        assert_eq!(outcome.status(), SignalStatus::ErrorInvalidVolume);
        let stored = repo.get(signal.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SignalStatus::ErrorInvalidVolume);
        assert_eq!(stored.broker_tickets, None);
    }

    #[tokio::test]
    async fn test_validation_failure_marks_mt5_error() {
        let venue = Arc::new(PaperVenue::new(10_000.0));
        let (executor, repo) = setup(venue.clone(), 0.01).await;
        // Stop below market on a sell
        let signal = store(&repo, Some(3300.0), vec![3350.0]).await;

        let outcome = executor.execute(&signal).await.unwrap();
        assert_eq!(outcome.status(), SignalStatus::ErrorMt5);
        assert!(venue.open_tickets().is_empty());
    }

    #[tokio::test]
    async fn test_partial_fill_keeps_opened_tickets() {
        let venue = Arc::new(PaperVenue::new(10_000.0));
        venue.reject_submits_after(1);
        let (executor, repo) = setup(venue.clone(), 0.01).await;
        let signal = store(&repo, Some(3390.0), vec![3360.0, 3350.0]).await;

        let outcome = executor.execute(&signal).await.unwrap();
        match outcome {
            ExecutionOutcome::PartiallyExecuted { tickets, .. } => assert_eq!(tickets.len(), 1),
            other => panic!("unexpected outcome {:?}", other),
        }
        let stored = repo.get(signal.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SignalStatus::ProcessedActive);
        assert!(stored.comment.unwrap().starts_with("partial fill"));
    }
}
