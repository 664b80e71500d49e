//! Startup reconciliation
//!
//! Order placement and ticket persistence are not atomic. After a restart the
//! venue, not the store, tells us which of our orders are live: every leg we
//! place carries the magic number and a `prefix:signal_id:leg` comment, so
//! live orders can be matched back to their rows. Nothing is placed or
//! cancelled here.

use crate::domain::entities::order::OrderTag;
use crate::domain::entities::signal::{SignalStatus, Ticket};
use crate::domain::repositories::venue_client::{TaggedOrder, VenueClient, VenueError};
use crate::persistence::repository::SignalRepository;
use crate::persistence::DatabaseError;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error("Failed to list tagged orders: {0}")]
    Venue(#[from] VenueError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Why a live order could not be matched to a managed signal
#[derive(Debug, Clone, PartialEq)]
pub enum Discrepancy {
    /// Comment does not carry our tag
    Untagged { ticket: Ticket, comment: String },
    /// Tag points at a signal id the store does not know
    UnknownSignal { ticket: Ticket, signal_id: i64 },
    /// Signal exists but is in a state that should hold no live orders
    TerminalSignal {
        ticket: Ticket,
        signal_id: i64,
        status: SignalStatus,
    },
    /// Signal is managed but this ticket is not in its list
    UntrackedTicket { ticket: Ticket, signal_id: i64 },
}

impl Discrepancy {
    pub fn ticket(&self) -> Ticket {
        match self {
            Discrepancy::Untagged { ticket, .. }
            | Discrepancy::UnknownSignal { ticket, .. }
            | Discrepancy::TerminalSignal { ticket, .. }
            | Discrepancy::UntrackedTicket { ticket, .. } => *ticket,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationReport {
    /// Signals moved from NEW to PROCESSED_ACTIVE with the tickets found live
    pub adopted: Vec<(i64, Vec<Ticket>)>,
    /// Live tickets already recorded on their signal
    pub matched: usize,
    pub orphans: Vec<Discrepancy>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.orphans.is_empty()
    }
}

pub struct Reconciler {
    venue: Arc<dyn VenueClient>,
    repo: SignalRepository,
    tag: OrderTag,
}

impl Reconciler {
    pub fn new(venue: Arc<dyn VenueClient>, repo: SignalRepository, tag: OrderTag) -> Self {
        Self { venue, repo, tag }
    }

    pub async fn reconcile_on_startup(&self) -> Result<ReconciliationReport, ReconciliationError> {
        let orders = self.venue.get_tagged_orders(self.tag.magic).await?;
        info!(
            "Reconciling {} live order(s) with magic {} on {}",
            orders.len(),
            self.tag.magic,
            self.venue.name()
        );

        let mut report = ReconciliationReport::default();
        let mut by_signal: BTreeMap<i64, Vec<TaggedOrder>> = BTreeMap::new();
        for order in orders {
            match self.tag.signal_id_from(&order.comment) {
                Some(signal_id) => by_signal.entry(signal_id).or_default().push(order),
                None => report.orphans.push(Discrepancy::Untagged {
                    ticket: order.ticket,
                    comment: order.comment,
                }),
            }
        }

        for (signal_id, orders) in by_signal {
            let mut tickets: Vec<Ticket> = orders.iter().map(|o| o.ticket).collect();
            tickets.sort_unstable();

            let Some(signal) = self.repo.get(signal_id).await? else {
                report.orphans.extend(
                    tickets
                        .iter()
                        .map(|&ticket| Discrepancy::UnknownSignal { ticket, signal_id }),
                );
                continue;
            };

            match signal.status {
                SignalStatus::New => {
                    self.repo
                        .set_executed(
                            signal_id,
                            &tickets,
                            SignalStatus::ProcessedActive,
                            Some("adopted from venue on startup"),
                        )
                        .await?;
                    info!("Signal {}: adopted live tickets {:?}", signal_id, tickets);
                    report.adopted.push((signal_id, tickets));
                }
                status if status.holds_tickets() => {
                    // Unparseable stored tickets count as untracked
                    let known = signal.tickets().unwrap_or_default();
                    for ticket in tickets {
                        if known.contains(&ticket) {
                            report.matched += 1;
                        } else {
                            report
                                .orphans
                                .push(Discrepancy::UntrackedTicket { ticket, signal_id });
                        }
                    }
                }
                status => report.orphans.extend(tickets.iter().map(|&ticket| {
                    Discrepancy::TerminalSignal {
                        ticket,
                        signal_id,
                        status,
                    }
                })),
            }
        }

        for orphan in &report.orphans {
            warn!("Orphaned venue order {}: {:?}, needs manual action", orphan.ticket(), orphan);
        }
        info!(
            "Reconciliation done: {} adopted, {} matched, {} orphaned",
            report.adopted.len(),
            report.matched,
            report.orphans.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::order::{LegOrder, OrderType, TradeRequest};
    use crate::infrastructure::paper_venue::PaperVenue;
    use crate::persistence::init_database;
    use crate::persistence::models::{CreateSignal, UpdateLevels};
    use chrono::Utc;

    const MAGIC: u64 = 770_001;

    fn tag() -> OrderTag {
        OrderTag::new(MAGIC, "sb")
    }

    async fn setup() -> (Arc<PaperVenue>, SignalRepository, Reconciler) {
        let venue = Arc::new(PaperVenue::new(10_000.0));
        let repo = SignalRepository::new(init_database("sqlite::memory:").await.unwrap());
        let reconciler = Reconciler::new(venue.clone(), repo.clone(), tag());
        (venue, repo, reconciler)
    }

    async fn new_signal(repo: &SignalRepository, message_id: i64) -> i64 {
        repo.create(CreateSignal {
            timestamp: Utc::now(),
            channel_id: "-1001".to_string(),
            channel_name: None,
            message_id,
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
        .unwrap()
        .id
    }

    async fn place(venue: &PaperVenue, signal_id: i64) -> Vec<Ticket> {
        let trade = TradeRequest {
            signal_id,
            symbol: "XAUUSD".to_string(),
            order_type: OrderType::Buy,
            entry_price: None,
            stop_loss: Some(3370.0),
            take_profits: vec![3380.0, 3390.0],
        };
        venue
            .place_order(&trade, 0.01, &tag())
            .await
            .unwrap()
            .iter()
            .map(|t| t.parse().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_adopts_orders_placed_before_crash() {
        let (venue, repo, reconciler) = setup().await;
        let signal_id = new_signal(&repo, 1).await;
        let tickets = place(&venue, signal_id).await;

        let report = reconciler.reconcile_on_startup().await.unwrap();
        assert_eq!(report.adopted, vec![(signal_id, tickets.clone())]);
        assert!(report.is_clean());

        let stored = repo.get(signal_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SignalStatus::ProcessedActive);
        assert_eq!(stored.tickets().unwrap(), tickets);

        // Second pass sees them as tracked
        let report = reconciler.reconcile_on_startup().await.unwrap();
        assert!(report.adopted.is_empty());
        assert_eq!(report.matched, 2);
    }

    #[tokio::test]
    async fn test_adopts_completed_partial_entry() {
        let (venue, repo, reconciler) = setup().await;
        let partial = repo
            .create(CreateSignal {
                timestamp: Utc::now(),
                channel_id: "-1001".to_string(),
                channel_name: None,
                message_id: 4,
                original_message: "Buy zone gold 3373".to_string(),
                symbol: "XAUUSD".to_string(),
                order_type: Some(OrderType::Buy),
                entry_price: Some(3373.0),
                stop_loss: None,
                take_profits: vec![],
                comment: None,
                status: SignalStatus::PartialEntry,
            })
            .await
            .unwrap()
            .unwrap();

        // SL/TP merged, legs sent, then the process died before storing tickets
        repo.promote_partial_entry(
            partial.id,
            UpdateLevels {
                stop_loss: Some(3370.0),
                take_profits: Some(vec![3380.0, 3390.0]),
                ..UpdateLevels::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
        let tickets = place(&venue, partial.id).await;

        let report = reconciler.reconcile_on_startup().await.unwrap();
        assert_eq!(report.adopted, vec![(partial.id, tickets)]);
        assert!(report.is_clean());
        let stored = repo.get(partial.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SignalStatus::ProcessedActive);
    }

    #[tokio::test]
    async fn test_reports_orphans_without_touching_venue() {
        let (venue, repo, reconciler) = setup().await;

        // Tag for a signal that was never stored
        place(&venue, 999).await;

        // Signal cancelled in the store while its legs stayed live
        let cancelled = new_signal(&repo, 2).await;
        place(&venue, cancelled).await;
        repo.set_status(cancelled, SignalStatus::Cancelled, None).await.unwrap();

        // Our magic, foreign comment
        venue
            .submit_leg(&LegOrder {
                symbol: "XAUUSD".to_string(),
                order_type: OrderType::Buy,
                volume: 0.01,
                price: None,
                stop_loss: None,
                take_profit: None,
                magic: MAGIC,
                comment: "manual".to_string(),
            })
            .await
            .unwrap();

        let before = venue.open_tickets();
        let report = reconciler.reconcile_on_startup().await.unwrap();
        assert!(report.adopted.is_empty());
        assert_eq!(report.orphans.len(), 5);
        assert!(report
            .orphans
            .iter()
            .any(|o| matches!(o, Discrepancy::UnknownSignal { signal_id: 999, .. })));
        assert!(report.orphans.iter().any(|o| matches!(
            o,
            Discrepancy::TerminalSignal { status: SignalStatus::Cancelled, .. }
        )));
        assert!(report
            .orphans
            .iter()
            .any(|o| matches!(o, Discrepancy::Untagged { .. })));
        assert_eq!(venue.open_tickets(), before);
    }

    #[tokio::test]
    async fn test_untracked_ticket_on_managed_signal() {
        let (venue, repo, reconciler) = setup().await;
        let signal_id = new_signal(&repo, 3).await;
        let tickets = place(&venue, signal_id).await;
        repo.set_executed(signal_id, &tickets[..1], SignalStatus::ProcessedActive, None)
            .await
            .unwrap();

        let report = reconciler.reconcile_on_startup().await.unwrap();
        assert_eq!(report.matched, 1);
        assert_eq!(
            report.orphans,
            vec![Discrepancy::UntrackedTicket {
                ticket: tickets[1],
                signal_id
            }]
        );
    }
}
