//! Signal Processor
//!
//! Turns inbound chat messages into signal row transitions. One message is
//! handled in one pass:
//!
//! 1. drop unknown/inactive channels, empty text and redelivered messages
//!    (both signal-creating messages and recorded follow-ups)
//! 2. reply cancel commands skip the parser entirely
//! 3. parse, resolve the symbol, then take the (channel, symbol) lock
//! 4. classify: cancellation, modification, partial entry, SL/TP update
//!    for a partial entry, full signal, or nothing
//!
//! Every drop is logged with channel and message id; nothing is retried.

use crate::application::services::keyed_lock::KeyedLock;
use crate::application::services::signal_executor::{ExecutionOutcome, SignalExecutor};
use crate::config::{ChannelConfig, Settings, SettingsHandle};
use crate::domain::entities::message::{InboundMessage, ParsedSignal};
use crate::domain::entities::signal::{SignalStatus, Ticket};
use crate::domain::errors::ParseError;
use crate::domain::repositories::signal_parser::SignalParser;
use crate::domain::repositories::venue_client::{CloseOutcome, VenueClient};
use crate::persistence::models::{CreateSignal, SignalRecord, UpdateLevels};
use crate::persistence::repository::SignalRepository;
use crate::persistence::DatabaseError;
use chrono::{Datelike, Weekday};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Reply texts treated as "cancel the signal I'm replying to" without parsing
const CANCEL_KEYWORDS: &[&str] = &[
    "cancel",
    "cancelled",
    "canceled",
    "cancel it",
    "cancel order",
    "cancel trade",
    "close",
    "close all",
    "close now",
    "close it",
    "exit",
    "exit now",
];

pub fn is_cancel_command(text: &str) -> bool {
    let normalized = text
        .trim()
        .trim_end_matches(|c: char| c == '!' || c == '.')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    CANCEL_KEYWORDS.contains(&normalized.as_str())
}

/// Pick the trading symbol for a message.
///
/// Order: alias of the parsed symbol, the parsed symbol, the symbol of the
/// replied-to signal, then the channel default (weekend variant on Saturday
/// and Sunday when configured).
pub fn resolve_symbol(
    parsed: Option<&str>,
    reply_context: Option<&str>,
    channel: &ChannelConfig,
    settings: &Settings,
    weekday: Weekday,
) -> Option<String> {
    if let Some(symbol) = parsed.map(str::trim).filter(|s| !s.is_empty()) {
        if let Some(alias) = settings.alias_for(symbol) {
            return Some(alias.to_string());
        }
        return Some(symbol.to_string());
    }

    if let Some(symbol) = reply_context.filter(|s| !s.is_empty()) {
        return Some(symbol.to_string());
    }

    let weekend = matches!(weekday, Weekday::Sat | Weekday::Sun);
    let weekend_symbol = channel.weekend_symbol.as_deref().filter(|_| weekend);
    weekend_symbol
        .or(channel.default_symbol.as_deref())
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Why a message produced no state change
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    UnknownChannel,
    InactiveChannel,
    EmptyText,
    Duplicate,
    ParseFailed(String),
    NoSymbol,
    NoAction,
    NotAReply,
    ReplyTargetMissing,
    NoTickets,
    CorruptTickets,
    NoPartialEntry,
    NothingToModify,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Dropped(DropReason),
    PartialEntry { signal_id: i64 },
    Executed { signal_id: i64, outcome: ExecutionOutcome },
    Cancelled { signal_id: i64, failed_tickets: Vec<Ticket> },
    Modified { signal_id: i64, failed_tickets: Vec<Ticket> },
}

enum PartialLookup {
    Found(SignalRecord),
    /// The replied-to signal exists but has moved past PARTIAL_ENTRY
    NotPartial(SignalRecord),
    Missing,
}

pub struct SignalProcessor {
    settings: SettingsHandle,
    parser: Arc<dyn SignalParser>,
    venue: Arc<dyn VenueClient>,
    repo: SignalRepository,
    executor: Arc<SignalExecutor>,
    locks: KeyedLock,
    parser_timeout: Duration,
}

impl SignalProcessor {
    pub fn new(
        settings: SettingsHandle,
        parser: Arc<dyn SignalParser>,
        venue: Arc<dyn VenueClient>,
        repo: SignalRepository,
        executor: Arc<SignalExecutor>,
        parser_timeout: Duration,
    ) -> Self {
        Self {
            settings,
            parser,
            venue,
            repo,
            executor,
            locks: KeyedLock::new(),
            parser_timeout,
        }
    }

    pub async fn process(&self, message: &InboundMessage) -> Result<ProcessOutcome, DatabaseError> {
        let settings = self.settings.snapshot().await;
        let (channel_id, message_id) = (message.channel_id.as_str(), message.message_id);

        let channel = match settings.channel(channel_id) {
            Some(channel) if channel.active => channel,
            Some(_) => {
                info!("[{}/{}] channel inactive, ignoring message", channel_id, message_id);
                return Ok(ProcessOutcome::Dropped(DropReason::InactiveChannel));
            }
            None => {
                info!("[{}/{}] unknown channel, ignoring message", channel_id, message_id);
                return Ok(ProcessOutcome::Dropped(DropReason::UnknownChannel));
            }
        };

        let text = message.text.trim();
        if text.is_empty() {
            info!("[{}/{}] empty message, ignoring", channel_id, message_id);
            return Ok(ProcessOutcome::Dropped(DropReason::EmptyText));
        }

        if self.repo.message_seen(channel_id, message_id).await? {
            info!("[{}/{}] already processed, ignoring redelivery", channel_id, message_id);
            return Ok(ProcessOutcome::Dropped(DropReason::Duplicate));
        }

        if message.is_reply && is_cancel_command(text) {
            info!("[{}/{}] cancel command reply", channel_id, message_id);
            let symbol = self
                .reply_target(message)
                .await?
                .map(|target| target.symbol)
                .unwrap_or_default();
            let _guard = self.locks.lock(&KeyedLock::key(channel_id, &symbol)).await;
            return self.cancel(message).await;
        }

        let parsed = match tokio::time::timeout(self.parser_timeout, self.parser.parse(text)).await {
            Ok(Ok(parsed)) => parsed,
            Ok(Err(e)) => return Ok(parse_failed(message, e)),
            Err(_) => {
                return Ok(parse_failed(message, ParseError::Timeout(self.parser_timeout.as_secs())));
            }
        };

        let reply_target = self.reply_target(message).await?;
        let symbol = match resolve_symbol(
            parsed.symbol.as_deref(),
            reply_target.as_ref().map(|s| s.symbol.as_str()),
            channel,
            &settings,
            message.timestamp.weekday(),
        ) {
            Some(symbol) => symbol,
            None => {
                info!("[{}/{}] no symbol could be resolved, ignoring", channel_id, message_id);
                return Ok(ProcessOutcome::Dropped(DropReason::NoSymbol));
            }
        };

        let _guard = self.locks.lock(&KeyedLock::key(channel_id, &symbol)).await;
        self.classify(message, channel, parsed, symbol, reply_target).await
    }

    async fn classify(
        &self,
        message: &InboundMessage,
        channel: &ChannelConfig,
        parsed: ParsedSignal,
        symbol: String,
        reply_target: Option<SignalRecord>,
    ) -> Result<ProcessOutcome, DatabaseError> {
        let (channel_id, message_id) = (message.channel_id.as_str(), message.message_id);

        if parsed.is_cancellation {
            return self.cancel(message).await;
        }

        if parsed.is_modification {
            return self.modify(message, &parsed).await;
        }

        if parsed.entry_price.is_some() && parsed.stop_loss.is_none() {
            let record = self
                .record(message, channel, &parsed, symbol, SignalStatus::PartialEntry)
                .await?;
            return Ok(match record {
                Some(record) => {
                    info!(
                        "[{}/{}] partial entry {} on {} at {:?}, waiting for SL/TP",
                        channel_id, message_id, record.id, record.symbol, record.entry_price
                    );
                    ProcessOutcome::PartialEntry { signal_id: record.id }
                }
                None => ProcessOutcome::Dropped(DropReason::Duplicate),
            });
        }

        if parsed.stop_loss.is_some() && parsed.entry_price.is_none() {
            match self.find_partial_entry(message, reply_target, &parsed, &symbol).await? {
                PartialLookup::Found(partial) => {
                    return self.complete_partial_entry(message, partial, &parsed).await;
                }
                // An order type makes the message a complete signal on its own
                _ if parsed.order_type.is_some() => {}
                PartialLookup::NotPartial(target) => {
                    warn!(
                        "[{}/{}] SL/TP update replies to signal {} which is {}, not a partial entry",
                        channel_id, message_id, target.id, target.status
                    );
                    return Ok(ProcessOutcome::Dropped(DropReason::NoPartialEntry));
                }
                PartialLookup::Missing => {
                    warn!(
                        "[{}/{}] SL/TP update for {} but no pending partial entry found",
                        channel_id, message_id, symbol
                    );
                    return Ok(ProcessOutcome::Dropped(DropReason::NoPartialEntry));
                }
            }
        }

        if parsed.order_type.is_some() && (parsed.stop_loss.is_some() || !parsed.take_profits.is_empty()) {
            let record = match self.record(message, channel, &parsed, symbol, SignalStatus::New).await? {
                Some(record) => record,
                None => return Ok(ProcessOutcome::Dropped(DropReason::Duplicate)),
            };
            info!(
                "[{}/{}] new signal {}: {:?} {} SL {:?} TP {:?}",
                channel_id, message_id, record.id, record.order_type, record.symbol, record.stop_loss, record.take_profits.0
            );
            let outcome = self.executor.execute(&record).await?;
            return Ok(ProcessOutcome::Executed {
                signal_id: record.id,
                outcome,
            });
        }

        info!("[{}/{}] no recognizable trade action", channel_id, message_id);
        Ok(ProcessOutcome::Dropped(DropReason::NoAction))
    }

    async fn record(
        &self,
        message: &InboundMessage,
        channel: &ChannelConfig,
        parsed: &ParsedSignal,
        symbol: String,
        status: SignalStatus,
    ) -> Result<Option<SignalRecord>, DatabaseError> {
        let record = self
            .repo
            .create(CreateSignal {
                timestamp: message.timestamp,
                channel_id: message.channel_id.clone(),
                channel_name: message
                    .channel_display_name
                    .clone()
                    .or_else(|| Some(channel.name.clone())),
                message_id: message.message_id,
                original_message: message.text.clone(),
                symbol,
                order_type: parsed.order_type,
                entry_price: parsed.entry_price,
                stop_loss: parsed.stop_loss,
                take_profits: parsed.take_profits.clone(),
                comment: None,
                status,
            })
            .await?;

        if record.is_none() {
            info!(
                "[{}/{}] signal already stored for this message",
                message.channel_id, message.message_id
            );
        }
        Ok(record)
    }

    async fn reply_target(&self, message: &InboundMessage) -> Result<Option<SignalRecord>, DatabaseError> {
        match (message.is_reply, message.reply_to_message_id) {
            (true, Some(original)) => self.repo.find_by_message(&message.channel_id, original).await,
            _ => Ok(None),
        }
    }

    /// A reply only ever completes the signal it replies to. Messages that
    /// are not replies to a stored signal fall back to the latest partial
    /// entry on the channel and symbol, unless they name an order type.
    async fn find_partial_entry(
        &self,
        message: &InboundMessage,
        reply_target: Option<SignalRecord>,
        parsed: &ParsedSignal,
        symbol: &str,
    ) -> Result<PartialLookup, DatabaseError> {
        if let Some(target) = reply_target {
            return Ok(if target.status == SignalStatus::PartialEntry {
                PartialLookup::Found(target)
            } else {
                PartialLookup::NotPartial(target)
            });
        }
        if parsed.order_type.is_some() {
            return Ok(PartialLookup::Missing);
        }
        Ok(self
            .repo
            .latest_partial_entry(&message.channel_id, symbol)
            .await?
            .map_or(PartialLookup::Missing, PartialLookup::Found))
    }

    /// Record a follow-up message against `signal_id` before acting on it.
    /// False means an earlier delivery already acted.
    async fn claim(&self, message: &InboundMessage, signal_id: i64, action: &str) -> Result<bool, DatabaseError> {
        let claimed = self
            .repo
            .record_follow_up(&message.channel_id, message.message_id, signal_id, action)
            .await?;
        if !claimed {
            info!(
                "[{}/{}] {} already applied to signal {}, ignoring redelivery",
                message.channel_id, message.message_id, action, signal_id
            );
        }
        Ok(claimed)
    }

    async fn complete_partial_entry(
        &self,
        message: &InboundMessage,
        partial: SignalRecord,
        parsed: &ParsedSignal,
    ) -> Result<ProcessOutcome, DatabaseError> {
        if !self.claim(message, partial.id, "complete").await? {
            return Ok(ProcessOutcome::Dropped(DropReason::Duplicate));
        }
        info!(
            "[{}/{}] completing partial entry {} with SL {:?} TP {:?}",
            message.channel_id, message.message_id, partial.id, parsed.stop_loss, parsed.take_profits
        );

        let promoted = self
            .repo
            .promote_partial_entry(
                partial.id,
                UpdateLevels {
                    order_type: parsed.order_type,
                    entry_price: None,
                    stop_loss: parsed.stop_loss,
                    take_profits: non_empty(&parsed.take_profits),
                },
            )
            .await?;
        let Some(merged) = promoted else {
            warn!(
                "[{}/{}] signal {} stopped being a partial entry, not executing",
                message.channel_id, message.message_id, partial.id
            );
            return Ok(ProcessOutcome::Dropped(DropReason::NoPartialEntry));
        };
        let outcome = self.executor.execute(&merged).await?;
        Ok(ProcessOutcome::Executed {
            signal_id: merged.id,
            outcome,
        })
    }

    /// Resolve the replied-to signal and its tickets for cancel/modify.
    async fn managed_target(
        &self,
        message: &InboundMessage,
        action: &str,
    ) -> Result<Result<(SignalRecord, Vec<Ticket>), DropReason>, DatabaseError> {
        let (channel_id, message_id) = (message.channel_id.as_str(), message.message_id);

        if !message.is_reply {
            warn!("[{}/{}] {} ignored: not a reply", channel_id, message_id, action);
            return Ok(Err(DropReason::NotAReply));
        }

        let target = match self.reply_target(message).await? {
            Some(target) => target,
            None => {
                warn!(
                    "[{}/{}] {} ignored: replied-to message {:?} has no signal",
                    channel_id, message_id, action, message.reply_to_message_id
                );
                return Ok(Err(DropReason::ReplyTargetMissing));
            }
        };

        let tickets = match target.tickets() {
            Ok(tickets) => tickets,
            Err(e) => {
                error!("[{}/{}] signal {}: {}", channel_id, message_id, target.id, e);
                self.repo.mark_ticket_parse_error(target.id, &e.raw).await?;
                return Ok(Err(DropReason::CorruptTickets));
            }
        };
        if tickets.is_empty() {
            warn!(
                "[{}/{}] {} ignored: signal {} ({}) has no tickets",
                channel_id, message_id, action, target.id, target.status
            );
            return Ok(Err(DropReason::NoTickets));
        }

        Ok(Ok((target, tickets)))
    }

    async fn cancel(&self, message: &InboundMessage) -> Result<ProcessOutcome, DatabaseError> {
        let (target, tickets) = match self.managed_target(message, "cancellation").await? {
            Ok(found) => found,
            Err(reason) => return Ok(ProcessOutcome::Dropped(reason)),
        };
        if !self.claim(message, target.id, "cancel").await? {
            return Ok(ProcessOutcome::Dropped(DropReason::Duplicate));
        }

        let mut closed = Vec::new();
        let mut failed = Vec::new();
        for ticket in tickets {
            match self.venue.close_or_cancel(ticket).await {
                Ok(CloseOutcome::PositionClosed) => {
                    info!("Signal {}: position {} closed", target.id, ticket);
                    closed.push(ticket);
                }
                Ok(CloseOutcome::OrderCancelled) => {
                    info!("Signal {}: pending order {} cancelled", target.id, ticket);
                    closed.push(ticket);
                }
                Err(e) => {
                    error!("Signal {}: failed to close or cancel {}: {}", target.id, ticket, e);
                    failed.push(ticket);
                }
            }
        }

        let comment = if failed.is_empty() {
            format!("cancelled by message {}", message.message_id)
        } else {
            format!(
                "cancelled by message {}; still open at venue: {:?}",
                message.message_id, failed
            )
        };
        self.repo
            .set_status(target.id, SignalStatus::Cancelled, Some(&comment))
            .await?;
        info!(
            "[{}/{}] signal {} cancelled ({} ok, {} failed)",
            message.channel_id,
            message.message_id,
            target.id,
            closed.len(),
            failed.len()
        );

        Ok(ProcessOutcome::Cancelled {
            signal_id: target.id,
            failed_tickets: failed,
        })
    }

    async fn modify(&self, message: &InboundMessage, parsed: &ParsedSignal) -> Result<ProcessOutcome, DatabaseError> {
        let (target, tickets) = match self.managed_target(message, "modification").await? {
            Ok(found) => found,
            Err(reason) => return Ok(ProcessOutcome::Dropped(reason)),
        };

        let new_sl = parsed.stop_loss;
        let new_tp = parsed.take_profits.first().copied();
        if new_sl.is_none() && new_tp.is_none() {
            warn!(
                "[{}/{}] modification of signal {} carries no new SL or TP",
                message.channel_id, message.message_id, target.id
            );
            return Ok(ProcessOutcome::Dropped(DropReason::NothingToModify));
        }
        if !self.claim(message, target.id, "modify").await? {
            return Ok(ProcessOutcome::Dropped(DropReason::Duplicate));
        }

        let mut failed = Vec::new();
        for ticket in tickets {
            match self.venue.modify_stop_take(ticket, new_sl, new_tp).await {
                Ok(()) => info!(
                    "Signal {}: ticket {} modified (SL {:?}, TP {:?})",
                    target.id, ticket, new_sl, new_tp
                ),
                Err(e) => {
                    error!("Signal {}: failed to modify ticket {}: {}", target.id, ticket, e);
                    failed.push(ticket);
                }
            }
        }

        self.repo
            .update_levels(
                target.id,
                UpdateLevels {
                    stop_loss: new_sl,
                    take_profits: non_empty(&parsed.take_profits),
                    ..UpdateLevels::default()
                },
            )
            .await?;
        let comment = (!failed.is_empty()).then(|| format!("modify failed for tickets {:?}", failed));
        self.repo
            .set_status(target.id, SignalStatus::ModifiedActive, comment.as_deref())
            .await?;

        Ok(ProcessOutcome::Modified {
            signal_id: target.id,
            failed_tickets: failed,
        })
    }
}

fn non_empty(values: &[f64]) -> Option<Vec<f64>> {
    (!values.is_empty()).then(|| values.to_vec())
}

fn parse_failed(message: &InboundMessage, error: ParseError) -> ProcessOutcome {
    warn!(
        "[{}/{}] parser failed, dropping message: {}",
        message.channel_id, message.message_id, error
    );
    ProcessOutcome::Dropped(DropReason::ParseFailed(error.to_string()))
}
