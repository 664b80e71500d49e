//! Autotrader
//!
//! Autonomous entry path. Each pass scans the configured symbols with the
//! structure detector, lets the strategy evaluator veto the intent, records
//! it as a signal on the `autotrader` channel and executes it through the
//! same executor as chat signals. The risk guard gates the whole pass.

use crate::application::services::signal_executor::{ExecutionOutcome, SignalExecutor};
use crate::domain::entities::signal::SignalStatus;
use crate::domain::entities::trade_intent::TradeIntent;
use crate::domain::repositories::venue_client::{VenueClient, VenueError};
use crate::domain::services::indicators::Candle;
use crate::domain::services::pattern_detector::StructureDetector;
use crate::domain::services::risk_guard::RiskGuard;
use crate::domain::services::strategy_evaluator::{StrategyEvaluator, Verdict};
use crate::persistence::models::CreateSignal;
use crate::persistence::repository::SignalRepository;
use crate::persistence::DatabaseError;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const AUTOTRADER_CHANNEL: &str = "autotrader";

#[derive(Debug, Error)]
pub enum AutotraderError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Account info unavailable: {0}")]
    Venue(#[from] VenueError),
}

#[derive(Debug, Clone)]
pub struct AutotraderSettings {
    pub symbols: Vec<String>,
    pub candle_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutotradeReport {
    pub blocked_by_risk: bool,
    pub scanned: usize,
    pub intents: usize,
    pub rejected: usize,
    pub duplicates: usize,
    /// Signal ids sent to the venue, with their outcome
    pub executed: Vec<(i64, SignalStatus)>,
}

pub struct Autotrader {
    venue: Arc<dyn VenueClient>,
    repo: SignalRepository,
    executor: Arc<SignalExecutor>,
    detector: StructureDetector,
    evaluator: Arc<dyn StrategyEvaluator>,
    risk: Arc<Mutex<RiskGuard>>,
    settings: AutotraderSettings,
}

/// One message id per (symbol, bar): bar open time in ms plus a small symbol hash.
fn bar_message_id(symbol: &str, last: &Candle) -> i64 {
    // FNV-1a, stable across runs unlike the std hasher
    let hash = symbol
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ b as u64).wrapping_mul(0x0100_0000_01b3));
    last.time.timestamp_millis() + (hash % 1000) as i64
}

impl Autotrader {
    pub fn new(
        venue: Arc<dyn VenueClient>,
        repo: SignalRepository,
        executor: Arc<SignalExecutor>,
        detector: StructureDetector,
        evaluator: Arc<dyn StrategyEvaluator>,
        risk: Arc<Mutex<RiskGuard>>,
        settings: AutotraderSettings,
    ) -> Self {
        Self {
            venue,
            repo,
            executor,
            detector,
            evaluator,
            risk,
            settings,
        }
    }

    pub async fn run_once(&self) -> Result<AutotradeReport, AutotraderError> {
        let mut report = AutotradeReport::default();

        let account = self.venue.get_account_info().await?;
        {
            let guard = self.risk.lock().await;
            let equity_today = guard.daily_pnl() + (account.equity - account.balance);
            if !guard.can_trade(equity_today, account.equity) {
                warn!(
                    "Risk guard blocks new entries (equity {:.2}, today {:.2}, realized {:.2})",
                    account.equity,
                    equity_today,
                    guard.daily_pnl()
                );
                report.blocked_by_risk = true;
                return Ok(report);
            }
        }

        for symbol in &self.settings.symbols {
            report.scanned += 1;
            let candles = match self.venue.get_candles(symbol, self.settings.candle_count).await {
                Ok(candles) => candles,
                Err(e) => {
                    warn!("[{}] {}: candles unavailable: {}", AUTOTRADER_CHANNEL, symbol, e);
                    continue;
                }
            };
            let Some(last) = candles.last() else {
                continue;
            };

            let Some(intent) = self.detector.detect(&candles) else {
                debug!("[{}] {}: no setup", AUTOTRADER_CHANNEL, symbol);
                continue;
            };
            report.intents += 1;

            if let Verdict::Reject(reason) = self.evaluator.evaluate(symbol, &intent, &candles) {
                info!(
                    "[{}] {}: {} intent rejected by {}: {}",
                    AUTOTRADER_CHANNEL,
                    symbol,
                    intent.side,
                    self.evaluator.name(),
                    reason
                );
                report.rejected += 1;
                continue;
            }

            let message_id = bar_message_id(symbol, last);
            let Some(signal) = self.repo.create(self.signal_for(symbol, message_id, &intent)).await? else {
                debug!("[{}/{}] {}: bar already traded", AUTOTRADER_CHANNEL, message_id, symbol);
                report.duplicates += 1;
                continue;
            };

            info!(
                "[{}/{}] {} {} entry {} SL {} TP {} (signal {})",
                AUTOTRADER_CHANNEL,
                message_id,
                intent.order_type,
                symbol,
                intent.entry,
                intent.stop_loss,
                intent.take_profit,
                signal.id
            );
            let outcome = self.executor.execute(&signal).await?;
            if let ExecutionOutcome::Failed { reason, .. } = &outcome {
                warn!("Autotrader signal {} failed: {}", signal.id, reason);
            }
            report.executed.push((signal.id, outcome.status()));
        }

        Ok(report)
    }

    fn signal_for(&self, symbol: &str, message_id: i64, intent: &TradeIntent) -> CreateSignal {
        let rsi = intent
            .rsi
            .map(|r| format!(" RSI {:.1}", r))
            .unwrap_or_default();
        CreateSignal {
            timestamp: Utc::now(),
            channel_id: AUTOTRADER_CHANNEL.to_string(),
            channel_name: Some("Autotrader".to_string()),
            message_id,
            original_message: format!(
                "{} {} {} SL {} TP {} (break at bar {}{})",
                intent.order_type,
                symbol,
                intent.entry,
                intent.stop_loss,
                intent.take_profit,
                intent.break_index,
                rsi
            ),
            symbol: symbol.to_string(),
            order_type: Some(intent.order_type),
            entry_price: Some(intent.entry),
            stop_loss: Some(intent.stop_loss),
            take_profits: vec![intent.take_profit],
            comment: Some(format!("detector via {}", self.evaluator.name())),
            status: SignalStatus::New,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::signal_executor::ExecutionSettings;
    use crate::domain::entities::order::OrderTag;
    use crate::domain::repositories::venue_client::SymbolInfo;
    use crate::domain::services::strategy_evaluator::PassThrough;
    use crate::infrastructure::paper_venue::PaperVenue;
    use crate::persistence::init_database;
    use chrono::{Duration, TimeZone};

    struct Veto;

    impl StrategyEvaluator for Veto {
        fn name(&self) -> &str {
            "veto"
        }

        fn evaluate(&self, _symbol: &str, _intent: &TradeIntent, _candles: &[Candle]) -> Verdict {
            Verdict::Reject("not today".to_string())
        }
    }

    /// Flat bars with one swing high, a deeper low, a bearish order block and a higher high
    fn bullish_break() -> Vec<Candle> {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap();
        (0..24)
            .map(|i| {
                let [o, h, l, c] = match i {
                    6 => [100.0, 105.0, 99.0, 104.0],
                    10 => [100.0, 101.0, 95.0, 99.0],
                    14 => [100.5, 101.0, 99.0, 99.5],
                    18 => [100.0, 108.0, 99.0, 107.0],
                    _ => [100.0, 101.0, 99.0, 100.0],
                };
                Candle::new(o, h, l, c, 1.0, t0 + Duration::minutes(5 * i)).unwrap()
            })
            .collect()
    }

    async fn setup(evaluator: Arc<dyn StrategyEvaluator>) -> (SignalRepository, Arc<Mutex<RiskGuard>>, Autotrader) {
        let venue = Arc::new(PaperVenue::new(10_000.0));
        venue.add_symbol(
            SymbolInfo {
                symbol: "IDX100".to_string(),
                point: 0.01,
                tick_size: 0.01,
                digits: 2,
                stops_level: 0,
                bid: 100.00,
                ask: 100.02,
            },
            1.0,
        );
        venue.set_candles("IDX100", bullish_break());

        let repo = SignalRepository::new(init_database("sqlite::memory:").await.unwrap());
        let executor = Arc::new(SignalExecutor::new(
            venue.clone(),
            repo.clone(),
            ExecutionSettings {
                lot_per_leg: 0.1,
                min_lot: 0.01,
                tag: OrderTag::new(1, "sb"),
            },
        ));
        let risk = Arc::new(Mutex::new(RiskGuard::new(10_000.0, 0.05, 0.10)));
        let autotrader = Autotrader::new(
            venue,
            repo.clone(),
            executor,
            StructureDetector::default(),
            evaluator,
            risk.clone(),
            AutotraderSettings {
                symbols: vec!["IDX100".to_string(), "NOPE".to_string()],
                candle_count: 50,
            },
        );
        (repo, risk, autotrader)
    }

    #[test]
    fn test_bar_message_id_is_stable_per_symbol() {
        let last = bullish_break().pop().unwrap();
        let a = bar_message_id("XAUUSD", &last);
        assert_eq!(a, bar_message_id("XAUUSD", &last));
        assert_ne!(a, bar_message_id("BTCUSD", &last));
        assert_eq!(a / 1000, last.time.timestamp());
    }

    #[tokio::test]
    async fn test_detected_setup_is_recorded_and_executed_once_per_bar() {
        let (repo, _, autotrader) = setup(Arc::new(PassThrough)).await;

        let report = autotrader.run_once().await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.intents, 1);
        assert_eq!(report.executed.len(), 1);
        let (signal_id, status) = report.executed[0];
        assert_eq!(status, SignalStatus::ProcessedActive);

        let stored = repo.get(signal_id).await.unwrap().unwrap();
        assert_eq!(stored.channel_id, AUTOTRADER_CHANNEL);
        assert_eq!(stored.entry_price, Some(99.0));
        assert_eq!(stored.tickets().unwrap().len(), 1);

        // Same closed bar on the next pass
        let report = autotrader.run_once().await.unwrap();
        assert_eq!(report.duplicates, 1);
        assert!(report.executed.is_empty());
        assert_eq!(repo.count_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_evaluator_veto_records_nothing() {
        let (repo, _, autotrader) = setup(Arc::new(Veto)).await;
        let report = autotrader.run_once().await.unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(repo.count_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_risk_guard_blocks_pass() {
        let (repo, risk, autotrader) = setup(Arc::new(PassThrough)).await;
        risk.lock().await.update(-600.0);

        let report = autotrader.run_once().await.unwrap();
        assert!(report.blocked_by_risk);
        assert_eq!(report.scanned, 0);
        assert_eq!(repo.count_all().await.unwrap(), 0);
    }
}
