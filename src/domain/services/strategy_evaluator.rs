//! Pluggable second opinion on detector intents before they are traded.

use crate::domain::entities::order::Side;
use crate::domain::entities::trade_intent::TradeIntent;
use crate::domain::services::indicators::{Candle, RSI};

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accept,
    Reject(String),
}

pub trait StrategyEvaluator: Send + Sync {
    fn name(&self) -> &str;
    fn evaluate(&self, symbol: &str, intent: &TradeIntent, candles: &[Candle]) -> Verdict;
}

/// Accepts every intent
#[derive(Debug, Default, Clone)]
pub struct PassThrough;

impl StrategyEvaluator for PassThrough {
    fn name(&self) -> &str {
        "pass-through"
    }

    fn evaluate(&self, _symbol: &str, _intent: &TradeIntent, _candles: &[Candle]) -> Verdict {
        Verdict::Accept
    }
}

/// Skips buys into overbought momentum and sells into oversold momentum
#[derive(Debug, Clone)]
pub struct RsiFilter {
    pub period: usize,
    pub overbought: f64,
    pub oversold: f64,
}

impl Default for RsiFilter {
    fn default() -> Self {
        Self {
            period: 14,
            overbought: 70.0,
            oversold: 30.0,
        }
    }
}

impl StrategyEvaluator for RsiFilter {
    fn name(&self) -> &str {
        "rsi-filter"
    }

    fn evaluate(&self, symbol: &str, intent: &TradeIntent, candles: &[Candle]) -> Verdict {
        let rsi = match intent.rsi.or_else(|| RSI::new(self.period).latest(candles)) {
            Some(rsi) => rsi,
            // Too little history to judge
            None => return Verdict::Accept,
        };

        match intent.side {
            Side::Buy if rsi > self.overbought => {
                Verdict::Reject(format!("{} RSI {:.1} overbought for a buy", symbol, rsi))
            }
            Side::Sell if rsi < self.oversold => {
                Verdict::Reject(format!("{} RSI {:.1} oversold for a sell", symbol, rsi))
            }
            _ => Verdict::Accept,
        }
    }
}
