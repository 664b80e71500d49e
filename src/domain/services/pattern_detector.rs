//! Break-of-structure / order-block scanner
//!
//! Stateless: given a candle window (oldest first) it either returns a limit
//! order intent at the order block behind the most recent structure break,
//! or `None`.

use crate::domain::entities::order::{OrderType, Side};
use crate::domain::entities::trade_intent::TradeIntent;
use crate::domain::services::indicators::{Candle, RSI};
use tracing::debug;

/// Tolerance for the reward:risk gate, so a target computed at exactly the
/// minimum ratio is not rejected by float rounding.
const RR_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub min_candles: usize,
    /// Candles scanned for swing points
    pub lookback: usize,
    /// Candles before the break searched for the order block
    pub order_block_window: usize,
    pub min_risk_reward: f64,
    /// Stop placed beyond the order block by this fraction of its range
    pub stop_buffer_ratio: f64,
    pub rsi_period: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_candles: 20,
            lookback: 20,
            order_block_window: 10,
            min_risk_reward: 2.0,
            stop_buffer_ratio: 0.1,
            rsi_period: 14,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct StructureBreak {
    side: Side,
    index: usize,
}

pub struct StructureDetector {
    config: DetectorConfig,
}

impl StructureDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn detect(&self, candles: &[Candle]) -> Option<TradeIntent> {
        if candles.len() < self.config.min_candles.max(3) {
            debug!("Not enough candles: {} < {}", candles.len(), self.config.min_candles);
            return None;
        }

        let rsi = RSI::new(self.config.rsi_period).latest(candles);

        let structure_break = self.find_break(candles)?;
        let ob = self.find_order_block(candles, structure_break)?;

        let range = ob.range();
        let buffer = range * self.config.stop_buffer_ratio;
        let rr = self.config.min_risk_reward;

        let (entry, stop_loss, take_profit) = match structure_break.side {
            Side::Sell => {
                let entry = ob.high;
                let stop_loss = ob.high + buffer;
                (entry, stop_loss, entry - (stop_loss - entry) * rr)
            }
            Side::Buy => {
                let entry = ob.low;
                let stop_loss = ob.low - buffer;
                (entry, stop_loss, entry + (entry - stop_loss) * rr)
            }
        };

        let intent = TradeIntent {
            side: structure_break.side,
            order_type: OrderType::limit_for(structure_break.side),
            entry,
            stop_loss,
            take_profit,
            break_index: structure_break.index,
            rsi,
        };

        match intent.reward_to_risk() {
            None => {
                debug!("Degenerate intent: stop loss equals entry {}", entry);
                None
            }
            Some(ratio) if ratio + RR_EPSILON < rr => {
                debug!("Reward:risk {:.3} below minimum {:.3}", ratio, rr);
                None
            }
            Some(_) => Some(intent),
        }
    }

    /// Indices of local highs and lows inside the lookback window
    fn swing_points(&self, candles: &[Candle]) -> (Vec<usize>, Vec<usize>) {
        let len = candles.len();
        let start = len.saturating_sub(self.config.lookback);
        let mut highs = Vec::new();
        let mut lows = Vec::new();

        for i in (start + 1)..len.saturating_sub(1) {
            let (prev, cur, next) = (&candles[i - 1], &candles[i], &candles[i + 1]);
            if cur.high > prev.high && cur.high > next.high {
                highs.push(i);
            }
            if cur.low < prev.low && cur.low < next.low {
                lows.push(i);
            }
        }

        (highs, lows)
    }

    fn find_break(&self, candles: &[Candle]) -> Option<StructureBreak> {
        let (highs, lows) = self.swing_points(candles);
        let (&last_high, &last_low) = (highs.last()?, lows.last()?);

        if last_high > last_low {
            let prior_max = highs
                .iter()
                .filter(|&&i| i < last_low)
                .map(|&i| candles[i].high)
                .fold(f64::NEG_INFINITY, f64::max);
            if prior_max.is_finite() && candles[last_high].high > prior_max {
                return Some(StructureBreak {
                    side: Side::Buy,
                    index: last_high,
                });
            }
        } else {
            let prior_min = lows
                .iter()
                .filter(|&&i| i < last_high)
                .map(|&i| candles[i].low)
                .fold(f64::INFINITY, f64::min);
            if prior_min.is_finite() && candles[last_low].low < prior_min {
                return Some(StructureBreak {
                    side: Side::Sell,
                    index: last_low,
                });
            }
        }

        debug!("No clear break of structure");
        None
    }

    /// Last opposite-bodied candle before the break
    fn find_order_block<'a>(
        &self,
        candles: &'a [Candle],
        structure_break: StructureBreak,
    ) -> Option<&'a Candle> {
        let start = structure_break.index.saturating_sub(self.config.order_block_window);
        let window = &candles[start..structure_break.index];
        let found = match structure_break.side {
            Side::Buy => window.iter().rev().find(|c| c.is_bearish()),
            Side::Sell => window.iter().rev().find(|c| c.is_bullish()),
        };
        if found.is_none() {
            debug!("No order block before break at {}", structure_break.index);
        }
        found
    }
}

impl Default for StructureDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}
