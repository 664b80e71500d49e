use crate::domain::entities::order::{OrderType, Side};

/// Candidate trade produced by the structure detector. Not persisted until executed.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeIntent {
    pub side: Side,
    pub order_type: OrderType,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Index of the candle where structure broke
    pub break_index: usize,
    /// Last momentum reading, for downstream filters
    pub rsi: Option<f64>,
}

impl TradeIntent {
    pub fn risk(&self) -> f64 {
        (self.entry - self.stop_loss).abs()
    }

    pub fn reward(&self) -> f64 {
        (self.take_profit - self.entry).abs()
    }

    pub fn reward_to_risk(&self) -> Option<f64> {
        let risk = self.risk();
        if risk > 0.0 {
            Some(self.reward() / risk)
        } else {
            None
        }
    }
}
