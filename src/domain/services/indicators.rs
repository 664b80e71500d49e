use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
    pub time: DateTime<Utc>,
}

impl Candle {
    pub fn new(
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        time: DateTime<Utc>,
    ) -> Result<Self, String> {
        let prices = [open, high, low, close];
        if prices.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err("Candle prices must be finite and non-negative".to_string());
        }
        if high < low || high < open.max(close) || low > open.min(close) {
            return Err(format!(
                "Inconsistent candle: o={} h={} l={} c={}",
                open, high, low, close
            ));
        }
        Ok(Candle {
            open,
            high,
            low,
            close,
            volume,
            time,
        })
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

pub trait Indicator {
    fn calculate(&self, candles: &[Candle]) -> Vec<f64>;
}

/// Relative strength over a rolling window of simple average gains/losses
pub struct RSI {
    pub period: usize,
}

impl RSI {
    pub fn new(period: usize) -> Self {
        RSI { period }
    }

    /// Most recent reading, if the series is long enough
    pub fn latest(&self, candles: &[Candle]) -> Option<f64> {
        self.calculate(candles).last().copied()
    }
}

impl Indicator for RSI {
    fn calculate(&self, candles: &[Candle]) -> Vec<f64> {
        if self.period == 0 || candles.len() < self.period + 1 {
            return vec![];
        }

        let (gains, losses): (Vec<f64>, Vec<f64>) = candles
            .windows(2)
            .map(|pair| {
                let change = pair[1].close - pair[0].close;
                if change > 0.0 {
                    (change, 0.0)
                } else {
                    (0.0, change.abs())
                }
            })
            .unzip();

        let mut rsi_values = Vec::with_capacity(gains.len() + 1 - self.period);
        for end in self.period..=gains.len() {
            let start = end - self.period;
            let avg_gain = gains[start..end].iter().sum::<f64>() / self.period as f64;
            let avg_loss = losses[start..end].iter().sum::<f64>() / self.period as f64;
            let rsi = if avg_loss == 0.0 {
                if avg_gain == 0.0 {
                    50.0
                } else {
                    100.0
                }
            } else {
                100.0 - (100.0 / (1.0 + avg_gain / avg_loss))
            };
            rsi_values.push(rsi);
        }

        rsi_values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: f64) -> Candle {
        Candle::new(close, close + 1.0, close - 1.0, close, 100.0, Utc::now()).unwrap()
    }

    #[test]
    fn test_candle_validation() {
        assert!(Candle::new(100.0, 99.0, 98.0, 100.0, 0.0, Utc::now()).is_err());
        assert!(Candle::new(100.0, 101.0, 99.0, f64::NAN, 0.0, Utc::now()).is_err());
        let c = Candle::new(100.0, 105.0, 95.0, 102.0, 10.0, Utc::now()).unwrap();
        assert!(c.is_bullish());
        assert_eq!(c.range(), 10.0);
    }

    #[test]
    fn test_rsi_calculation() {
        let candles: Vec<Candle> = [102.0, 105.0, 108.0, 106.0, 109.0]
            .iter()
            .map(|c| candle(*c))
            .collect();
        let values = RSI::new(2).calculate(&candles);
        assert_eq!(values.len(), 3);
        assert!(values.iter().all(|v| (0.0..=100.0).contains(v)));
    }

    #[test]
    fn test_rsi_extremes() {
        let rising: Vec<Candle> = (0..10).map(|i| candle(100.0 + i as f64)).collect();
        assert_eq!(RSI::new(5).latest(&rising), Some(100.0));

        let flat: Vec<Candle> = (0..10).map(|_| candle(100.0)).collect();
        assert_eq!(RSI::new(5).latest(&flat), Some(50.0));

        assert_eq!(RSI::new(14).latest(&flat), None);
    }
}
