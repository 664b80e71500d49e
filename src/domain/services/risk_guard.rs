//! Drawdown guard for autonomous entries

/// Limits trading once daily or total drawdown thresholds are breached.
///
/// Both limits are fractions of the starting balance. The daily accumulator
/// is fed with realized P&L and must be reset on every calendar-day rollover.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskGuard {
    starting_balance: f64,
    daily_loss_fraction: f64,
    max_drawdown_fraction: f64,
    daily_pnl: f64,
}

impl RiskGuard {
    pub fn new(starting_balance: f64, daily_loss_fraction: f64, max_drawdown_fraction: f64) -> Self {
        Self {
            starting_balance,
            daily_loss_fraction,
            max_drawdown_fraction,
            daily_pnl: 0.0,
        }
    }

    pub fn daily_limit(&self) -> f64 {
        self.starting_balance * self.daily_loss_fraction
    }

    pub fn max_limit(&self) -> f64 {
        self.starting_balance * self.max_drawdown_fraction
    }

    pub fn daily_pnl(&self) -> f64 {
        self.daily_pnl
    }

    /// False once today's loss reaches the daily limit, or once
    /// `equity_total` is at or below `starting_balance - max_limit`.
    ///
    /// `equity_today` is today's P&L marked to market (realized plus
    /// floating). The daily loss is the worse of it and the realized
    /// accumulator, so a caller without floating P&L can pass `daily_pnl()`.
    pub fn can_trade(&self, equity_today: f64, equity_total: f64) -> bool {
        if -self.daily_pnl.min(equity_today) >= self.daily_limit() {
            return false;
        }
        if equity_total <= self.starting_balance - self.max_limit() {
            return false;
        }
        true
    }

    /// Record realized P&L of one closed trade
    pub fn update(&mut self, pnl: f64) {
        self.daily_pnl += pnl;
    }

    pub fn reset_day(&mut self) {
        self.daily_pnl = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> RiskGuard {
        // 5% daily, 10% total on 10k
        RiskGuard::new(10_000.0, 0.05, 0.10)
    }

    #[test]
    fn test_fresh_guard_allows_trading() {
        assert!(guard().can_trade(0.0, 10_000.0));
    }

    #[test]
    fn test_daily_loss_limit() {
        let mut g = guard();
        g.update(-300.0);
        assert!(g.can_trade(g.daily_pnl(), 9_700.0));
        g.update(-200.0);
        assert_eq!(g.daily_pnl(), -500.0);
        assert!(!g.can_trade(g.daily_pnl(), 9_500.0));
        // Realized loss counts even if the caller reports a flat day
        assert!(!g.can_trade(0.0, 9_500.0));
    }

    #[test]
    fn test_floating_loss_counts_toward_daily_limit() {
        let mut g = guard();
        g.update(-200.0);
        assert!(g.can_trade(-499.0, 9_501.0));
        assert!(!g.can_trade(-500.0, 9_500.0));
    }

    #[test]
    fn test_profits_offset_losses() {
        let mut g = guard();
        g.update(-450.0);
        g.update(100.0);
        assert!(g.can_trade(g.daily_pnl(), 9_650.0));
    }

    #[test]
    fn test_total_drawdown_limit_is_independent() {
        let g = guard();
        assert!(g.can_trade(0.0, 9_000.01));
        assert!(!g.can_trade(0.0, 9_000.0));
        assert!(!g.can_trade(0.0, 8_500.0));
    }

    #[test]
    fn test_reset_day() {
        let mut g = guard();
        g.update(-600.0);
        assert!(!g.can_trade(g.daily_pnl(), 9_400.0));
        g.reset_day();
        assert!(g.can_trade(g.daily_pnl(), 9_400.0));
    }
}
