pub mod autotrader;
pub mod keyed_lock;
pub mod position_monitor;
pub mod reconciliation;
pub mod signal_executor;
pub mod signal_processor;
