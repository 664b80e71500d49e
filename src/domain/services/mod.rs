pub mod indicators;
pub mod order_validation;
pub mod pattern_detector;
pub mod risk_guard;
pub mod strategy_evaluator;
