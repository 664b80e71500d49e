pub mod message;
pub mod order;
pub mod signal;
pub mod trade_intent;
