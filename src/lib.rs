//! Signalbridge
//!
//! Turns trading signals posted in chat channels into venue orders and
//! manages them afterwards: reply correlation, multi-leg execution,
//! breakeven stops and an optional detector-driven autotrader.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod task_runner;
