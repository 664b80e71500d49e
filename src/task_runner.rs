//! Periodic Task Runner
//!
//! Runs a background loop one iteration per tick. Failed iterations are
//! logged with a consecutive-failure count and delay the next tick with
//! exponential backoff; the loop only ends when shutdown is signalled.

use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Backoff configuration for a periodic task
#[derive(Debug, Clone)]
pub struct PeriodicConfig {
    /// Delay between successful iterations
    pub interval: Duration,
    /// Upper bound for the delay after repeated failures
    pub max_backoff: Duration,
}

impl PeriodicConfig {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            max_backoff: std::cmp::max(interval * 8, Duration::from_secs(60)),
        }
    }
}

#[derive(Debug)]
struct BackoffState {
    consecutive_failures: u32,
    current_delay: Duration,
}

impl BackoffState {
    fn new(interval: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            current_delay: interval,
        }
    }

    fn record_failure(&mut self, max_delay: Duration) {
        self.consecutive_failures += 1;
        self.current_delay = std::cmp::min(self.current_delay * 2, max_delay);
    }

    fn reset(&mut self, interval: Duration) {
        self.consecutive_failures = 0;
        self.current_delay = interval;
    }
}

/// Run `task_fn` forever, once per interval, until `shutdown` flips to true.
///
/// An error from one iteration never stops the loop.
pub async fn run_periodic<F, Fut>(
    task_name: &str,
    config: PeriodicConfig,
    mut shutdown: watch::Receiver<bool>,
    mut task_fn: F,
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), String>>,
{
    let mut state = BackoffState::new(config.interval);
    info!("Task '{}' started (every {:?})", task_name, config.interval);

    loop {
        if *shutdown.borrow() {
            break;
        }

        match task_fn().await {
            Ok(()) => {
                if state.consecutive_failures > 0 {
                    warn!(
                        "Task '{}' recovered after {} failures",
                        task_name, state.consecutive_failures
                    );
                }
                state.reset(config.interval);
            }
            Err(e) => {
                state.record_failure(config.max_backoff);
                error!(
                    "Task '{}' failed ({} in a row), next attempt in {:?}: {}",
                    task_name, state.consecutive_failures, state.current_delay, e
                );
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(state.current_delay) => {}
            changed = shutdown.changed() => {
                // A dropped sender also means shutdown
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Task '{}' stopped", task_name);
}
