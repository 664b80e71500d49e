//! Deadline decorator for venue clients.
//!
//! Wraps every low-level venue call in `tokio::time::timeout`. Order
//! placement goes through the provided `place_order`, so each leg gets its
//! own deadline and a leg timeout surfaces as a partial fill.

use crate::domain::entities::order::LegOrder;
use crate::domain::entities::signal::Ticket;
use crate::domain::repositories::venue_client::{
    AccountInfo, Deal, OpenPosition, SymbolInfo, TaggedOrder, VenueClient, VenueError, VenueResult,
};
use crate::domain::services::indicators::Candle;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct TimeoutVenue {
    inner: Arc<dyn VenueClient>,
    timeout: Duration,
}

impl TimeoutVenue {
    pub fn new(inner: Arc<dyn VenueClient>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn guard<T>(&self, call: &str, fut: impl Future<Output = VenueResult<T>>) -> VenueResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!("[{}] {} timed out after {:?}", self.inner.name(), call, self.timeout);
                Err(VenueError::Timeout(self.timeout.as_millis() as u64))
            }
        }
    }
}

#[async_trait]
impl VenueClient for TimeoutVenue {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn symbol_info(&self, symbol: &str) -> VenueResult<SymbolInfo> {
        self.guard("symbol_info", self.inner.symbol_info(symbol)).await
    }

    async fn submit_leg(&self, leg: &LegOrder) -> VenueResult<String> {
        self.guard("submit_leg", self.inner.submit_leg(leg)).await
    }

    async fn close_position(&self, ticket: Ticket) -> VenueResult<()> {
        self.guard("close_position", self.inner.close_position(ticket)).await
    }

    async fn cancel_order(&self, ticket: Ticket) -> VenueResult<()> {
        self.guard("cancel_order", self.inner.cancel_order(ticket)).await
    }

    async fn modify_stop_take(
        &self,
        ticket: Ticket,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> VenueResult<()> {
        self.guard(
            "modify_stop_take",
            self.inner.modify_stop_take(ticket, stop_loss, take_profit),
        )
        .await
    }

    async fn get_deals_history(&self, days: u32) -> VenueResult<Vec<Deal>> {
        self.guard("get_deals_history", self.inner.get_deals_history(days)).await
    }

    async fn get_open_positions(&self, tickets: &[Ticket]) -> VenueResult<Vec<OpenPosition>> {
        self.guard("get_open_positions", self.inner.get_open_positions(tickets)).await
    }

    async fn get_account_info(&self) -> VenueResult<AccountInfo> {
        self.guard("get_account_info", self.inner.get_account_info()).await
    }

    async fn get_tagged_orders(&self, magic: u64) -> VenueResult<Vec<TaggedOrder>> {
        self.guard("get_tagged_orders", self.inner.get_tagged_orders(magic)).await
    }

    async fn get_candles(&self, symbol: &str, count: usize) -> VenueResult<Vec<Candle>> {
        self.guard("get_candles", self.inner.get_candles(symbol, count)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::paper_venue::PaperVenue;

    struct SlowVenue;

    #[async_trait]
    impl VenueClient for SlowVenue {
        fn name(&self) -> &str {
            "slow"
        }
        async fn symbol_info(&self, symbol: &str) -> VenueResult<SymbolInfo> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(VenueError::UnknownSymbol(symbol.to_string()))
        }
        async fn submit_leg(&self, _leg: &LegOrder) -> VenueResult<String> {
            unimplemented!()
        }
        async fn close_position(&self, _ticket: Ticket) -> VenueResult<()> {
            unimplemented!()
        }
        async fn cancel_order(&self, _ticket: Ticket) -> VenueResult<()> {
            unimplemented!()
        }
        async fn modify_stop_take(&self, _t: Ticket, _sl: Option<f64>, _tp: Option<f64>) -> VenueResult<()> {
            unimplemented!()
        }
        async fn get_deals_history(&self, _days: u32) -> VenueResult<Vec<Deal>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![])
        }
        async fn get_open_positions(&self, _tickets: &[Ticket]) -> VenueResult<Vec<OpenPosition>> {
            unimplemented!()
        }
        async fn get_account_info(&self) -> VenueResult<AccountInfo> {
            unimplemented!()
        }
        async fn get_tagged_orders(&self, _magic: u64) -> VenueResult<Vec<TaggedOrder>> {
            unimplemented!()
        }
        async fn get_candles(&self, _symbol: &str, _count: usize) -> VenueResult<Vec<Candle>> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_slow_calls_time_out() {
        let venue = TimeoutVenue::new(Arc::new(SlowVenue), Duration::from_millis(20));
        assert_eq!(venue.get_deals_history(1).await, Err(VenueError::Timeout(20)));
        assert_eq!(venue.symbol_info("XAUUSD").await, Err(VenueError::Timeout(20)));
    }

    #[tokio::test]
    async fn test_fast_calls_pass_through() {
        let venue = TimeoutVenue::new(Arc::new(PaperVenue::new(1_000.0)), Duration::from_secs(1));
        assert_eq!(venue.name(), "paper");
        assert_eq!(venue.symbol_info("XAUUSD").await.unwrap().digits, 2);
    }
}
