//! Signal Parser Trait
//!
//! Turns free-form chat text into [`ParsedSignal`] fields. The production
//! implementation calls a language model; tests plug in scripted parsers.

use crate::domain::entities::message::ParsedSignal;
use crate::domain::errors::ParseError;
use async_trait::async_trait;

#[async_trait]
pub trait SignalParser: Send + Sync {
    fn name(&self) -> &str;

    /// Parse raw message text. Failures are never retried by the caller.
    async fn parse(&self, text: &str) -> Result<ParsedSignal, ParseError>;
}
