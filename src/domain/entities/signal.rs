//! Signal lifecycle states and ticket helpers

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Broker-side identifier of one leg (position or pending order)
pub type Ticket = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    /// Full signal recorded, not yet executed
    New,
    /// Entry known, waiting for a follow-up message with SL/TP
    PartialEntry,
    ProcessedActive,
    ModifiedActive,
    BreakevenSet,
    Cancelled,
    /// Set externally once every leg is flat
    Closed,
    ErrorNoTpSl,
    ErrorInvalidVolume,
    ErrorMt5,
    ErrorTicketParse,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::New => "NEW",
            SignalStatus::PartialEntry => "PARTIAL_ENTRY",
            SignalStatus::ProcessedActive => "PROCESSED_ACTIVE",
            SignalStatus::ModifiedActive => "MODIFIED_ACTIVE",
            SignalStatus::BreakevenSet => "BREAKEVEN_SET",
            SignalStatus::Cancelled => "CANCELLED",
            SignalStatus::Closed => "CLOSED",
            SignalStatus::ErrorNoTpSl => "ERROR_NO_TP_SL",
            SignalStatus::ErrorInvalidVolume => "ERROR_INVALID_VOLUME",
            SignalStatus::ErrorMt5 => "ERROR_MT5",
            SignalStatus::ErrorTicketParse => "ERROR_TICKET_PARSE",
        }
    }

    /// Statuses that are allowed to carry broker tickets
    pub fn holds_tickets(&self) -> bool {
        matches!(
            self,
            SignalStatus::ProcessedActive | SignalStatus::ModifiedActive | SignalStatus::BreakevenSet
        )
    }

    /// Statuses the position monitor watches for a breakeven move
    pub fn is_actively_managed(&self) -> bool {
        matches!(self, SignalStatus::ProcessedActive | SignalStatus::ModifiedActive)
    }
}

impl std::fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(SignalStatus::New),
            "PARTIAL_ENTRY" => Ok(SignalStatus::PartialEntry),
            "PROCESSED_ACTIVE" => Ok(SignalStatus::ProcessedActive),
            "MODIFIED_ACTIVE" => Ok(SignalStatus::ModifiedActive),
            "BREAKEVEN_SET" => Ok(SignalStatus::BreakevenSet),
            "CANCELLED" => Ok(SignalStatus::Cancelled),
            "CLOSED" => Ok(SignalStatus::Closed),
            "ERROR_NO_TP_SL" => Ok(SignalStatus::ErrorNoTpSl),
            "ERROR_INVALID_VOLUME" => Ok(SignalStatus::ErrorInvalidVolume),
            "ERROR_MT5" => Ok(SignalStatus::ErrorMt5),
            "ERROR_TICKET_PARSE" => Ok(SignalStatus::ErrorTicketParse),
            other => Err(format!("Unknown signal status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("Unparseable ticket list '{raw}': {reason}")]
pub struct TicketParseError {
    pub raw: String,
    pub reason: String,
}

/// Parse identifiers as returned by the venue ("123", " 456 ").
pub fn parse_venue_tickets(raw: &[String]) -> Result<Vec<Ticket>, TicketParseError> {
    raw.iter()
        .map(|t| {
            t.trim().parse::<Ticket>().map_err(|e| TicketParseError {
                raw: raw.join(","),
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Parse the stored JSON ticket column. NULL and "" both mean no tickets.
pub fn parse_stored_tickets(raw: Option<&str>) -> Result<Vec<Ticket>, TicketParseError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Vec::new()),
        Some(text) => serde_json::from_str::<Vec<Ticket>>(text).map_err(|e| TicketParseError {
            raw: text.to_string(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [
            SignalStatus::New,
            SignalStatus::PartialEntry,
            SignalStatus::BreakevenSet,
            SignalStatus::ErrorTicketParse,
        ] {
            assert_eq!(status.as_str().parse::<SignalStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<SignalStatus>().is_err());
    }

    #[test]
    fn test_ticket_holding_statuses() {
        assert!(SignalStatus::ProcessedActive.holds_tickets());
        assert!(SignalStatus::BreakevenSet.holds_tickets());
        assert!(!SignalStatus::Cancelled.holds_tickets());
        assert!(!SignalStatus::BreakevenSet.is_actively_managed());
    }

    #[test]
    fn test_parse_venue_tickets() {
        let raw = vec!["1001".to_string(), " 1002 ".to_string()];
        assert_eq!(parse_venue_tickets(&raw).unwrap(), vec![1001, 1002]);

        let bad = vec!["1001".to_string(), "abc".to_string()];
        let err = parse_venue_tickets(&bad).unwrap_err();
        assert_eq!(err.raw, "1001,abc");
    }

    #[test]
    fn test_parse_stored_tickets() {
        assert!(parse_stored_tickets(None).unwrap().is_empty());
        assert!(parse_stored_tickets(Some("")).unwrap().is_empty());
        assert_eq!(parse_stored_tickets(Some("[5, 6]")).unwrap(), vec![5, 6]);
        assert!(parse_stored_tickets(Some("5;6")).is_err());
    }
}
