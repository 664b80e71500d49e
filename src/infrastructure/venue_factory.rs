//! Venue Factory
//!
//! Builds the single venue client for the process from configuration. The
//! client is created once and shared by the correlator, the position monitor,
//! the autotrader and startup reconciliation.

use crate::config::{AppConfig, VenueMode};
use crate::domain::repositories::venue_client::{VenueClient, VenueResult};
use crate::infrastructure::http_bridge_client::HttpBridgeVenue;
use crate::infrastructure::paper_venue::PaperVenue;
use crate::infrastructure::timeout_venue::TimeoutVenue;
use std::sync::Arc;
use tracing::{error, info};

/// Factory for creating venue clients
pub struct VenueFactory;

impl VenueFactory {
    /// Create the configured venue, wrapped with the per-call deadline
    pub fn create(config: &AppConfig) -> VenueResult<Arc<dyn VenueClient>> {
        let inner: Arc<dyn VenueClient> = match config.venue_mode {
            VenueMode::Bridge => Self::create_bridge_client(config)?,
            VenueMode::Paper => Self::create_paper_client(config),
        };

        Ok(Arc::new(TimeoutVenue::new(inner, config.venue_timeout())))
    }

    fn create_bridge_client(config: &AppConfig) -> VenueResult<Arc<dyn VenueClient>> {
        match HttpBridgeVenue::new(&config.venue_bridge_url, config.venue_timeout()) {
            Ok(client) => {
                info!("✓ Bridge venue client created for {}", config.venue_bridge_url);
                Ok(Arc::new(client) as Arc<dyn VenueClient>)
            }
            Err(e) => {
                error!("✗ Failed to create bridge venue client: {}", e);
                Err(e)
            }
        }
    }

    fn create_paper_client(config: &AppConfig) -> Arc<dyn VenueClient> {
        info!(
            "✓ Paper venue created with balance {:.2} (no real orders will be sent)",
            config.risk_starting_balance
        );
        Arc::new(PaperVenue::new(config.risk_starting_balance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_paper_venue() {
        let config = AppConfig::default();
        let venue = VenueFactory::create(&config).unwrap();
        assert_eq!(venue.name(), "paper");
    }

    #[test]
    fn test_create_bridge_venue() {
        let config = AppConfig {
            venue_mode: VenueMode::Bridge,
            venue_bridge_url: "http://localhost:8001".to_string(),
            ..AppConfig::default()
        };
        assert_eq!(VenueFactory::create(&config).unwrap().name(), "bridge");
    }

    #[test]
    fn test_bad_bridge_url_fails() {
        let config = AppConfig {
            venue_mode: VenueMode::Bridge,
            venue_bridge_url: "::nope".to_string(),
            ..AppConfig::default()
        };
        assert!(VenueFactory::create(&config).is_err());
    }
}
