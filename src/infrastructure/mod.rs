pub mod http_bridge_client;
pub mod llm_parser;
pub mod paper_venue;
pub mod timeout_venue;
pub mod venue_factory;
