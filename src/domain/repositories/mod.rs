pub mod signal_parser;
pub mod venue_client;
