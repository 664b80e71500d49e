//! Persistence Layer
//!
//! Durable signal store shared by the message correlator and the position
//! monitor. Uses SQLite with async operations via sqlx.
//!
//! # Database Schema
//!
//! ## Signals Table
//! - id: INTEGER (autoincrement), internal signal id
//! - timestamp: time the source message was received
//! - channel_id / channel_name / message_id: source of the signal;
//!   (channel_id, message_id) is unique
//! - original_message: raw text
//! - symbol, order_type (nullable for partial entries)
//! - entry_price, stop_loss: nullable REAL
//! - take_profits: JSON array of REAL
//! - comment: free text (failure reasons, reconciliation notes)
//! - status: lifecycle state (NEW, PARTIAL_ENTRY, PROCESSED_ACTIVE, ...)
//! - broker_tickets: JSON array of venue tickets, NULL until executed
//!
//! Rows are never deleted; every update targets a single id.
//!
//! ## Processed Messages Table
//! Follow-up messages (SL/TP completion, cancel, modify) act on an existing
//! signal instead of creating one. Each is recorded here once so a
//! redelivered follow-up is recognized.
//! - (channel_id, message_id): primary key
//! - signal_id: the signal the message acted on
//! - action: "complete", "cancel" or "modify"
//! - processed_at

pub mod models;
pub mod repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Database initialization error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Query error: {0}")]
    QueryError(String),
}

/// Initialize the database connection pool
///
/// # Arguments
/// - `database_url`: SQLite URL (e.g., "sqlite://data/signals.db" or "sqlite::memory:")
///
/// # Errors
/// Returns error if database connection fails or migrations fail
pub async fn init_database(database_url: &str) -> Result<DbPool, DatabaseError> {
    init_database_with(&DatabaseConfig {
        url: database_url.to_string(),
        ..DatabaseConfig::default()
    })
    .await
}

pub async fn init_database_with(config: &DatabaseConfig) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", config.url);

    if let Some(db_path) = config.url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
                })?;
            }
        }
    }

    let mut options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
    if !config.log_queries {
        options = options.disable_statement_logging();
    }

    // Every connection to ":memory:" is a separate database
    let max_connections = if config.url.contains(":memory:") {
        1
    } else {
        config.max_connections
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    info!("✓ Database initialized successfully");

    Ok(pool)
}

/// Run database migrations
async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS signals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp DATETIME NOT NULL,
            channel_id TEXT NOT NULL,
            channel_name TEXT,
            message_id INTEGER NOT NULL,
            original_message TEXT NOT NULL,
            symbol TEXT NOT NULL,
            order_type TEXT,
            entry_price REAL,
            stop_loss REAL,
            take_profits TEXT NOT NULL DEFAULT '[]',
            comment TEXT,
            status TEXT NOT NULL,
            broker_tickets TEXT,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (channel_id, message_id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("Failed to create signals table: {}", e)))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_signals_status ON signals(status)")
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_signals_channel_symbol ON signals(channel_id, symbol, status)",
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processed_messages (
            channel_id TEXT NOT NULL,
            message_id INTEGER NOT NULL,
            signal_id INTEGER NOT NULL REFERENCES signals(id),
            action TEXT NOT NULL,
            processed_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (channel_id, message_id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create processed_messages table: {}", e))
    })?;

    info!("✓ Database migrations completed successfully");

    Ok(())
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://data/signals.db")
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Enable query logging
    pub log_queries: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/signals.db".to_string(),
            max_connections: 5,
            log_queries: cfg!(debug_assertions),
        }
    }
}

impl DatabaseConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://data/signals.db".to_string());

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(5);

        let log_queries = std::env::var("DATABASE_LOG_QUERIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(cfg!(debug_assertions));

        Self {
            url,
            max_connections,
            log_queries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_init() {
        let pool = init_database("sqlite::memory:").await;
        assert!(pool.is_ok());
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        let result: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('signals', 'processed_messages')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(result.0, 2);
    }

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();
        assert_eq!(config.url, "sqlite://data/signals.db");
        assert_eq!(config.max_connections, 5);
    }
}
