//! Database Repository
//!
//! Data access layer for signals. All updates target a single row by id so
//! the correlator and the position monitor never overwrite each other.

use super::models::*;
use super::{DatabaseError, DbPool};
use crate::domain::entities::signal::{SignalStatus, Ticket};
use chrono::Utc;
use sqlx::types::Json;
use tracing::{debug, error};

/// Signal repository
#[derive(Clone)]
pub struct SignalRepository {
    pool: DbPool,
}

impl SignalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a new signal. Returns `None` when a row already exists for the
    /// same (channel_id, message_id).
    pub async fn create(&self, signal: CreateSignal) -> Result<Option<SignalRecord>, DatabaseError> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, SignalRecord>(
            r#"
            INSERT INTO signals (
                timestamp, channel_id, channel_name, message_id, original_message,
                symbol, order_type, entry_price, stop_loss, take_profits,
                comment, status, broker_tickets, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, NULL, ?13, ?13)
            ON CONFLICT (channel_id, message_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(signal.timestamp)
        .bind(&signal.channel_id)
        .bind(&signal.channel_name)
        .bind(signal.message_id)
        .bind(&signal.original_message)
        .bind(&signal.symbol)
        .bind(signal.order_type)
        .bind(signal.entry_price)
        .bind(signal.stop_loss)
        .bind(Json(&signal.take_profits))
        .bind(&signal.comment)
        .bind(signal.status)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create signal: {}", e);
            DatabaseError::QueryError(format!("Failed to create signal: {}", e))
        })?;

        if let Some(record) = &record {
            debug!(
                "Created signal {} ({} {}) from {}/{}",
                record.id, record.status, record.symbol, record.channel_id, record.message_id
            );
        }
        Ok(record)
    }

    /// Get signal by ID
    pub async fn get(&self, id: i64) -> Result<Option<SignalRecord>, DatabaseError> {
        sqlx::query_as::<_, SignalRecord>("SELECT * FROM signals WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to get signal {}: {}", id, e);
                DatabaseError::QueryError(format!("Failed to get signal: {}", e))
            })
    }

    /// Signal created from a given source message (reply correlation)
    pub async fn find_by_message(
        &self,
        channel_id: &str,
        message_id: i64,
    ) -> Result<Option<SignalRecord>, DatabaseError> {
        sqlx::query_as::<_, SignalRecord>(
            "SELECT * FROM signals WHERE channel_id = ?1 AND message_id = ?2",
        )
        .bind(channel_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to find signal for {}/{}: {}", channel_id, message_id, e);
            DatabaseError::QueryError(format!("Failed to find signal: {}", e))
        })
    }

    /// Most recent partial entry waiting for SL/TP on a channel and symbol
    pub async fn latest_partial_entry(
        &self,
        channel_id: &str,
        symbol: &str,
    ) -> Result<Option<SignalRecord>, DatabaseError> {
        sqlx::query_as::<_, SignalRecord>(
            r#"
            SELECT * FROM signals
            WHERE channel_id = ?1 AND symbol = ?2 AND status = ?3
            ORDER BY timestamp DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(channel_id)
        .bind(symbol)
        .bind(SignalStatus::PartialEntry)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to find partial entry for {}/{}: {}", channel_id, symbol, e);
            DatabaseError::QueryError(format!("Failed to find partial entry: {}", e))
        })
    }

    /// True once a message has created a signal or acted on one
    pub async fn message_seen(&self, channel_id: &str, message_id: i64) -> Result<bool, DatabaseError> {
        let (seen,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (SELECT 1 FROM signals WHERE channel_id = ?1 AND message_id = ?2)
                OR EXISTS (SELECT 1 FROM processed_messages WHERE channel_id = ?1 AND message_id = ?2)
            "#,
        )
        .bind(channel_id)
        .bind(message_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to look up message {}/{}: {}", channel_id, message_id, e);
            DatabaseError::QueryError(format!("Failed to look up message: {}", e))
        })?;

        Ok(seen)
    }

    /// Record a follow-up message that acts on `signal_id`. Returns false
    /// when the message was recorded before.
    pub async fn record_follow_up(
        &self,
        channel_id: &str,
        message_id: i64,
        signal_id: i64,
        action: &str,
    ) -> Result<bool, DatabaseError> {
        let rows_affected = sqlx::query(
            r#"
            INSERT INTO processed_messages (channel_id, message_id, signal_id, action, processed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (channel_id, message_id) DO NOTHING
            "#,
        )
        .bind(channel_id)
        .bind(message_id)
        .bind(signal_id)
        .bind(action)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to record message {}/{}: {}", channel_id, message_id, e);
            DatabaseError::QueryError(format!("Failed to record message: {}", e))
        })?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    /// Executed signals still under stop management
    pub async fn get_actively_managed(&self) -> Result<Vec<SignalRecord>, DatabaseError> {
        sqlx::query_as::<_, SignalRecord>(
            r#"
            SELECT * FROM signals
            WHERE status IN (?1, ?2)
              AND broker_tickets IS NOT NULL
              AND TRIM(broker_tickets) NOT IN ('', '[]')
            ORDER BY id ASC
            "#,
        )
        .bind(SignalStatus::ProcessedActive)
        .bind(SignalStatus::ModifiedActive)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get managed signals: {}", e);
            DatabaseError::QueryError(format!("Failed to get managed signals: {}", e))
        })
    }

    /// Merge new trade levels into a signal, keeping stored values where none are given
    pub async fn update_levels(&self, id: i64, update: UpdateLevels) -> Result<(), DatabaseError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE signals
            SET order_type = COALESCE(?1, order_type),
                entry_price = COALESCE(?2, entry_price),
                stop_loss = COALESCE(?3, stop_loss),
                take_profits = COALESCE(?4, take_profits),
                updated_at = ?5
            WHERE id = ?6
            "#,
        )
        .bind(update.order_type)
        .bind(update.entry_price)
        .bind(update.stop_loss)
        .bind(update.take_profits.as_ref().map(Json))
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update levels of signal {}: {}", id, e);
            DatabaseError::QueryError(format!("Failed to update signal: {}", e))
        })?
        .rows_affected();

        if rows_affected == 0 {
            return Err(DatabaseError::QueryError(format!("Signal not found: {}", id)));
        }

        debug!("Updated levels of signal {}", id);
        Ok(())
    }

    /// Merge SL/TP into a partial entry and move it to NEW in one statement,
    /// so the row is adoptable before any leg reaches the venue. Returns
    /// `None` when the row is no longer a partial entry.
    pub async fn promote_partial_entry(
        &self,
        id: i64,
        update: UpdateLevels,
    ) -> Result<Option<SignalRecord>, DatabaseError> {
        sqlx::query_as::<_, SignalRecord>(
            r#"
            UPDATE signals
            SET order_type = COALESCE(?1, order_type),
                entry_price = COALESCE(?2, entry_price),
                stop_loss = COALESCE(?3, stop_loss),
                take_profits = COALESCE(?4, take_profits),
                status = ?5,
                updated_at = ?6
            WHERE id = ?7 AND status = ?8
            RETURNING *
            "#,
        )
        .bind(update.order_type)
        .bind(update.entry_price)
        .bind(update.stop_loss)
        .bind(update.take_profits.as_ref().map(Json))
        .bind(SignalStatus::New)
        .bind(Utc::now())
        .bind(id)
        .bind(SignalStatus::PartialEntry)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to promote partial entry {}: {}", id, e);
            DatabaseError::QueryError(format!("Failed to promote partial entry: {}", e))
        })
    }

    /// Change status. Statuses that cannot hold tickets clear the ticket column.
    pub async fn set_status(
        &self,
        id: i64,
        status: SignalStatus,
        comment: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE signals
            SET status = ?1,
                comment = COALESCE(?2, comment),
                broker_tickets = CASE WHEN ?3 THEN broker_tickets ELSE NULL END,
                updated_at = ?4
            WHERE id = ?5
            "#,
        )
        .bind(status)
        .bind(comment)
        .bind(status.holds_tickets())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to set status of signal {}: {}", id, e);
            DatabaseError::QueryError(format!("Failed to update signal status: {}", e))
        })?
        .rows_affected();

        if rows_affected == 0 {
            return Err(DatabaseError::QueryError(format!("Signal not found: {}", id)));
        }

        debug!("Signal {} -> {}", id, status);
        Ok(())
    }

    /// Record the venue tickets of an executed signal
    pub async fn set_executed(
        &self,
        id: i64,
        tickets: &[Ticket],
        status: SignalStatus,
        comment: Option<&str>,
    ) -> Result<(), DatabaseError> {
        if !status.holds_tickets() {
            return Err(DatabaseError::QueryError(format!(
                "Status {} cannot carry tickets",
                status
            )));
        }

        let tickets_json = serde_json::to_string(tickets)
            .map_err(|e| DatabaseError::QueryError(format!("Failed to serialize tickets: {}", e)))?;

        let rows_affected = sqlx::query(
            r#"
            UPDATE signals
            SET status = ?1, broker_tickets = ?2, comment = COALESCE(?3, comment), updated_at = ?4
            WHERE id = ?5
            "#,
        )
        .bind(status)
        .bind(&tickets_json)
        .bind(comment)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to store tickets of signal {}: {}", id, e);
            DatabaseError::QueryError(format!("Failed to store tickets: {}", e))
        })?
        .rows_affected();

        if rows_affected == 0 {
            return Err(DatabaseError::QueryError(format!("Signal not found: {}", id)));
        }

        debug!("Signal {} -> {} with tickets {}", id, status, tickets_json);
        Ok(())
    }

    /// Move a managed signal to BREAKEVEN_SET. Returns false if it had
    /// already left the managed states (e.g. cancelled concurrently).
    pub async fn mark_breakeven(&self, id: i64) -> Result<bool, DatabaseError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE signals
            SET status = ?1, updated_at = ?2
            WHERE id = ?3 AND status IN (?4, ?5)
            "#,
        )
        .bind(SignalStatus::BreakevenSet)
        .bind(Utc::now())
        .bind(id)
        .bind(SignalStatus::ProcessedActive)
        .bind(SignalStatus::ModifiedActive)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to mark breakeven on signal {}: {}", id, e);
            DatabaseError::QueryError(format!("Failed to mark breakeven: {}", e))
        })?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    /// Quarantine a row whose stored tickets cannot be parsed. The raw column
    /// is kept in the comment for manual inspection.
    pub async fn mark_ticket_parse_error(&self, id: i64, raw: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE signals
            SET status = ?1, comment = ?2, broker_tickets = NULL, updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(SignalStatus::ErrorTicketParse)
        .bind(format!("unparseable tickets: {}", raw))
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to quarantine signal {}: {}", id, e);
            DatabaseError::QueryError(format!("Failed to quarantine signal: {}", e))
        })?;

        Ok(())
    }

    /// Number of signals stored for a source message (0 or 1)
    pub async fn count_for_message(&self, channel_id: &str, message_id: i64) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM signals WHERE channel_id = ?1 AND message_id = ?2",
        )
        .bind(channel_id)
        .bind(message_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to count signals for {}/{}: {}", channel_id, message_id, e);
            DatabaseError::QueryError(format!("Failed to count signals: {}", e))
        })?;

        Ok(count)
    }

    pub async fn count_all(&self) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM signals")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryError(format!("Failed to count signals: {}", e)))?;
        Ok(count)
    }

    /// Overwrite the raw ticket column. Only used to repair or inspect rows by hand.
    pub async fn set_raw_tickets(&self, id: i64, raw: Option<&str>) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE signals SET broker_tickets = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(raw)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryError(format!("Failed to set tickets: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::order::OrderType;
    use crate::persistence::init_database;

    fn new_signal(message_id: i64, status: SignalStatus) -> CreateSignal {
        CreateSignal {
            timestamp: Utc::now(),
            channel_id: "-1001".to_string(),
            channel_name: Some("Gold Room".to_string()),
            message_id,
            original_message: "Buy zone GOLD 3373/3374".to_string(),
            symbol: "GOLD".to_string(),
            order_type: Some(OrderType::Buy),
            entry_price: Some(3373.0),
            stop_loss: None,
            take_profits: vec![],
            comment: None,
            status,
        }
    }

    async fn repo() -> SignalRepository {
        SignalRepository::new(init_database("sqlite::memory:").await.unwrap())
    }

    #[tokio::test]
    async fn test_create_is_unique_per_message() {
        let repo = repo().await;

        let created = repo.create(new_signal(10, SignalStatus::PartialEntry)).await.unwrap();
        assert!(created.is_some());
        let duplicate = repo.create(new_signal(10, SignalStatus::New)).await.unwrap();
        assert!(duplicate.is_none());

        assert_eq!(repo.count_for_message("-1001", 10).await.unwrap(), 1);
        let stored = repo.find_by_message("-1001", 10).await.unwrap().unwrap();
        assert_eq!(stored.status, SignalStatus::PartialEntry);
        assert_eq!(stored.order_type, Some(OrderType::Buy));
    }

    #[tokio::test]
    async fn test_latest_partial_entry() {
        let repo = repo().await;
        repo.create(new_signal(1, SignalStatus::PartialEntry)).await.unwrap();
        let second = repo.create(new_signal(2, SignalStatus::PartialEntry)).await.unwrap().unwrap();
        repo.create(new_signal(3, SignalStatus::New)).await.unwrap();

        let latest = repo.latest_partial_entry("-1001", "GOLD").await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        assert!(repo.latest_partial_entry("-1001", "BTCUSD").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_levels_merges() {
        let repo = repo().await;
        let record = repo.create(new_signal(1, SignalStatus::PartialEntry)).await.unwrap().unwrap();

        repo.update_levels(
            record.id,
            UpdateLevels {
                stop_loss: Some(3370.0),
                take_profits: Some(vec![3390.0]),
                ..UpdateLevels::default()
            },
        )
        .await
        .unwrap();

        let updated = repo.get(record.id).await.unwrap().unwrap();
        assert_eq!(updated.entry_price, Some(3373.0));
        assert_eq!(updated.stop_loss, Some(3370.0));
        assert_eq!(updated.take_profits.0, vec![3390.0]);
    }

    #[tokio::test]
    async fn test_promote_partial_entry_only_once() {
        let repo = repo().await;
        let record = repo.create(new_signal(1, SignalStatus::PartialEntry)).await.unwrap().unwrap();
        let update = UpdateLevels {
            stop_loss: Some(3370.0),
            take_profits: Some(vec![3390.0]),
            ..UpdateLevels::default()
        };

        let promoted = repo.promote_partial_entry(record.id, update.clone()).await.unwrap().unwrap();
        assert_eq!(promoted.status, SignalStatus::New);
        assert_eq!(promoted.entry_price, Some(3373.0));
        assert_eq!(promoted.stop_loss, Some(3370.0));

        assert!(repo.promote_partial_entry(record.id, update).await.unwrap().is_none());
        assert!(repo.latest_partial_entry("-1001", "GOLD").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_follow_up_messages_are_recorded_once() {
        let repo = repo().await;
        let record = repo.create(new_signal(1, SignalStatus::PartialEntry)).await.unwrap().unwrap();

        assert!(repo.message_seen("-1001", 1).await.unwrap());
        assert!(!repo.message_seen("-1001", 2).await.unwrap());

        assert!(repo.record_follow_up("-1001", 2, record.id, "complete").await.unwrap());
        assert!(!repo.record_follow_up("-1001", 2, record.id, "complete").await.unwrap());
        assert!(repo.message_seen("-1001", 2).await.unwrap());
        assert!(!repo.message_seen("-1002", 2).await.unwrap());
        assert_eq!(repo.count_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ticket_lifecycle() {
        let repo = repo().await;
        let record = repo.create(new_signal(1, SignalStatus::New)).await.unwrap().unwrap();

        repo.set_executed(record.id, &[501, 502], SignalStatus::ProcessedActive, None)
            .await
            .unwrap();
        let managed = repo.get_actively_managed().await.unwrap();
        assert_eq!(managed.len(), 1);
        assert_eq!(managed[0].tickets().unwrap(), vec![501, 502]);

        assert!(repo.mark_breakeven(record.id).await.unwrap());
        assert!(!repo.mark_breakeven(record.id).await.unwrap());
        assert!(repo.get_actively_managed().await.unwrap().is_empty());

        repo.set_status(record.id, SignalStatus::Cancelled, Some("cancelled tickets [501, 502]"))
            .await
            .unwrap();
        let cancelled = repo.get(record.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, SignalStatus::Cancelled);
        assert_eq!(cancelled.broker_tickets, None);
    }

    #[tokio::test]
    async fn test_corrupt_tickets_are_quarantined() {
        let repo = repo().await;
        let record = repo.create(new_signal(1, SignalStatus::New)).await.unwrap().unwrap();
        repo.set_executed(record.id, &[7], SignalStatus::ProcessedActive, None)
            .await
            .unwrap();
        repo.set_raw_tickets(record.id, Some("7;8")).await.unwrap();

        let managed = repo.get_actively_managed().await.unwrap();
        let err = managed[0].tickets().unwrap_err();
        repo.mark_ticket_parse_error(record.id, &err.raw).await.unwrap();

        let stored = repo.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SignalStatus::ErrorTicketParse);
        assert_eq!(stored.broker_tickets, None);
        assert!(stored.comment.unwrap().contains("7;8"));
        assert!(repo.get_actively_managed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_executed_rejects_error_status() {
        let repo = repo().await;
        let record = repo.create(new_signal(1, SignalStatus::New)).await.unwrap().unwrap();
        assert!(repo
            .set_executed(record.id, &[1], SignalStatus::ErrorMt5, None)
            .await
            .is_err());
    }
}
