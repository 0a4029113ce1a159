use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, Row, postgres::PgRow};
use uuid::Uuid;

use crate::event::validate_new_event;
use crate::metadata::Metadata;
use crate::store::{ClaimOutcome, OutboxStore, OutboxTransaction};
use crate::{
    AggregateId, EventId, OutboxError, OutboxEvent, OutboxQuery, OutboxStatus, Result,
    SagaStatusSummary,
};

const COLUMNS: &str = "id, event_id, aggregate_id, aggregate_type, event_type, event_version, \
     payload, metadata, tenant_id, project_id, created_at, processed_at, status, retry_count, \
     last_error, last_retry_at, claimed_at";

const UNIQUE_EVENT_ID: &str = "unique_outbox_event_id";

const RECLAIM_NOTE: &str = "claim expired: processing liveness window elapsed";

/// PostgreSQL-backed outbox store.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<OutboxEvent> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: Metadata = serde_json::from_value(metadata_json)?;
        let status: String = row.try_get("status")?;

        Ok(OutboxEvent {
            id: row.try_get("id")?,
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            event_type: row.try_get("event_type")?,
            event_version: row.try_get("event_version")?,
            payload: row.try_get("payload")?,
            metadata,
            tenant_id: row.try_get("tenant_id")?,
            project_id: row.try_get("project_id")?,
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
            status: status.parse()?,
            retry_count: row.try_get("retry_count")?,
            last_error: row.try_get("last_error")?,
            last_retry_at: row.try_get("last_retry_at")?,
            claimed_at: row.try_get("claimed_at")?,
        })
    }

    async fn exists(&self, event_id: EventId) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM outbox_events WHERE event_id = $1)")
                .bind(event_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn claim(&self, event_id: EventId, from: OutboxStatus) -> Result<ClaimOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'processing', claimed_at = NOW()
            WHERE event_id = $1 AND status = $2
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(ClaimOutcome::Claimed);
        }
        if self.exists(event_id).await? {
            Ok(ClaimOutcome::AlreadyClaimed)
        } else {
            Err(OutboxError::EventNotFound(event_id))
        }
    }

    async fn count_with_status(&self, status: OutboxStatus) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox_events WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

/// Producer transaction over PostgreSQL.
///
/// Aggregate writes go through [`connection`](PostgresTransaction::connection)
/// so that they commit or roll back together with the outbox rows.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    /// The connection of the open transaction.
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.tx
    }
}

#[async_trait]
impl OutboxTransaction for PostgresTransaction {
    #[tracing::instrument(skip(self, event), fields(event_id = %event.event_id, event_type = %event.event_type))]
    async fn save(&mut self, event: OutboxEvent) -> Result<()> {
        validate_new_event(&event)?;
        let metadata_json = serde_json::to_value(&event.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO outbox_events
                (event_id, aggregate_id, aggregate_type, event_type, event_version, payload,
                 metadata, tenant_id, project_id, created_at, status, retry_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', 0)
            "#,
        )
        .bind(event.event_id.as_uuid())
        .bind(event.aggregate_id.as_uuid())
        .bind(&event.aggregate_type)
        .bind(&event.event_type)
        .bind(event.event_version)
        .bind(&event.payload)
        .bind(metadata_json)
        .bind(&event.tenant_id)
        .bind(&event.project_id)
        .bind(event.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some(UNIQUE_EVENT_ID)
            {
                return OutboxError::DuplicateEvent(event.event_id);
            }
            OutboxError::Persistence(e)
        })?;

        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    type Transaction = PostgresTransaction;

    async fn begin(&self) -> Result<Self::Transaction> {
        Ok(PostgresTransaction {
            tx: self.pool.begin().await?,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn get_pending_events(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM outbox_events WHERE status = 'pending' \
             ORDER BY created_at ASC, id ASC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn mark_as_processing(&self, event_id: EventId) -> Result<ClaimOutcome> {
        self.claim(event_id, OutboxStatus::Pending).await
    }

    async fn claim_for_retry(&self, event_id: EventId) -> Result<ClaimOutcome> {
        self.claim(event_id, OutboxStatus::Failed).await
    }

    async fn mark_as_processed(&self, event_id: EventId) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'processed', processed_at = NOW(), claimed_at = NULL
            WHERE event_id = $1
            "#,
        )
        .bind(event_id.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::EventNotFound(event_id));
        }
        Ok(())
    }

    async fn mark_as_failed(&self, event_id: EventId, error_message: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'failed',
                retry_count = retry_count + 1,
                last_error = $2,
                last_retry_at = NOW(),
                claimed_at = NULL
            WHERE event_id = $1 AND status <> 'processed'
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        // Zero rows is either an unknown id or a row already delivered.
        if result.rows_affected() == 0 && !self.exists(event_id).await? {
            return Err(OutboxError::EventNotFound(event_id));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get_failed_events_for_retry(
        &self,
        max_retries: i32,
        retry_backoff: Duration,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM outbox_events \
             WHERE status = 'failed' AND retry_count < $1 \
               AND (last_retry_at IS NULL OR last_retry_at <= NOW() - make_interval(secs => $2)) \
             ORDER BY created_at ASC, id ASC LIMIT $3"
        ))
        .bind(max_retries)
        .bind(retry_backoff.as_secs_f64())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn reclaim_stale_processing(&self, liveness_window: Duration) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'pending', claimed_at = NULL, last_error = $2
            WHERE status = 'processing'
              AND (claimed_at IS NULL OR claimed_at <= NOW() - make_interval(secs => $1))
            "#,
        )
        .bind(liveness_window.as_secs_f64())
        .bind(RECLAIM_NOTE)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count_pending(&self) -> Result<u64> {
        self.count_with_status(OutboxStatus::Pending).await
    }

    async fn count_failed(&self) -> Result<u64> {
        self.count_with_status(OutboxStatus::Failed).await
    }

    #[tracing::instrument(skip(self))]
    async fn get_saga_events(&self, correlation_id: &str) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM outbox_events \
             WHERE metadata ->> 'correlation_id' = $1 \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(correlation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn get_saga_status(&self, correlation_id: &str) -> Result<SagaStatusSummary> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE status = 'processed') AS completed,
                   COUNT(*) FILTER (WHERE status = 'failed') AS failed
            FROM outbox_events
            WHERE metadata ->> 'correlation_id' = $1
            "#,
        )
        .bind(correlation_id)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let completed: i64 = row.try_get("completed")?;
        let failed: i64 = row.try_get("failed")?;
        Ok(SagaStatusSummary::from_counts(
            total as u64,
            completed as u64,
            failed as u64,
        ))
    }

    async fn query_events(&self, query: OutboxQuery) -> Result<Vec<OutboxEvent>> {
        let mut sql = format!("SELECT {COLUMNS} FROM outbox_events WHERE 1=1");
        let mut param_count = 0;

        if query.tenant_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND tenant_id = ${param_count}"));
        }
        if query.project_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND project_id = ${param_count}"));
        }
        if query.status.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ${param_count}"));
        }
        if query.event_type.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND event_type = ${param_count}"));
        }
        if query.aggregate_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND aggregate_id = ${param_count}"));
        }
        if query.from_created_at.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at >= ${param_count}"));
        }
        if query.to_created_at.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at <= ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at ASC, id ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);
        if let Some(tenant_id) = query.tenant_id {
            sqlx_query = sqlx_query.bind(tenant_id);
        }
        if let Some(project_id) = query.project_id {
            sqlx_query = sqlx_query.bind(project_id);
        }
        if let Some(status) = query.status {
            sqlx_query = sqlx_query.bind(status.as_str());
        }
        if let Some(event_type) = query.event_type {
            sqlx_query = sqlx_query.bind(event_type);
        }
        if let Some(id) = query.aggregate_id {
            sqlx_query = sqlx_query.bind(id.as_uuid());
        }
        if let Some(from) = query.from_created_at {
            sqlx_query = sqlx_query.bind(from);
        }
        if let Some(to) = query.to_created_at {
            sqlx_query = sqlx_query.bind(to);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_event).collect()
    }
}
