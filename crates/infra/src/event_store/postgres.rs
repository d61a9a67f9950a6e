//! Postgres-backed event store implementation.
//!
//! Schema: `migrations/0001_event_store.sql`.
//!
//! ## Error mapping
//!
//! | SQLx error | PostgreSQL code | EventStoreError | Scenario |
//! |------------|-----------------|-----------------|----------|
//! | Database (unique violation on insert) | `23505` | `Concurrency` | A concurrent append won the race for the same version |
//! | Database (other) | any other | `Unavailable` | Constraint, permission or SQL errors |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Unavailable` | Connection problems |
//!
//! ## Thread safety
//!
//! `PostgresEventStore` is `Send + Sync` and cheap to clone; it shares the sqlx pool.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{instrument, Span};

use archcat_core::{AggregateId, ContextError, ExpectedVersion, RequestContext, TenantId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
use crate::blocking;

/// Postgres-backed append-only event store.
///
/// ## Tenant isolation
///
/// Every statement filters on `tenant_id`, and every transaction sets
/// `app.current_tenant` so the row-level security policies on `events` apply as well.
///
/// ## Optimistic concurrency
///
/// `save_events` runs one transaction that:
/// 1. reads the current stream version (`MAX(version)`)
/// 2. compares it with `expected_version`
/// 3. inserts the batch with consecutive versions
///
/// If another transaction commits between steps 1 and 3, the unique constraint on
/// `(tenant_id, aggregate_id, version)` rejects the insert and the whole batch is rolled
/// back as a concurrency error.
///
/// ## Deadlines
///
/// The synchronous `EventStore` calls stop waiting once the context deadline passes.
/// A timeout that fires while COMMIT is in flight cannot tell whether the batch landed:
/// the caller gets `DeadlineExceeded` even though the events may be durable, and
/// `PublishingEventStore` skips publication for them. The log stays authoritative; the
/// next load sees the events, a retried command fails with `Concurrency`, and a
/// projection replay brings the read models up to date.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresEventStore {
    /// `runtime` must be a handle to the (multi-threaded) runtime that drives `pool`.
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(
        skip(self, events),
        fields(
            tenant_id = %tenant_id,
            aggregate_id = %aggregate_id,
            event_count = events.len(),
            expected_version = ?expected_version,
            committed_events
        ),
        err
    )]
    pub async fn append_events(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        set_tenant(&mut tx, tenant_id).await?;

        let current_version = check_stream_version(&mut tx, tenant_id, aggregate_id).await?;
        if !expected_version.matches(current_version) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(EventStoreError::Concurrency {
                aggregate_id,
                expected: expected_version,
                actual: current_version,
            });
        }

        let mut stored_events = Vec::with_capacity(events.len());
        let mut next_version = current_version + 1;

        for event in events {
            let row = sqlx::query(
                r#"
                INSERT INTO events (
                    event_id,
                    tenant_id,
                    aggregate_id,
                    event_type,
                    event_data,
                    schema_version,
                    version,
                    occurred_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING id
                "#,
            )
            .bind(event.event_id)
            .bind(tenant_id.as_uuid())
            .bind(aggregate_id.as_uuid())
            .bind(&event.event_type)
            .bind(&event.event_data)
            .bind(event.schema_version as i32)
            .bind(next_version as i64)
            .bind(event.occurred_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    EventStoreError::Concurrency {
                        aggregate_id,
                        expected: expected_version,
                        actual: next_version,
                    }
                } else {
                    map_sqlx_error("insert_event", e)
                }
            })?;

            let id: i64 = row
                .try_get("id")
                .map_err(|e| map_sqlx_error("insert_event", e))?;

            stored_events.push(StoredEvent {
                id: id as u64,
                event_id: event.event_id,
                tenant_id,
                aggregate_id,
                event_type: event.event_type,
                schema_version: event.schema_version,
                version: next_version,
                occurred_at: event.occurred_at,
                event_data: event.event_data,
            });
            next_version += 1;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("committed_events", stored_events.len());
        Ok(stored_events)
    }

    /// Load a stream in version order. Empty when the stream does not exist.
    #[instrument(
        skip(self),
        fields(tenant_id = %tenant_id, aggregate_id = %aggregate_id, event_count),
        err
    )]
    pub async fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        set_tenant(&mut tx, tenant_id).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, event_id, tenant_id, aggregate_id, event_type, event_data,
                   schema_version, version, occurred_at, created_at
            FROM events
            WHERE tenant_id = $1 AND aggregate_id = $2
            ORDER BY version ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(aggregate_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        let events = decode_rows(rows)?;
        Span::current().record("event_count", events.len());
        Ok(events)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    pub async fn load_tenant_log(
        &self,
        tenant_id: TenantId,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        set_tenant(&mut tx, tenant_id).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, event_id, tenant_id, aggregate_id, event_type, event_data,
                   schema_version, version, occurred_at, created_at
            FROM events
            WHERE tenant_id = $1 AND id > $2
            ORDER BY id ASC
            LIMIT $3
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(i64::try_from(after_id).unwrap_or(i64::MAX))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_tenant_log", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        decode_rows(rows)
    }

    fn block<F, T>(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        fut: F,
    ) -> Result<T, EventStoreError>
    where
        F: std::future::Future<Output = Result<T, EventStoreError>>,
    {
        ctx.check_deadline(operation)?;
        blocking::run_with_deadline(&self.runtime, ctx.remaining(), fut)
            .ok_or(EventStoreError::Context(ContextError::DeadlineExceeded(
                operation,
            )))?
    }
}

/// Scope the transaction to a tenant for the row-level security policies.
async fn set_tenant(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
) -> Result<(), EventStoreError> {
    sqlx::query("SELECT set_config('app.current_tenant', $1, true)")
        .bind(tenant_id.to_string())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("set_tenant", e))?;
    Ok(())
}

/// Current version of a stream (0 if it does not exist).
async fn check_stream_version(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
) -> Result<u64, EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(MAX(version), 0) AS current_version
        FROM events
        WHERE tenant_id = $1 AND aggregate_id = $2
        "#,
    )
    .bind(tenant_id.as_uuid())
    .bind(aggregate_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_stream_version", e))?;

    let current_version: i64 = row
        .try_get("current_version")
        .map_err(|e| map_sqlx_error("check_stream_version", e))?;
    Ok(current_version as u64)
}

fn decode_rows(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<StoredEvent>, EventStoreError> {
    rows.iter()
        .map(|row| {
            StoredEventRow::from_row(row)
                .map(StoredEvent::from)
                .map_err(|e| {
                    EventStoreError::Serialization(format!("failed to decode event row: {e}"))
                })
        })
        .collect()
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => EventStoreError::Unavailable(format!(
            "database error in {operation} ({}): {}",
            db_err.code().as_deref().unwrap_or("-"),
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            EventStoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            EventStoreError::Unavailable(format!("connection pool timed out in {operation}"))
        }
        _ => EventStoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

#[derive(Debug)]
struct StoredEventRow {
    id: i64,
    event_id: uuid::Uuid,
    tenant_id: uuid::Uuid,
    aggregate_id: uuid::Uuid,
    event_type: String,
    event_data: serde_json::Value,
    schema_version: i32,
    version: i64,
    occurred_at: DateTime<Utc>,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredEventRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEventRow {
            id: row.try_get("id")?,
            event_id: row.try_get("event_id")?,
            tenant_id: row.try_get("tenant_id")?,
            aggregate_id: row.try_get("aggregate_id")?,
            event_type: row.try_get("event_type")?,
            event_data: row.try_get("event_data")?,
            schema_version: row.try_get("schema_version")?,
            version: row.try_get("version")?,
            occurred_at: row.try_get("occurred_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl From<StoredEventRow> for StoredEvent {
    fn from(row: StoredEventRow) -> Self {
        StoredEvent {
            id: row.id as u64,
            event_id: row.event_id,
            tenant_id: TenantId::from_uuid(row.tenant_id),
            aggregate_id: AggregateId::from_uuid(row.aggregate_id),
            event_type: row.event_type,
            schema_version: row.schema_version as u32,
            version: row.version as u64,
            occurred_at: row.occurred_at,
            event_data: row.event_data,
        }
    }
}

impl EventStore for PostgresEventStore {
    fn save_events(
        &self,
        ctx: &RequestContext,
        aggregate_id: AggregateId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let tenant_id = ctx.tenant()?;
        self.block(
            ctx,
            "save_events",
            self.append_events(tenant_id, aggregate_id, events, expected_version),
        )
    }

    fn get_events(
        &self,
        ctx: &RequestContext,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let tenant_id = ctx.tenant()?;
        self.block(ctx, "get_events", self.load_stream(tenant_id, aggregate_id))
    }

    fn get_tenant_events(
        &self,
        ctx: &RequestContext,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let tenant_id = ctx.tenant()?;
        self.block(
            ctx,
            "get_tenant_events",
            self.load_tenant_log(tenant_id, after_id, limit),
        )
    }
}
