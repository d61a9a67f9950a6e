//! Postgres-backed tenant store implementation.
//!
//! All read models share the `read_models` table (see `migrations/0001_event_store.sql`):
//! one JSONB document per `(tenant_id, model, key)` plus the `is_deleted` flag.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::{instrument, Span};

use archcat_core::{AggregateId, ContextError, RequestContext, TenantId};

use super::tenant_store::{Page, ReadModelError, TenantStore};
use crate::blocking;

/// JSONB document store for one read model, keyed by aggregate id.
///
/// ## Tenant isolation
///
/// Every statement includes `tenant_id` in its WHERE clause or primary key, so one
/// tenant can never read or overwrite another tenant's rows.
///
/// ## Deadlines
///
/// The request-scoped reads (`read`, `read_all`, `read_page`) run under the context's
/// remaining time and fail with `DeadlineExceeded` when it runs out. The tenant-keyed
/// methods used by projectors wait for the database.
///
/// ## Deterministic rebuilds
///
/// `clear_tenant` physically removes a tenant's rows for this model, after which a replay
/// of the tenant's log rebuilds them.
pub struct PostgresTenantStore<V> {
    pool: Arc<PgPool>,
    runtime: Handle,
    model: &'static str,
    _value: PhantomData<fn() -> V>,
}

impl<V> PostgresTenantStore<V> {
    /// `model` names the read model inside the shared table (e.g. "components.catalog").
    pub fn new(pool: PgPool, runtime: Handle, model: &'static str) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
            model,
            _value: PhantomData,
        }
    }

    pub fn model(&self) -> &'static str {
        self.model
    }
}

impl<V> Clone for PostgresTenantStore<V> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            runtime: self.runtime.clone(),
            model: self.model,
            _value: PhantomData,
        }
    }
}

impl<V> core::fmt::Debug for PostgresTenantStore<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PostgresTenantStore")
            .field("model", &self.model)
            .finish()
    }
}

impl<V> PostgresTenantStore<V>
where
    V: Serialize + DeserializeOwned,
{
    fn encode(value: &V) -> Result<JsonValue, ReadModelError> {
        serde_json::to_value(value).map_err(|e| ReadModelError::Serialization(e.to_string()))
    }

    fn decode(data: JsonValue) -> Result<V, ReadModelError> {
        serde_json::from_value(data).map_err(|e| ReadModelError::Serialization(e.to_string()))
    }

    fn decode_rows(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<V>, ReadModelError> {
        rows.into_iter()
            .map(|row| {
                let data: JsonValue = row.try_get("data").map_err(map_sqlx_error)?;
                Self::decode(data)
            })
            .collect()
    }

    #[instrument(skip(self), fields(model = self.model, tenant_id = %tenant_id, found))]
    async fn fetch(&self, tenant_id: TenantId, key: AggregateId) -> Result<Option<V>, ReadModelError> {
        let row = sqlx::query(
            r#"
            SELECT data FROM read_models
            WHERE tenant_id = $1 AND model = $2 AND key = $3 AND NOT is_deleted
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(self.model)
        .bind(key.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Span::current().record("found", row.is_some());
        row.map(|r| {
            let data: JsonValue = r.try_get("data").map_err(map_sqlx_error)?;
            Self::decode(data)
        })
        .transpose()
    }

    #[instrument(skip(self), fields(model = self.model, tenant_id = %tenant_id, rows))]
    async fn fetch_all(&self, tenant_id: TenantId) -> Result<Vec<V>, ReadModelError> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM read_models
            WHERE tenant_id = $1 AND model = $2 AND NOT is_deleted
            ORDER BY key ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(self.model)
        .fetch_all(&*self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Span::current().record("rows", rows.len());
        Self::decode_rows(rows)
    }

    async fn fetch_page(
        &self,
        tenant_id: TenantId,
        page: &Page<AggregateId>,
    ) -> Result<Vec<V>, ReadModelError> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM read_models
            WHERE tenant_id = $1 AND model = $2 AND NOT is_deleted
              AND ($3::uuid IS NULL OR key > $3)
            ORDER BY key ASC
            LIMIT $4
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(self.model)
        .bind(page.after.map(|k| *k.as_uuid()))
        .bind(i64::try_from(page.limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Self::decode_rows(rows)
    }

    /// Block on `fut` for at most the time left in `ctx`.
    fn block_within<T, F>(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        fut: F,
    ) -> Result<T, ReadModelError>
    where
        F: Future<Output = Result<T, ReadModelError>>,
    {
        ctx.check_deadline(operation)?;
        blocking::run_with_deadline(&self.runtime, ctx.remaining(), fut)
            .ok_or(ReadModelError::Context(ContextError::DeadlineExceeded(
                operation,
            )))?
    }

    async fn write(
        &self,
        sql: &'static str,
        tenant_id: TenantId,
        key: AggregateId,
        data: Option<JsonValue>,
    ) -> Result<u64, ReadModelError> {
        let mut query = sqlx::query(sql)
            .bind(tenant_id.as_uuid())
            .bind(self.model)
            .bind(key.as_uuid());
        if let Some(data) = data {
            query = query.bind(data);
        }
        let result = query.execute(&*self.pool).await.map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}

const UPSERT: &str = r#"
    INSERT INTO read_models (tenant_id, model, key, data)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (tenant_id, model, key)
    DO UPDATE SET data = EXCLUDED.data, updated_at = NOW()
    WHERE NOT read_models.is_deleted
"#;

const UPDATE: &str = r#"
    UPDATE read_models SET data = $4, updated_at = NOW()
    WHERE tenant_id = $1 AND model = $2 AND key = $3 AND NOT is_deleted
"#;

const MARK_DELETED: &str = r#"
    UPDATE read_models SET is_deleted = TRUE, updated_at = NOW()
    WHERE tenant_id = $1 AND model = $2 AND key = $3 AND NOT is_deleted
"#;

impl<V> TenantStore<AggregateId, V> for PostgresTenantStore<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn get(&self, tenant_id: TenantId, key: &AggregateId) -> Result<Option<V>, ReadModelError> {
        blocking::run(&self.runtime, self.fetch(tenant_id, *key))
    }

    fn upsert(&self, tenant_id: TenantId, key: AggregateId, value: V) -> Result<(), ReadModelError> {
        let data = Self::encode(&value)?;
        blocking::run(&self.runtime, self.write(UPSERT, tenant_id, key, Some(data)))?;
        Ok(())
    }

    fn update(&self, tenant_id: TenantId, key: &AggregateId, value: V) -> Result<bool, ReadModelError> {
        let data = Self::encode(&value)?;
        let affected = blocking::run(&self.runtime, self.write(UPDATE, tenant_id, *key, Some(data)))?;
        Ok(affected > 0)
    }

    fn mark_deleted(&self, tenant_id: TenantId, key: &AggregateId) -> Result<bool, ReadModelError> {
        let affected = blocking::run(&self.runtime, self.write(MARK_DELETED, tenant_id, *key, None))?;
        Ok(affected > 0)
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<V>, ReadModelError> {
        blocking::run(&self.runtime, self.fetch_all(tenant_id))
    }

    fn page(&self, tenant_id: TenantId, page: &Page<AggregateId>) -> Result<Vec<V>, ReadModelError> {
        blocking::run(&self.runtime, self.fetch_page(tenant_id, page))
    }

    fn clear_tenant(&self, tenant_id: TenantId) -> Result<(), ReadModelError> {
        blocking::run(&self.runtime, async {
            sqlx::query("DELETE FROM read_models WHERE tenant_id = $1 AND model = $2")
                .bind(tenant_id.as_uuid())
                .bind(self.model)
                .execute(&*self.pool)
                .await
                .map_err(map_sqlx_error)
        })?;
        Ok(())
    }

    fn read(&self, ctx: &RequestContext, key: &AggregateId) -> Result<Option<V>, ReadModelError> {
        let tenant_id = ctx.tenant()?;
        self.block_within(ctx, "read_model.get", self.fetch(tenant_id, *key))
    }

    fn read_all(&self, ctx: &RequestContext) -> Result<Vec<V>, ReadModelError> {
        let tenant_id = ctx.tenant()?;
        self.block_within(ctx, "read_model.list", self.fetch_all(tenant_id))
    }

    fn read_page(
        &self,
        ctx: &RequestContext,
        page: &Page<AggregateId>,
    ) -> Result<Vec<V>, ReadModelError> {
        let tenant_id = ctx.tenant()?;
        self.block_within(ctx, "read_model.page", self.fetch_page(tenant_id, page))
    }
}

fn map_sqlx_error(err: sqlx::Error) -> ReadModelError {
    match err {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            ReadModelError::Serialization(err.to_string())
        }
        _ => ReadModelError::Unavailable(err.to_string()),
    }
}
