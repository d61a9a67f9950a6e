use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use archcat_core::{ContextError, RequestContext, TenantId};
use archcat_events::HandlerError;

#[derive(Debug, Error)]
pub enum ReadModelError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("read model serialization failed: {0}")]
    Serialization(String),

    #[error("read model storage unavailable: {0}")]
    Unavailable(String),
}

impl From<ReadModelError> for HandlerError {
    fn from(value: ReadModelError) -> Self {
        match value {
            ReadModelError::Context(ctx) => HandlerError::Context(ctx),
            other => HandlerError::ReadModel(other.to_string()),
        }
    }
}

/// Keyset pagination request: up to `limit` rows with a key greater than `after`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page<K> {
    pub limit: usize,
    pub after: Option<K>,
}

impl<K> Page<K> {
    pub const DEFAULT_LIMIT: usize = 50;

    pub fn first(limit: usize) -> Self {
        Self { limit, after: None }
    }

    pub fn after(limit: usize, key: K) -> Self {
        Self {
            limit,
            after: Some(key),
        }
    }
}

impl<K> Default for Page<K> {
    fn default() -> Self {
        Self::first(Self::DEFAULT_LIMIT)
    }
}

/// Tenant-isolated key/value store for disposable read models.
///
/// Rows are soft-deleted: a deleted row is invisible to `get`, `list` and `page`, and
/// cannot be brought back by `upsert` or `update` (redelivering an old "created" event
/// after a delete must not resurrect it). Only `clear_tenant` removes rows physically.
pub trait TenantStore<K, V>: Send + Sync {
    fn get(&self, tenant_id: TenantId, key: &K) -> Result<Option<V>, ReadModelError>;

    /// Insert, or replace a live row.
    fn upsert(&self, tenant_id: TenantId, key: K, value: V) -> Result<(), ReadModelError>;

    /// Replace a live row. Returns `false` when there is none.
    fn update(&self, tenant_id: TenantId, key: &K, value: V) -> Result<bool, ReadModelError>;

    /// Set the soft-delete flag. Returns `false` when there is no live row.
    fn mark_deleted(&self, tenant_id: TenantId, key: &K) -> Result<bool, ReadModelError>;

    /// All live rows of a tenant, in key order.
    fn list(&self, tenant_id: TenantId) -> Result<Vec<V>, ReadModelError>;

    /// Live rows of a tenant in key order, starting after `page.after`.
    fn page(&self, tenant_id: TenantId, page: &Page<K>) -> Result<Vec<V>, ReadModelError>;

    /// Remove every row of a tenant, deleted ones included (rebuild support).
    fn clear_tenant(&self, tenant_id: TenantId) -> Result<(), ReadModelError>;

    /// [`TenantStore::get`] on behalf of a request: the tenant comes from `ctx` and the
    /// read fails with `DeadlineExceeded` once the context deadline has passed.
    ///
    /// Projection writes keep using the tenant-keyed methods; the event they apply is
    /// already committed, so they are not cut short by the caller's deadline.
    fn read(&self, ctx: &RequestContext, key: &K) -> Result<Option<V>, ReadModelError> {
        let tenant_id = ctx.tenant()?;
        ctx.check_deadline("read_model.get")?;
        self.get(tenant_id, key)
    }

    /// [`TenantStore::list`] bounded by the context deadline.
    fn read_all(&self, ctx: &RequestContext) -> Result<Vec<V>, ReadModelError> {
        let tenant_id = ctx.tenant()?;
        ctx.check_deadline("read_model.list")?;
        self.list(tenant_id)
    }

    /// [`TenantStore::page`] bounded by the context deadline.
    fn read_page(&self, ctx: &RequestContext, page: &Page<K>) -> Result<Vec<V>, ReadModelError> {
        let tenant_id = ctx.tenant()?;
        ctx.check_deadline("read_model.page")?;
        self.page(tenant_id, page)
    }
}

impl<K, V, S> TenantStore<K, V> for Arc<S>
where
    S: TenantStore<K, V> + ?Sized,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Result<Option<V>, ReadModelError> {
        (**self).get(tenant_id, key)
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) -> Result<(), ReadModelError> {
        (**self).upsert(tenant_id, key, value)
    }

    fn update(&self, tenant_id: TenantId, key: &K, value: V) -> Result<bool, ReadModelError> {
        (**self).update(tenant_id, key, value)
    }

    fn mark_deleted(&self, tenant_id: TenantId, key: &K) -> Result<bool, ReadModelError> {
        (**self).mark_deleted(tenant_id, key)
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<V>, ReadModelError> {
        (**self).list(tenant_id)
    }

    fn page(&self, tenant_id: TenantId, page: &Page<K>) -> Result<Vec<V>, ReadModelError> {
        (**self).page(tenant_id, page)
    }

    fn clear_tenant(&self, tenant_id: TenantId) -> Result<(), ReadModelError> {
        (**self).clear_tenant(tenant_id)
    }

    fn read(&self, ctx: &RequestContext, key: &K) -> Result<Option<V>, ReadModelError> {
        (**self).read(ctx, key)
    }

    fn read_all(&self, ctx: &RequestContext) -> Result<Vec<V>, ReadModelError> {
        (**self).read_all(ctx)
    }

    fn read_page(&self, ctx: &RequestContext, page: &Page<K>) -> Result<Vec<V>, ReadModelError> {
        (**self).read_page(ctx, page)
    }
}

#[derive(Debug, Clone)]
struct Row<V> {
    value: V,
    is_deleted: bool,
}

/// In-memory tenant-isolated store for tests/dev.
#[derive(Debug)]
pub struct InMemoryTenantStore<K, V> {
    inner: RwLock<BTreeMap<TenantId, BTreeMap<K, Row<V>>>>,
}

impl<K, V> InMemoryTenantStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryTenantStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> ReadModelError {
    ReadModelError::Unavailable("lock poisoned".to_string())
}

impl<K, V> TenantStore<K, V> for InMemoryTenantStore<K, V>
where
    K: Clone + Ord + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Result<Option<V>, ReadModelError> {
        let map = self.inner.read().map_err(poisoned)?;
        Ok(map
            .get(&tenant_id)
            .and_then(|rows| rows.get(key))
            .filter(|row| !row.is_deleted)
            .map(|row| row.value.clone()))
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) -> Result<(), ReadModelError> {
        let mut map = self.inner.write().map_err(poisoned)?;
        let rows = map.entry(tenant_id).or_default();
        match rows.get_mut(&key) {
            Some(row) if row.is_deleted => {}
            Some(row) => row.value = value,
            None => {
                rows.insert(
                    key,
                    Row {
                        value,
                        is_deleted: false,
                    },
                );
            }
        }
        Ok(())
    }

    fn update(&self, tenant_id: TenantId, key: &K, value: V) -> Result<bool, ReadModelError> {
        let mut map = self.inner.write().map_err(poisoned)?;
        match map
            .get_mut(&tenant_id)
            .and_then(|rows| rows.get_mut(key))
        {
            Some(row) if !row.is_deleted => {
                row.value = value;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn mark_deleted(&self, tenant_id: TenantId, key: &K) -> Result<bool, ReadModelError> {
        let mut map = self.inner.write().map_err(poisoned)?;
        match map
            .get_mut(&tenant_id)
            .and_then(|rows| rows.get_mut(key))
        {
            Some(row) if !row.is_deleted => {
                row.is_deleted = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<V>, ReadModelError> {
        let map = self.inner.read().map_err(poisoned)?;
        Ok(map
            .get(&tenant_id)
            .map(|rows| {
                rows.values()
                    .filter(|row| !row.is_deleted)
                    .map(|row| row.value.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn page(&self, tenant_id: TenantId, page: &Page<K>) -> Result<Vec<V>, ReadModelError> {
        use std::ops::Bound;

        let map = self.inner.read().map_err(poisoned)?;
        let Some(rows) = map.get(&tenant_id) else {
            return Ok(vec![]);
        };
        let lower = match &page.after {
            Some(key) => Bound::Excluded(key.clone()),
            None => Bound::Unbounded,
        };
        Ok(rows
            .range((lower, Bound::Unbounded))
            .filter(|(_, row)| !row.is_deleted)
            .take(page.limit)
            .map(|(_, row)| row.value.clone())
            .collect())
    }

    fn clear_tenant(&self, tenant_id: TenantId) -> Result<(), ReadModelError> {
        let mut map = self.inner.write().map_err(poisoned)?;
        map.remove(&tenant_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryTenantStore<u32, String> {
        InMemoryTenantStore::new()
    }

    #[test]
    fn rows_are_tenant_scoped() {
        let store = store();
        let (t1, t2) = (TenantId::new(), TenantId::new());
        store.upsert(t1, 1, "one".to_string()).unwrap();
        store.upsert(t2, 1, "uno".to_string()).unwrap();

        assert_eq!(store.get(t1, &1).unwrap().as_deref(), Some("one"));
        assert_eq!(store.get(t2, &1).unwrap().as_deref(), Some("uno"));

        store.clear_tenant(t1).unwrap();
        assert_eq!(store.get(t1, &1).unwrap(), None);
        assert_eq!(store.list(t2).unwrap(), vec!["uno".to_string()]);
    }

    #[test]
    fn soft_deleted_rows_stay_deleted() {
        let store = store();
        let t = TenantId::new();
        store.upsert(t, 1, "one".to_string()).unwrap();

        assert!(store.mark_deleted(t, &1).unwrap());
        assert!(!store.mark_deleted(t, &1).unwrap());
        assert_eq!(store.get(t, &1).unwrap(), None);

        store.upsert(t, 1, "again".to_string()).unwrap();
        assert!(!store.update(t, &1, "again".to_string()).unwrap());
        assert_eq!(store.get(t, &1).unwrap(), None);
        assert!(store.list(t).unwrap().is_empty());
    }

    #[test]
    fn update_requires_an_existing_row() {
        let store = store();
        let t = TenantId::new();
        assert!(!store.update(t, &9, "nine".to_string()).unwrap());
        assert_eq!(store.get(t, &9).unwrap(), None);
    }

    #[test]
    fn pages_in_key_order_skipping_deleted_rows() {
        let store = store();
        let t = TenantId::new();
        for k in [5, 1, 4, 2, 3] {
            store.upsert(t, k, k.to_string()).unwrap();
        }
        store.mark_deleted(t, &2).unwrap();

        assert_eq!(store.page(t, &Page::first(2)).unwrap(), vec!["1", "3"]);
        assert_eq!(store.page(t, &Page::after(2, 3)).unwrap(), vec!["4", "5"]);
        assert!(store.page(t, &Page::after(2, 5)).unwrap().is_empty());
    }

    #[test]
    fn request_reads_honor_tenant_and_deadline() {
        use std::time::{Duration, Instant};

        let store = store();
        let t = TenantId::new();
        store.upsert(t, 1, "one".to_string()).unwrap();

        let ctx = RequestContext::for_tenant(t).with_timeout(Duration::from_secs(30));
        assert_eq!(store.read(&ctx, &1).unwrap().as_deref(), Some("one"));
        assert_eq!(store.read_all(&ctx).unwrap(), vec!["one".to_string()]);

        let expired = RequestContext::for_tenant(t).with_deadline(Instant::now());
        assert!(matches!(
            store.read(&expired, &1),
            Err(ReadModelError::Context(ContextError::DeadlineExceeded("read_model.get")))
        ));
        assert!(matches!(
            store.read_page(&expired, &Page::first(10)),
            Err(ReadModelError::Context(ContextError::DeadlineExceeded("read_model.page")))
        ));
        assert!(matches!(
            store.read_all(&RequestContext::without_tenant()),
            Err(ReadModelError::Context(ContextError::MissingTenant))
        ));
    }

    mod proptest_tests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn paging_visits_every_live_row_once(
                keys in proptest::collection::btree_set(0u32..500, 0..60),
                deleted in proptest::collection::btree_set(0u32..500, 0..20),
                limit in 1usize..8,
            ) {
                let store: InMemoryTenantStore<u32, u32> = InMemoryTenantStore::new();
                let t = TenantId::new();
                for k in &keys {
                    store.upsert(t, *k, *k).unwrap();
                }
                for k in &deleted {
                    store.mark_deleted(t, k).unwrap();
                }

                let mut seen = Vec::new();
                let mut page = Page::first(limit);
                loop {
                    let rows = store.page(t, &page).unwrap();
                    prop_assert!(rows.len() <= limit);
                    let Some(last) = rows.last().copied() else { break };
                    seen.extend(rows);
                    page = Page::after(limit, last);
                }

                let live: Vec<u32> = keys.difference(&deleted).copied().collect();
                prop_assert_eq!(seen, live);
            }
        }
    }
}
