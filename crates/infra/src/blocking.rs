//! Sync bridge for the sqlx-backed adapters.
//!
//! Store and read-model traits are synchronous (request-per-worker, blocking IO), while
//! sqlx is async. Adapters keep a handle to the tokio runtime that owns their pool and
//! block on it here.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;

/// Run `fut` to completion on `handle`.
///
/// From a runtime worker thread this goes through `block_in_place`, which requires a
/// multi-threaded runtime. From any other thread it blocks directly.
pub(crate) fn run<F: Future>(handle: &Handle, fut: F) -> F::Output {
    match Handle::try_current() {
        Ok(_) => tokio::task::block_in_place(|| handle.block_on(fut)),
        Err(_) => handle.block_on(fut),
    }
}

/// Like [`run`], but gives up once `limit` elapses (`None` waits forever).
pub(crate) fn run_with_deadline<F: Future>(
    handle: &Handle,
    limit: Option<Duration>,
    fut: F,
) -> Option<F::Output> {
    match limit {
        None => Some(run(handle, fut)),
        Some(limit) => run(handle, async move { tokio::time::timeout(limit, fut).await.ok() }),
    }
}
