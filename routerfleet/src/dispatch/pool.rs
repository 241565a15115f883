//! Bounded fan-out over a target list.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use log::{trace, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinError;

use crate::classify::{Failure, FailureKind};
use crate::target::Target;

/// Run `work` once per target with at most `limit` running at a time.
///
/// Results are returned in input order regardless of completion order. A
/// worker that panics yields a [`FailureKind::TaskFault`] for its slot
/// only. Each worker is a spawned task, so dropping the returned future
/// stops collecting results but lets in-flight workers run until their own
/// timeouts end them.
pub(crate) async fn fan_out<T, W, Fut>(targets: &[Target], limit: usize, work: W) -> Vec<Result<T, Failure>>
where
    W: Fn(usize, Target) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let total = targets.len();
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));

    let mut pending: FuturesUnordered<_> = targets
        .iter()
        .cloned()
        .enumerate()
        .map(|(index, target)| {
            let semaphore = semaphore.clone();
            let task = work(index, target);
            let handle = tokio::spawn(async move {
                // Never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                task.await
            });
            async move { (index, handle.await) }
        })
        .collect();

    let mut by_index: HashMap<usize, Result<T, Failure>> = HashMap::with_capacity(total);
    while let Some((index, joined)) = pending.next().await {
        trace!("worker {} of {} finished", index + 1, total);
        by_index.insert(index, joined.map_err(|e| task_fault(index, e)));
    }

    (0..total)
        .map(|index| {
            by_index
                .remove(&index)
                .unwrap_or_else(|| Err(Failure::new(FailureKind::TaskFault, "worker produced no result")))
        })
        .collect()
}

fn task_fault(index: usize, error: JoinError) -> Failure {
    let message = if error.is_panic() {
        let panic = error.into_panic();
        let detail = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        format!("Exception: {}", detail)
    } else {
        "Exception: worker cancelled".to_string()
    };
    warn!("worker for target {} faulted: {}", index, message);
    Failure::new(FailureKind::TaskFault, message)
}
