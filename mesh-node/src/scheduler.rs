//! Delayed rebroadcast steps keyed by query id; cancelling a query aborts its pending step.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use mesh_core::QueryId;
use tokio::task::AbortHandle;

#[derive(Default)]
pub struct RebroadcastScheduler {
    pending: Arc<Mutex<HashMap<QueryId, (u64, AbortHandle)>>>,
    next_token: AtomicU64,
}

impl RebroadcastScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `step` after `delay` unless `cancel(query_id)` is called first.
    /// A query has at most one pending step; scheduling again replaces it.
    pub fn schedule<F>(&self, query_id: QueryId, delay: Duration, step: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let pending = self.pending.clone();
        // Hold the lock across spawn so the task cannot deregister before it is registered.
        let mut map = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut map = pending.lock().unwrap_or_else(PoisonError::into_inner);
                match map.get(&query_id) {
                    Some((t, _)) if *t == token => {
                        map.remove(&query_id);
                    }
                    _ => return,
                }
            }
            step.await;
        });
        if let Some((_, old)) = map.insert(query_id, (token, handle.abort_handle())) {
            old.abort();
        }
    }

    /// Abort the pending step of `query_id`, if any. A step that already started runs to completion.
    pub fn cancel(&self, query_id: &QueryId) -> bool {
        let mut map = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match map.remove(query_id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn bump(c: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let c = c.clone();
        async move {
            c.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn step_fires_once_after_delay() {
        let s = RebroadcastScheduler::new();
        let fired = counter();
        s.schedule(QueryId::generate(), Duration::from_millis(10), bump(&fired));
        assert_eq!(s.pending(), 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(s.pending(), 0);
    }

    #[tokio::test]
    async fn cancelled_step_never_fires() {
        let s = RebroadcastScheduler::new();
        let fired = counter();
        let id = QueryId::generate();
        s.schedule(id, Duration::from_millis(30), bump(&fired));
        assert!(s.cancel(&id));
        assert!(!s.cancel(&id));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reschedule_replaces_pending_step() {
        let s = RebroadcastScheduler::new();
        let first = counter();
        let second = counter();
        let id = QueryId::generate();
        s.schedule(id, Duration::from_millis(30), bump(&first));
        s.schedule(id, Duration::from_millis(30), bump(&second));
        assert_eq!(s.pending(), 1);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
