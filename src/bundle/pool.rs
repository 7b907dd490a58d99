//! # Worker pool: live workers plus zombies awaiting a join.
//!
//! Two sequences behind one mutex. Checkout pops the front of `live` so the
//! most recently used worker is reused first; a worker that sat idle for a
//! keep-alive period migrates itself to `zombies`, where shutdown joins it.
//! A disowned worker (hung activator) is in neither list.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use crate::bundle::worker::BundleWorker;
use crate::core::context::CoreContext;

#[derive(Default)]
struct PoolInner {
    live: VecDeque<Arc<BundleWorker>>,
    zombies: Vec<Arc<BundleWorker>>,
}

pub(crate) struct WorkerPool {
    inner: Mutex<PoolInner>,
}

impl WorkerPool {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// Hands out a live worker, spawning a fresh one if none is available.
    pub(crate) fn checkout(&self, core: &Arc<CoreContext>) -> Arc<BundleWorker> {
        let reused = self.lock().live.pop_front();
        reused.unwrap_or_else(|| BundleWorker::spawn(core))
    }

    /// Returns a worker for reuse, at the head of the live list.
    pub(crate) fn release(&self, worker: &Arc<BundleWorker>) {
        self.lock().live.push_front(Arc::clone(worker));
    }

    /// Migrates `worker` from `live` to `zombies`.
    ///
    /// Fails (returns false) when the worker is not in `live` anymore, which
    /// means a concurrent dispatch checked it out; the worker must keep
    /// serving in that case.
    pub(crate) fn retire(&self, worker: &Arc<BundleWorker>) -> bool {
        let mut inner = self.lock();
        let position = inner.live.iter().position(|w| Arc::ptr_eq(w, worker));
        match position.and_then(|index| inner.live.remove(index)) {
            Some(worker) => {
                inner.zombies.push(worker);
                true
            }
            None => false,
        }
    }

    /// Terminates and joins every live worker.
    pub(crate) async fn quit_all(&self) {
        let live: Vec<Arc<BundleWorker>> = self.lock().live.drain(..).collect();
        for worker in live {
            worker.quit().await;
        }
    }

    /// Joins every retired worker.
    pub(crate) async fn drain_zombies(&self) {
        let zombies: Vec<Arc<BundleWorker>> = std::mem::take(&mut self.lock().zombies);
        for worker in zombies {
            worker.join().await;
        }
    }

    pub(crate) fn live_len(&self) -> usize {
        self.lock().live.len()
    }

    pub(crate) fn zombie_len(&self) -> usize {
        self.lock().zombies.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
