//! # Resolver monitor: the framework-wide rendezvous.
//!
//! [`Resolver`] is the single condition-variable-shaped monitor every
//! framework-wide "wait for state X" loop goes through: a caller dispatching a
//! lifecycle operation, the shutdown sequence waiting out a pending operation,
//! and `wait_for_stop`. It pairs a `tokio::sync::Mutex` with a `Notify` so a
//! waiter can atomically release the guard, sleep, and reacquire.
//!
//! Workers never hold the monitor while user code is on their stack; they only
//! call [`Resolver::notify_all`] to broadcast completion.
//!
//! Every wait site re-checks its predicate after waking, so the usual
//! condition-variable caveats (spurious wakeups, notify-before-wait) apply and
//! are handled: the `Notify` future is created while the guard is still held.

use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::time::{self, Instant};

pub(crate) type ResolverGuard<'a> = MutexGuard<'a, ()>;

pub(crate) struct Resolver {
    lock: Mutex<()>,
    cond: Notify,
}

impl Resolver {
    pub(crate) fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            cond: Notify::new(),
        }
    }

    /// Acquires the monitor.
    pub(crate) async fn lock(&self) -> ResolverGuard<'_> {
        self.lock.lock().await
    }

    /// Releases `guard`, sleeps until the next broadcast, reacquires.
    pub(crate) async fn wait<'a>(&'a self, guard: ResolverGuard<'a>) -> ResolverGuard<'a> {
        let notified = self.cond.notified();
        drop(guard);
        notified.await;
        self.lock.lock().await
    }

    /// Like [`Resolver::wait`] but gives up at `deadline`.
    ///
    /// Returns the reacquired guard and whether the deadline expired before a
    /// broadcast arrived.
    pub(crate) async fn wait_until<'a>(
        &'a self,
        guard: ResolverGuard<'a>,
        deadline: Instant,
    ) -> (ResolverGuard<'a>, bool) {
        let notified = self.cond.notified();
        drop(guard);
        let timed_out = time::timeout_at(deadline, notified).await.is_err();
        (self.lock.lock().await, timed_out)
    }

    /// Wakes every waiter currently parked on the monitor.
    ///
    /// Safe against lost wakeups only while the caller holds the guard; a
    /// notifier that does not should use [`Resolver::broadcast`].
    pub(crate) fn notify_all(&self) {
        self.cond.notify_waiters();
    }

    /// Acquires the monitor briefly, then wakes every waiter.
    ///
    /// This is the worker-side completion broadcast: taking the lock orders
    /// the notify after any in-progress predicate-check-and-register on the
    /// caller side, so the wakeup cannot fall into that gap.
    pub(crate) async fn broadcast(&self) {
        drop(self.lock.lock().await);
        self.cond.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn notify_wakes_a_parked_waiter() {
        let resolver = Arc::new(Resolver::new());
        let flag = Arc::new(AtomicBool::new(false));

        let waiter = {
            let resolver = Arc::clone(&resolver);
            let flag = Arc::clone(&flag);
            tokio::spawn(async move {
                let mut guard = resolver.lock().await;
                while !flag.load(Ordering::SeqCst) {
                    guard = resolver.wait(guard).await;
                }
            })
        };

        time::sleep(Duration::from_millis(20)).await;
        flag.store(true, Ordering::SeqCst);
        resolver.notify_all();
        waiter.await.expect("waiter completes");
    }

    #[tokio::test]
    async fn wait_until_reports_expiry() {
        let resolver = Resolver::new();
        let guard = resolver.lock().await;
        let deadline = Instant::now() + Duration::from_millis(10);
        let (_guard, timed_out) = resolver.wait_until(guard, deadline).await;
        assert!(timed_out);
    }
}
