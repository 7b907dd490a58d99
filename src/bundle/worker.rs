//! # Bundle worker: serialized activator execution with timeout and abort.
//!
//! One worker drives at most one bundle operation at a time. The caller side
//! publishes an opcode and sleeps on the framework's resolver monitor; the
//! worker task wakes, runs the user callback, publishes the outcome into a
//! single-assignment result slot and broadcasts completion. The split lets the
//! framework bound the call in wall-clock time and abandon it without leaving
//! the bundle state half-mutated: a hung activator keeps its (detached) task,
//! the framework keeps the bundle.
//!
//! ```text
//!   caller                        worker task
//!     │ publish opcode, notify      │
//!     │──────────────────────────►  │ dispatch: listeners / start0 / stop1
//!     │ wait on resolver            │   (catch_unwind around user code)
//!     │   - result set? done        │
//!     │   - uninstalled? abort      │
//!     │   - budget gone? abort      │ result.set(..)
//!     │ ◄──────────────────────────│ resolver.notify_all()
//! ```
//!
//! An idle worker retires itself into the pool's zombie list after one
//! keep-alive period, freeing the task without disturbing a concurrent
//! dispatch.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bundle::lifecycle::Bundle;
use crate::bundle::state::{Aborted, BundleState, Operation};
use crate::core::context::CoreContext;
use crate::core::resolver::ResolverGuard;
use crate::error::{FrameworkError, LifecycleOp};
use crate::events::BundleEvent;
use crate::listeners::StagedEvent;

/// Pending operation dispatched to a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Opcode {
    Idle = 0,
    BundleEvent = 1,
    Start = 2,
    Stop = 3,
}

impl Opcode {
    fn from_u8(raw: u8) -> Opcode {
        match raw {
            0 => Opcode::Idle,
            1 => Opcode::BundleEvent,
            2 => Opcode::Start,
            3 => Opcode::Stop,
            other => unreachable!("invalid opcode {other}"),
        }
    }
}

/// Single-assignment carrier for one operation's outcome.
///
/// The caller never blocks on the slot itself; the resolver monitor is the
/// only wait object. First assignment wins, so a worker concluding late
/// cannot clobber the marker an aborting caller already planted.
pub(crate) struct ResultSlot {
    value: Mutex<Option<Option<FrameworkError>>>,
}

impl ResultSlot {
    fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    pub(crate) fn unset(&self) {
        *self.lock() = None;
    }

    pub(crate) fn set(&self, outcome: Option<FrameworkError>) -> bool {
        let mut slot = self.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        true
    }

    pub(crate) fn is_set(&self) -> bool {
        self.lock().is_some()
    }

    pub(crate) fn take(&self) -> Option<FrameworkError> {
        self.lock().take().flatten()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Option<FrameworkError>>> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
struct Pending {
    bundle: Option<Bundle>,
    event: Option<BundleEvent>,
}

/// Dedicated executor for one bundle operation at a time.
pub(crate) struct BundleWorker {
    core: Weak<CoreContext>,
    opcode: AtomicU8,
    pending: Mutex<Pending>,
    wake: Notify,
    cancel: CancellationToken,
    result: ResultSlot,
    join: Mutex<Option<JoinHandle<()>>>,
    keep_alive: std::time::Duration,
}

impl BundleWorker {
    /// Spawns a fresh worker task.
    pub(crate) fn spawn(core: &Arc<CoreContext>) -> Arc<BundleWorker> {
        let worker = Arc::new(BundleWorker {
            core: Arc::downgrade(core),
            opcode: AtomicU8::new(Opcode::Idle as u8),
            pending: Mutex::new(Pending::default()),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
            result: ResultSlot::new(),
            join: Mutex::new(None),
            keep_alive: core.config.keep_alive,
        });
        let handle = tokio::spawn(Arc::clone(&worker).run());
        *lock(&worker.join) = Some(handle);
        worker
    }

    pub(crate) fn opcode(&self) -> Opcode {
        Opcode::from_u8(self.opcode.load(Ordering::SeqCst))
    }

    fn set_opcode(&self, op: Opcode) {
        self.opcode.store(op as u8, Ordering::SeqCst);
    }

    /// True iff the worker is currently delivering a bundle event; used by the
    /// listener hub to detect reentrant delivery.
    pub(crate) fn is_executing_bundle_changed(&self) -> bool {
        self.opcode() == Opcode::BundleEvent
    }

    /// Orderly termination: cancel, wake, join. Idempotent.
    pub(crate) async fn quit(&self) {
        self.cancel.cancel();
        self.wake.notify_one();
        let handle = lock(&self.join).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Disowns a worker whose user callback may never return: cancel, wake,
    /// drop the handle. The task stays quarantined until the callback ends;
    /// the framework keeps no handle to it.
    pub(crate) fn quit_detached(&self) {
        self.cancel.cancel();
        self.wake.notify_one();
        drop(lock(&self.join).take());
    }

    /// Joins a retired worker (its loop has returned or is about to).
    pub(crate) async fn join(&self) {
        let handle = lock(&self.join).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Delivers a bundle event to synchronous listeners on this worker,
    /// waiting without a deadline for completion.
    pub(crate) async fn call_bundle_changed<'a>(
        self: Arc<Self>,
        core: &'a CoreContext,
        bundle: &Bundle,
        event: BundleEvent,
        guard: ResolverGuard<'a>,
    ) -> (ResolverGuard<'a>, Option<FrameworkError>, Vec<StagedEvent>) {
        self.start_and_wait(core, bundle, Opcode::BundleEvent, Some(event), guard)
            .await
    }

    /// Runs the activator start entry under the configured budget.
    pub(crate) async fn call_start0<'a>(
        self: Arc<Self>,
        core: &'a CoreContext,
        bundle: &Bundle,
        guard: ResolverGuard<'a>,
    ) -> (ResolverGuard<'a>, Option<FrameworkError>, Vec<StagedEvent>) {
        self.start_and_wait(core, bundle, Opcode::Start, None, guard)
            .await
    }

    /// Runs the activator stop entry under the configured budget.
    pub(crate) async fn call_stop1<'a>(
        self: Arc<Self>,
        core: &'a CoreContext,
        bundle: &Bundle,
        guard: ResolverGuard<'a>,
    ) -> (ResolverGuard<'a>, Option<FrameworkError>, Vec<StagedEvent>) {
        self.start_and_wait(core, bundle, Opcode::Stop, None, guard)
            .await
    }

    /// Caller side of one operation. Entered with the resolver monitor held;
    /// the guard is released while sleeping and handed back on return.
    async fn start_and_wait<'a>(
        self: Arc<Self>,
        core: &'a CoreContext,
        bundle: &Bundle,
        op: Opcode,
        event: Option<BundleEvent>,
        mut guard: ResolverGuard<'a>,
    ) -> (ResolverGuard<'a>, Option<FrameworkError>, Vec<StagedEvent>) {
        let lifecycle = matches!(op, Opcode::Start | Opcode::Stop);
        if lifecycle {
            // Cleared before the opcode is visible, so the worker's
            // conclusion CAS always races against a fresh flag.
            bundle.set_aborted(Aborted::No);
        }
        self.result.unset();
        {
            let mut pending = lock(&self.pending);
            if self.opcode() != Opcode::Idle {
                // A pending opcode is never clobbered.
                let err = FrameworkError::IllegalState {
                    expected: "idle worker",
                    actual: format!("{:?}", self.opcode()),
                };
                return (guard, Some(err), Vec::new());
            }
            pending.bundle = Some(bundle.clone());
            pending.event = event;
            self.set_opcode(op);
        }
        bundle.set_worker(Arc::downgrade(&self));
        self.wake.notify_one();

        let budget = core.config.start_stop_timeout;
        let deadline = (lifecycle && !budget.is_zero()).then(|| Instant::now() + budget);
        let mut timed_out = false;
        let mut uninstalled = false;

        loop {
            if lifecycle
                && bundle.state() == BundleState::Uninstalled
                && !self.result.is_set()
            {
                uninstalled = true;
                self.result.set(None);
            }
            if let Some(deadline) = deadline {
                let mid_op = (op == Opcode::Start && bundle.state() == BundleState::Starting)
                    || (op == Opcode::Stop && bundle.state() == BundleState::Stopping);
                if Instant::now() >= deadline && mid_op && !self.result.is_set() {
                    timed_out = true;
                    self.result.set(None);
                }
            }
            if self.result.is_set() {
                break;
            }
            guard = match deadline {
                Some(deadline) if Instant::now() < deadline => {
                    core.resolver.wait_until(guard, deadline).await.0
                }
                _ => core.resolver.wait(guard).await,
            };
        }

        let id = bundle.id();
        let lop = if op == Opcode::Stop {
            LifecycleOp::Stop
        } else {
            LifecycleOp::Start
        };

        if lifecycle
            && (timed_out || uninstalled)
            && bundle.aborted() == Aborted::No
            && bundle.try_abort()
        {
            // The worker is still inside the activator; disown it.
            info!(bundle = id, op = %lop, "bundle worker disowned, quarantining activator");
            let staged = if timed_out {
                match op {
                    Opcode::Start => bundle.start_failed(core),
                    _ => {
                        bundle.drop_activator();
                        bundle.stop2(core)
                    }
                }
            } else {
                // The uninstaller owns the terminal state; just release the
                // operation tag so it can proceed.
                bundle.set_operation(Operation::Idle);
                core.resolver.notify_all();
                Vec::new()
            };
            self.quit_detached();
            bundle.reset_worker();
            let err = if timed_out {
                FrameworkError::Timeout {
                    id,
                    op: lop,
                    timeout: budget,
                }
            } else {
                FrameworkError::UninstalledDuring { id, op: lop }
            };
            return (guard, Some(err), staged);
        }

        // Finished within budget: hand the worker back for reuse.
        core.threads.release(&self);
        bundle.reset_worker();
        (guard, self.result.take(), Vec::new())
    }

    /// The worker task loop.
    async fn run(self: Arc<Self>) {
        loop {
            // Idle wait with keep-alive self-retirement.
            loop {
                if self.cancel.is_cancelled() {
                    return;
                }
                if self.opcode() != Opcode::Idle {
                    break;
                }
                let notified = self.wake.notified();
                if self.opcode() != Opcode::Idle {
                    break;
                }
                if self.cancel.is_cancelled() {
                    return;
                }
                if time::timeout(self.keep_alive, notified).await.is_err() {
                    if self.cancel.is_cancelled() {
                        return;
                    }
                    if self.opcode() != Opcode::Idle {
                        break;
                    }
                    match self.core.upgrade() {
                        // Retirement fails if a dispatch checked us out in the
                        // meantime; keep serving in that case.
                        Some(core) => {
                            if core.threads.retire(&self) {
                                debug!("idle bundle worker retired");
                                return;
                            }
                        }
                        None => return,
                    }
                }
            }
            if self.cancel.is_cancelled() {
                return;
            }

            let (op, bundle, event) = {
                let mut pending = lock(&self.pending);
                (self.opcode(), pending.bundle.take(), pending.event.take())
            };
            let Some(core) = self.core.upgrade() else {
                return;
            };

            let failure = match (op, &bundle) {
                (Opcode::BundleEvent, _) => {
                    if let Some(event) = event {
                        core.listeners.fire_bundle_event(&event).await;
                    }
                    None
                }
                (Opcode::Start, Some(bundle)) => bundle.start0(&core).await,
                (Opcode::Stop, Some(bundle)) => bundle.stop1(&core).await,
                _ => None,
            };

            self.set_opcode(Opcode::Idle);
            self.result.set(failure);
            core.resolver.broadcast().await;
        }
    }
}

/// Runs a user activator future with panic capture, mapping both error
/// returns and panics into [`FrameworkError::ActivatorFailed`].
pub(crate) async fn run_activator<F>(id: u64, op: LifecycleOp, fut: F) -> Option<FrameworkError>
where
    F: std::future::Future<Output = Result<(), crate::error::ActivatorError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(FrameworkError::ActivatorFailed {
            id,
            op,
            reason: err.to_string(),
        }),
        Err(payload) => Some(FrameworkError::ActivatorFailed {
            id,
            op,
            reason: format!("panicked: {}", crate::listeners::panic_message(payload)),
        }),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_slot_is_single_assignment() {
        let slot = ResultSlot::new();
        assert!(!slot.is_set());
        assert!(slot.set(None));
        assert!(!slot.set(Some(FrameworkError::NotFound {
            what: "late result".into()
        })));
        assert!(slot.is_set());
        assert!(slot.take().is_none());
        assert!(!slot.is_set());
    }

    #[test]
    fn result_slot_unset_allows_reuse() {
        let slot = ResultSlot::new();
        slot.set(Some(FrameworkError::NotFound { what: "x".into() }));
        slot.unset();
        assert!(slot.set(None));
    }

    #[test]
    fn opcodes_round_trip() {
        for op in [Opcode::Idle, Opcode::BundleEvent, Opcode::Start, Opcode::Stop] {
            assert_eq!(Opcode::from_u8(op as u8), op);
        }
    }
}
