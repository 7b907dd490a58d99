//! # Bundle: per-bundle record and the caller side of the state machine.
//!
//! [`Bundle`] is a cheap-clone handle over the framework's record for one
//! installed unit. Lifecycle entry points (`start`, `stop`, `uninstall`) run
//! on the caller's task under the resolver monitor and dispatch the activator
//! callbacks to a bundle worker; the commit paths (`start0`, `stop1`, `stop2`,
//! `start_failed`) run on the worker so success and failure are post-processed
//! on a single task.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, error};

use crate::bundle::activator::{ActivatorFactory, BundleActivator};
use crate::bundle::context::BundleContext;
use crate::bundle::state::{
    Aborted, AutostartSetting, BundleState, Operation, StartOptions, StopOptions, STATE_ACTIVE_SET,
};
use crate::bundle::worker::{run_activator, BundleWorker};
use crate::core::context::CoreContext;
use crate::error::{FrameworkError, LifecycleOp};
use crate::events::{BundleEvent, BundleEventKind, FrameworkEvent, FrameworkEventKind};
use crate::listeners::StagedEvent;

/// Symbolic name of the framework bundle (id 0).
pub const SYSTEM_BUNDLE: &str = "system.bundle";

pub(crate) struct BundleInner {
    id: u64,
    symbolic_name: String,
    state: AtomicU32,
    operation: AtomicU8,
    aborted: AtomicU8,
    autostart: AtomicU8,
    core: Weak<CoreContext>,
    /// None only for the framework bundle, which has no activator.
    factory: Option<ActivatorFactory>,
    activator: Mutex<Option<Arc<dyn BundleActivator>>>,
    context: Mutex<Option<BundleContext>>,
    /// Back-reference to the worker currently driving this bundle.
    worker: Mutex<Weak<BundleWorker>>,
}

/// Handle to one installed bundle.
///
/// Cloneable; all clones refer to the same record.
#[derive(Clone)]
pub struct Bundle {
    inner: Arc<BundleInner>,
}

impl Bundle {
    pub(crate) fn new(
        id: u64,
        symbolic_name: &str,
        factory: ActivatorFactory,
        core: Weak<CoreContext>,
    ) -> Bundle {
        Bundle {
            inner: Arc::new(BundleInner {
                id,
                symbolic_name: symbolic_name.to_string(),
                state: AtomicU32::new(BundleState::Installed.bits()),
                operation: AtomicU8::new(Operation::Idle as u8),
                aborted: AtomicU8::new(Aborted::None as u8),
                autostart: AtomicU8::new(AutostartSetting::Stopped as u8),
                core,
                factory: Some(factory),
                activator: Mutex::new(None),
                context: Mutex::new(None),
                worker: Mutex::new(Weak::new()),
            }),
        }
    }

    /// The framework bundle: id 0, no activator, driven by the controller.
    pub(crate) fn framework(core: Weak<CoreContext>) -> Bundle {
        Bundle {
            inner: Arc::new(BundleInner {
                id: 0,
                symbolic_name: SYSTEM_BUNDLE.to_string(),
                state: AtomicU32::new(BundleState::Installed.bits()),
                operation: AtomicU8::new(Operation::Idle as u8),
                aborted: AtomicU8::new(Aborted::None as u8),
                autostart: AtomicU8::new(AutostartSetting::Stopped as u8),
                core,
                factory: None,
                activator: Mutex::new(None),
                context: Mutex::new(None),
                worker: Mutex::new(Weak::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<BundleInner>) -> Bundle {
        Bundle { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<BundleInner> {
        Arc::downgrade(&self.inner)
    }

    /// The bundle's unique id; 0 is the framework bundle.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The bundle's symbolic name.
    pub fn symbolic_name(&self) -> &str {
        &self.inner.symbolic_name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BundleState {
        BundleState::from_bits(self.inner.state.load(Ordering::SeqCst))
    }

    fn is_framework(&self) -> bool {
        self.inner.id == 0
    }

    /// Starts the bundle: resolve if needed, then run the activator's `start`
    /// on a worker under the configured budget.
    ///
    /// Idempotent on `ACTIVE`. A non-transient start records the autostart
    /// setting consulted when the framework (re)starts.
    pub async fn start(&self, options: StartOptions) -> Result<(), FrameworkError> {
        let core = self.core()?;
        self.reject_framework_bundle()?;
        if !options.contains(StartOptions::TRANSIENT) {
            self.set_autostart(AutostartSetting::Started);
        }
        let mut guard = core.resolver.lock().await;
        guard = core.wait_on_operation(guard, self).await;
        match self.state() {
            BundleState::Active => return Ok(()),
            BundleState::Installed => {
                self.set_operation(Operation::Resolving);
                self.set_state(BundleState::Resolved);
                self.set_operation(Operation::Idle);
            }
            BundleState::Resolved => {}
            other => {
                return Err(FrameworkError::IllegalState {
                    expected: "INSTALLED|RESOLVED|ACTIVE",
                    actual: other.to_string(),
                })
            }
        }
        self.set_operation(Operation::Activating);
        self.create_context(&core);
        self.set_state(BundleState::Starting);
        let worker = core.threads.checkout(&core);
        let (guard, failure, staged) = worker.call_start0(&core, self, guard).await;
        drop(guard);
        core.listeners.fire_staged(staged).await;
        match failure {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Stops the bundle: run the activator's `stop` on a worker under the
    /// configured budget, then land in `RESOLVED` whatever the outcome.
    ///
    /// A no-op when the bundle is not active.
    pub async fn stop(&self, options: StopOptions) -> Result<(), FrameworkError> {
        let core = self.core()?;
        self.reject_framework_bundle()?;
        if !options.contains(StopOptions::TRANSIENT) {
            self.set_autostart(AutostartSetting::Stopped);
        }
        let mut guard = core.resolver.lock().await;
        guard = core.wait_on_operation(guard, self).await;
        match self.state() {
            BundleState::Installed | BundleState::Resolved => return Ok(()),
            BundleState::Starting | BundleState::Active => {}
            other => {
                return Err(FrameworkError::IllegalState {
                    expected: "STARTING|ACTIVE",
                    actual: other.to_string(),
                })
            }
        }
        self.set_operation(Operation::Deactivating);
        self.set_state(BundleState::Stopping);
        let worker = core.threads.checkout(&core);
        let (guard, failure, staged) = worker.call_stop1(&core, self, guard).await;
        drop(guard);
        core.listeners.fire_staged(staged).await;
        match failure {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Uninstalls the bundle, forcing any in-flight start/stop to abort.
    ///
    /// `UNINSTALLED` is terminal: the bundle leaves the registry and accepts
    /// no further transitions.
    pub async fn uninstall(&self) -> Result<(), FrameworkError> {
        let core = self.core()?;
        self.reject_framework_bundle()?;
        let mut guard = core.resolver.lock().await;
        if self.operation() == Operation::Idle && self.state().is_in(STATE_ACTIVE_SET) {
            drop(guard);
            if let Err(err) = self.stop(StopOptions::TRANSIENT).await {
                error!(bundle = self.id(), error = %err, "stop before uninstall failed");
                core.listeners
                    .fire_framework_event(
                        &FrameworkEvent::new(FrameworkEventKind::Error, self.id())
                            .with_message(err.to_string()),
                    )
                    .await;
            }
            guard = core.resolver.lock().await;
        }
        let previous = self.swap_state(BundleState::Uninstalled);
        if previous == BundleState::Uninstalled {
            return Err(FrameworkError::IllegalState {
                expected: "non-terminal state",
                actual: BundleState::Uninstalled.to_string(),
            });
        }
        core.resolver.notify_all();
        // A disowned in-flight operation releases its tag on the way out.
        guard = core.wait_on_operation(guard, self).await;
        self.set_operation(Operation::Uninstalling);
        self.drop_activator();
        self.invalidate_context();
        core.bundles.remove(self.id());
        let event = BundleEvent::new(BundleEventKind::Uninstalled, self.id(), self.symbolic_name());
        let guard = core.post_bundle_event_locked(self, event, guard).await;
        self.set_operation(Operation::Idle);
        core.resolver.notify_all();
        drop(guard);
        debug!(bundle = self.id(), "bundle uninstalled");
        Ok(())
    }

    // ---- worker-side commit paths ----

    /// Runs on the worker: fire `Starting`, run the activator, commit
    /// `ACTIVE` or unwind through [`Bundle::start_failed`].
    pub(crate) async fn start0(&self, core: &CoreContext) -> Option<FrameworkError> {
        core.listeners
            .fire_bundle_event(&BundleEvent::new(
                BundleEventKind::Starting,
                self.id(),
                self.symbolic_name(),
            ))
            .await;

        let activator = self.inner.factory.as_ref().map(|factory| {
            let activator = factory();
            *lock(&self.inner.activator) = Some(Arc::clone(&activator));
            activator
        });
        let failure = match (activator, self.context_handle()) {
            (Some(activator), Some(ctx)) => {
                run_activator(self.id(), LifecycleOp::Start, activator.start(ctx)).await
            }
            _ => None,
        };

        if !self.conclude_lifecycle() {
            // The caller disowned this operation; nothing here may commit.
            debug!(bundle = self.id(), "start concluded after abandonment, discarding");
            return failure;
        }

        match failure {
            None => {
                if self.compare_and_set_state(BundleState::Starting, BundleState::Active) {
                    self.set_operation(Operation::Idle);
                    core.listeners
                        .fire_bundle_event(&BundleEvent::new(
                            BundleEventKind::Started,
                            self.id(),
                            self.symbolic_name(),
                        ))
                        .await;
                    None
                } else {
                    // A terminal state raced in underneath; do not commit.
                    self.set_operation(Operation::Idle);
                    Some(FrameworkError::UninstalledDuring {
                        id: self.id(),
                        op: LifecycleOp::Start,
                    })
                }
            }
            Some(err) => {
                error!(bundle = %self.symbolic_name(), error = %err, "activator start failed");
                let staged = self.start_failed(core);
                core.listeners.fire_staged(staged).await;
                Some(err)
            }
        }
    }

    /// Runs on the worker: fire `Stopping`, run the activator, then complete
    /// through [`Bundle::stop2`] whatever the outcome.
    pub(crate) async fn stop1(&self, core: &CoreContext) -> Option<FrameworkError> {
        core.listeners
            .fire_bundle_event(&BundleEvent::new(
                BundleEventKind::Stopping,
                self.id(),
                self.symbolic_name(),
            ))
            .await;

        let activator = lock(&self.inner.activator).clone();
        let failure = match (activator, self.context_handle()) {
            (Some(activator), Some(ctx)) => {
                run_activator(self.id(), LifecycleOp::Stop, activator.stop(ctx)).await
            }
            _ => None,
        };

        if !self.conclude_lifecycle() {
            debug!(bundle = self.id(), "stop concluded after abandonment, discarding");
            return failure;
        }
        if let Some(err) = &failure {
            error!(bundle = %self.symbolic_name(), error = %err, "activator stop failed");
        }
        // Success or failure, the bundle lands in RESOLVED.
        let staged = self.stop2(core);
        core.listeners.fire_staged(staged).await;
        failure
    }

    /// Final stop cleanup: drop the activator, withdraw the bundle's
    /// services, invalidate the context, land in `RESOLVED`.
    pub(crate) fn stop2(&self, core: &CoreContext) -> Vec<StagedEvent> {
        self.drop_activator();
        self.invalidate_context();
        self.compare_and_set_state(BundleState::Stopping, BundleState::Resolved);
        self.set_operation(Operation::Idle);
        let mut staged: Vec<StagedEvent> = core
            .services
            .unregister_bundle(self.id())
            .into_iter()
            .map(StagedEvent::Service)
            .collect();
        staged.push(StagedEvent::Bundle(BundleEvent::new(
            BundleEventKind::Stopped,
            self.id(),
            self.symbolic_name(),
        )));
        core.resolver.notify_all();
        staged
    }

    /// Cleanup after a failed (or timed-out) start: like an orderly stop that
    /// never ran the activator, announced as `Stopping` then `Stopped`.
    pub(crate) fn start_failed(&self, core: &CoreContext) -> Vec<StagedEvent> {
        self.drop_activator();
        self.invalidate_context();
        self.compare_and_set_state(BundleState::Starting, BundleState::Resolved);
        self.set_operation(Operation::Idle);
        let mut staged: Vec<StagedEvent> = core
            .services
            .unregister_bundle(self.id())
            .into_iter()
            .map(StagedEvent::Service)
            .collect();
        staged.push(StagedEvent::Bundle(BundleEvent::new(
            BundleEventKind::Stopping,
            self.id(),
            self.symbolic_name(),
        )));
        staged.push(StagedEvent::Bundle(BundleEvent::new(
            BundleEventKind::Stopped,
            self.id(),
            self.symbolic_name(),
        )));
        core.resolver.notify_all();
        staged
    }

    /// Shutdown sweep: force the bundle back to `INSTALLED` without events.
    /// Terminal bundles are left alone.
    pub(crate) fn set_state_installed(&self) {
        if self.state() == BundleState::Uninstalled {
            return;
        }
        self.drop_activator();
        self.invalidate_context();
        self.set_operation(Operation::Idle);
        self.set_state(BundleState::Installed);
    }

    // ---- shared-word accessors ----

    pub(crate) fn set_state(&self, state: BundleState) {
        self.inner.state.store(state.bits(), Ordering::SeqCst);
    }

    pub(crate) fn swap_state(&self, state: BundleState) -> BundleState {
        BundleState::from_bits(self.inner.state.swap(state.bits(), Ordering::SeqCst))
    }

    pub(crate) fn compare_and_set_state(&self, from: BundleState, to: BundleState) -> bool {
        self.inner
            .state
            .compare_exchange(from.bits(), to.bits(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn operation(&self) -> Operation {
        Operation::from_u8(self.inner.operation.load(Ordering::SeqCst))
    }

    pub(crate) fn set_operation(&self, operation: Operation) {
        self.inner.operation.store(operation as u8, Ordering::SeqCst);
    }

    pub(crate) fn aborted(&self) -> Aborted {
        Aborted::from_u8(self.inner.aborted.load(Ordering::SeqCst))
    }

    pub(crate) fn set_aborted(&self, aborted: Aborted) {
        self.inner.aborted.store(aborted as u8, Ordering::SeqCst);
    }

    /// Caller gives up on a pending operation. Exactly one of
    /// [`Bundle::try_abort`] and [`Bundle::conclude_lifecycle`] wins.
    pub(crate) fn try_abort(&self) -> bool {
        self.inner
            .aborted
            .compare_exchange(
                Aborted::No as u8,
                Aborted::Yes as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Worker concluded a pending operation; false when the caller already
    /// abandoned it and the worker must discard its outcome.
    pub(crate) fn conclude_lifecycle(&self) -> bool {
        self.inner
            .aborted
            .compare_exchange(
                Aborted::No as u8,
                Aborted::None as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    pub(crate) fn autostart(&self) -> AutostartSetting {
        match self.inner.autostart.load(Ordering::SeqCst) {
            0 => AutostartSetting::Stopped,
            _ => AutostartSetting::Started,
        }
    }

    pub(crate) fn set_autostart(&self, setting: AutostartSetting) {
        self.inner.autostart.store(setting as u8, Ordering::SeqCst);
    }

    // ---- owned collaborators ----

    pub(crate) fn create_context(&self, core: &Arc<CoreContext>) {
        *lock(&self.inner.context) = Some(BundleContext::new(self, core));
    }

    pub(crate) fn context_handle(&self) -> Option<BundleContext> {
        lock(&self.inner.context).clone()
    }

    pub(crate) fn invalidate_context(&self) {
        if let Some(ctx) = lock(&self.inner.context).take() {
            ctx.invalidate();
        }
    }

    pub(crate) fn drop_activator(&self) {
        lock(&self.inner.activator).take();
    }

    pub(crate) fn set_worker(&self, worker: Weak<BundleWorker>) {
        *lock(&self.inner.worker) = worker;
    }

    pub(crate) fn worker(&self) -> Option<Arc<BundleWorker>> {
        lock(&self.inner.worker).upgrade()
    }

    pub(crate) fn reset_worker(&self) {
        *lock(&self.inner.worker) = Weak::new();
    }

    fn core(&self) -> Result<Arc<CoreContext>, FrameworkError> {
        self.inner.core.upgrade().ok_or(FrameworkError::IllegalState {
            expected: "running framework",
            actual: "framework dropped".to_string(),
        })
    }

    fn reject_framework_bundle(&self) -> Result<(), FrameworkError> {
        if self.is_framework() {
            return Err(FrameworkError::IllegalState {
                expected: "non-framework bundle",
                actual: format!("bundle #{}", self.id()),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("id", &self.id())
            .field("name", &self.symbolic_name())
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
