//! # Framework controller: the top-level state machine.
//!
//! The framework itself is bundle 0: same state enum, no activator, driven
//! exclusively from here. `stop` and `update` funnel into a shutdown sequence
//! on a dedicated task that stops every active bundle in reverse id order,
//! uninitializes the core in two phases, records the stop event exactly once,
//! and optionally replays `start`/`init` for an update.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::bundle::lifecycle::Bundle;
use crate::bundle::state::{
    AutostartSetting, BundleState, Operation, StartOptions, StopOptions, STATE_ACTIVE_SET,
    STATE_STOPPED_SET,
};
use crate::bundle::BundleContext;
use crate::config::FrameworkConfig;
use crate::core::context::CoreContext;
use crate::error::FrameworkError;
use crate::events::{BundleEvent, BundleEventKind, FrameworkEvent, FrameworkEventKind};
use crate::listeners::StagedEvent;

/// Stop-event slot, set exactly once per stop cycle.
#[derive(Clone, Debug)]
struct StopEvent {
    valid: bool,
    kind: FrameworkEventKind,
    message: Option<String>,
}

impl StopEvent {
    fn invalid() -> Self {
        Self {
            valid: false,
            kind: FrameworkEventKind::Error,
            message: None,
        }
    }
}

struct FrameworkShared {
    bundle: Bundle,
    stop_event: Mutex<StopEvent>,
    shutdown: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// A framework instance.
///
/// Cloneable handle; all clones drive the same instance. Construct with
/// [`Framework::new`], bring up with [`Framework::start`], take down with
/// [`Framework::stop`] + [`Framework::wait_for_stop`].
///
/// # Example
/// ```no_run
/// use std::collections::HashMap;
/// use bundlevisor::{FnActivator, Framework, StartOptions};
///
/// # async fn demo() -> Result<(), bundlevisor::FrameworkError> {
/// let framework = Framework::new(HashMap::new());
/// framework.start().await?;
///
/// let ctx = framework.bundle_context().expect("framework is active");
/// let bundle = ctx
///     .install_bundle("hello", || {
///         FnActivator::arc(
///             |_ctx| async { Ok(()) },
///             |_ctx| async { Ok(()) },
///         )
///     })
///     .await?;
/// bundle.start(StartOptions::default()).await?;
///
/// framework.stop().await?;
/// framework.wait_for_stop(std::time::Duration::ZERO).await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Framework {
    core: Arc<CoreContext>,
    shared: Arc<FrameworkShared>,
}

impl Framework {
    /// Creates a framework from an opaque property map (see
    /// [`FrameworkConfig`]). Nothing runs until [`Framework::init`] or
    /// [`Framework::start`].
    pub fn new(properties: HashMap<String, String>) -> Framework {
        let config = FrameworkConfig::from_properties(properties);
        info!(level = ?config.log_level, "framework created");
        let core = CoreContext::new(config);
        let bundle = Bundle::framework(Arc::downgrade(&core));
        core.bundles.insert_framework(bundle.clone());
        Framework {
            core,
            shared: Arc::new(FrameworkShared {
                bundle,
                stop_event: Mutex::new(StopEvent::invalid()),
                shutdown: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Current state of the framework bundle.
    pub fn state(&self) -> BundleState {
        self.shared.bundle.state()
    }

    /// The framework bundle's context, present from `init` until shutdown.
    pub fn bundle_context(&self) -> Option<BundleContext> {
        self.shared.bundle.context_handle()
    }

    /// Moves the framework to `STARTING` and brings up the core context.
    ///
    /// Legal from `INSTALLED | RESOLVED`; idempotent on `STARTING | ACTIVE`.
    pub async fn init(&self) -> Result<(), FrameworkError> {
        let mut guard = self.core.resolver.lock().await;
        guard = self.core.wait_on_operation(guard, &self.shared.bundle).await;
        match self.state() {
            BundleState::Installed | BundleState::Resolved => {}
            BundleState::Starting | BundleState::Active => return Ok(()),
            other => {
                return Err(FrameworkError::IllegalState {
                    expected: "INSTALLED|RESOLVED|STARTING|ACTIVE",
                    actual: other.to_string(),
                })
            }
        }
        self.shared.bundle.create_context(&self.core);
        self.shared.bundle.set_state(BundleState::Starting);
        self.core.init();
        drop(guard);
        debug!("framework initialized");
        Ok(())
    }

    /// Completes initialization and moves the framework to `ACTIVE`, firing
    /// `Starting` and `Started` bundle events, then relaunching bundles whose
    /// recorded autostart setting asks for it.
    pub async fn start(&self) -> Result<(), FrameworkError> {
        self.init().await?;
        let mut staged: Vec<StagedEvent> = Vec::new();
        {
            let mut guard = self.core.resolver.lock().await;
            guard = self.core.wait_on_operation(guard, &self.shared.bundle).await;
            match self.state() {
                BundleState::Active => return Ok(()),
                BundleState::Starting => {}
                other => {
                    return Err(FrameworkError::IllegalState {
                        expected: "STARTING",
                        actual: other.to_string(),
                    })
                }
            }
            self.shared.bundle.set_operation(Operation::Activating);
            staged.push(StagedEvent::Bundle(BundleEvent::new(
                BundleEventKind::Starting,
                0,
                self.shared.bundle.symbolic_name(),
            )));
            self.shared.bundle.set_state(BundleState::Active);
            self.shared.bundle.set_operation(Operation::Idle);
            staged.push(StagedEvent::Bundle(BundleEvent::new(
                BundleEventKind::Started,
                0,
                self.shared.bundle.symbolic_name(),
            )));
            staged.push(StagedEvent::Framework(FrameworkEvent::new(
                FrameworkEventKind::Started,
                0,
            )));
            self.core.resolver.notify_all();
            drop(guard);
        }
        self.core.listeners.fire_staged(staged).await;
        info!("framework active");
        self.start_autostarted_bundles().await;
        Ok(())
    }

    /// Stops the framework. Returns immediately; the shutdown sequence runs
    /// on a dedicated task observed through [`Framework::wait_for_stop`].
    pub async fn stop(&self) -> Result<(), FrameworkError> {
        self.shutdown(false).await;
        Ok(())
    }

    /// Stops and restarts the framework. The stop event records
    /// `StoppedUpdate`; bundles with a recorded autostart setting come back
    /// up with it.
    pub async fn update(&self) -> Result<(), FrameworkError> {
        self.shutdown(true).await;
        Ok(())
    }

    /// Waits for the current stop cycle to complete and returns its event.
    ///
    /// `timeout == 0` waits unbounded. When the timer expires first, the
    /// returned event is `WaitTimedOut` and the cycle keeps running. The
    /// shutdown task is joined before a recorded event is returned, so after
    /// an update the framework is fully restarted by the time this yields
    /// `StoppedUpdate`.
    pub async fn wait_for_stop(&self, timeout: Duration) -> FrameworkEvent {
        let mut guard = self.core.resolver.lock().await;
        // An unjoined shutdown task is a cycle nobody has observed yet; its
        // recorded (or imminent) event belongs to this caller. Without one,
        // a running framework means the caller wants the *next* cycle.
        let unobserved_cycle = self.shared.shutdown.lock().await.is_some();
        let framework_up = !self.state().is_in(STATE_STOPPED_SET);
        if framework_up && !unobserved_cycle {
            self.set_stop_event(StopEvent::invalid());
        }
        if !self.stop_event().valid {
            if !framework_up && !unobserved_cycle {
                // Stop or update never ran and the framework is already down.
                self.set_stop_event(StopEvent {
                    valid: true,
                    kind: FrameworkEventKind::Stopped,
                    message: None,
                });
            } else if timeout.is_zero() {
                while !self.stop_event().valid {
                    guard = self.core.resolver.wait(guard).await;
                }
            } else {
                let deadline = Instant::now() + timeout;
                while !self.stop_event().valid && Instant::now() < deadline {
                    guard = self.core.resolver.wait_until(guard, deadline).await.0;
                }
                if !self.stop_event().valid {
                    drop(guard);
                    return FrameworkEvent::new(FrameworkEventKind::WaitTimedOut, 0);
                }
            }
        }
        drop(guard);
        if let Some(handle) = self.shared.shutdown.lock().await.take() {
            let _ = handle.await;
        }
        let recorded = self.stop_event();
        let event = FrameworkEvent::new(recorded.kind, 0);
        match recorded.message {
            Some(message) => event.with_message(message),
            None => event,
        }
    }

    async fn shutdown(&self, restart: bool) {
        let guard = self.core.resolver.lock().await;
        match self.state() {
            BundleState::Installed | BundleState::Resolved => {
                // Nothing ran; just signal the slot.
                self.system_shutting_down_done(StopEvent {
                    valid: true,
                    kind: FrameworkEventKind::Stopped,
                    message: None,
                });
            }
            state @ (BundleState::Active | BundleState::Starting) => {
                let was_active = state == BundleState::Active;
                let mut slot = self.shared.shutdown.lock().await;
                // A live task means a cycle is in flight; a finished one is a
                // completed update whose handle can be replaced.
                if slot.as_ref().map_or(true, |handle| handle.is_finished()) {
                    // New cycle: whatever the slot held belongs to the past.
                    self.set_stop_event(StopEvent::invalid());
                    let framework = self.clone();
                    *slot = Some(tokio::spawn(async move {
                        framework.shutdown0(restart, was_active).await;
                    }));
                }
            }
            // Shutdown already in progress.
            BundleState::Stopping | BundleState::Uninstalled => {}
        }
        drop(guard);
    }

    async fn shutdown0(&self, restart: bool, was_active: bool) {
        let outcome: Result<(), FrameworkError> = async {
            {
                let mut guard = self.core.resolver.lock().await;
                guard = self.core.wait_on_operation(guard, &self.shared.bundle).await;
                self.shared.bundle.set_operation(Operation::Deactivating);
                self.shared.bundle.set_state(BundleState::Stopping);
                drop(guard);
            }
            self.core
                .listeners
                .fire_bundle_event(&BundleEvent::new(
                    BundleEventKind::Stopping,
                    0,
                    self.shared.bundle.symbolic_name(),
                ))
                .await;
            if was_active {
                self.stop_all_bundles().await;
            }
            self.core.uninit0().await;
            {
                let guard = self.core.resolver.lock().await;
                self.core.uninit1();
                self.system_shutting_down_done(StopEvent {
                    valid: true,
                    kind: if restart {
                        FrameworkEventKind::StoppedUpdate
                    } else {
                        FrameworkEventKind::Stopped
                    },
                    message: None,
                });
                drop(guard);
            }
            if restart {
                if was_active {
                    self.start().await?;
                } else {
                    self.init().await?;
                }
            }
            Ok(())
        }
        .await;

        if let Err(err) = outcome {
            error!(error = %err, "framework shutdown failed");
            let guard = self.core.resolver.lock().await;
            self.system_shutting_down_done(StopEvent {
                valid: true,
                kind: FrameworkEventKind::Error,
                message: Some(err.to_string()),
            });
            drop(guard);
        }
    }

    /// Stops every active bundle in reverse id order, reporting per-bundle
    /// failures without aborting the sweep, then forces all non-framework
    /// bundles back to `INSTALLED`.
    async fn stop_all_bundles(&self) {
        let mut active = self.core.bundles.active();
        active.reverse();
        for bundle in active {
            if bundle.id() == 0 || !bundle.state().is_in(STATE_ACTIVE_SET) {
                continue;
            }
            if let Err(err) = bundle.stop(StopOptions::TRANSIENT).await {
                error!(bundle = bundle.id(), error = %err, "bundle stop during shutdown failed");
                self.core
                    .listeners
                    .fire_framework_event(
                        &FrameworkEvent::new(FrameworkEventKind::Error, bundle.id())
                            .with_message(err.to_string()),
                    )
                    .await;
            }
        }
        let guard = self.core.resolver.lock().await;
        for bundle in self.core.bundles.snapshot() {
            if bundle.id() != 0 {
                bundle.set_state_installed();
            }
        }
        self.core.resolver.notify_all();
        drop(guard);
    }

    /// Relaunches bundles whose recorded autostart setting is "started",
    /// ascending id order. Per-bundle failures are reported, never fatal.
    async fn start_autostarted_bundles(&self) {
        for bundle in self.core.bundles.snapshot() {
            if bundle.id() == 0
                || bundle.autostart() != AutostartSetting::Started
                || bundle.state().is_in(STATE_ACTIVE_SET)
            {
                continue;
            }
            if let Err(err) = bundle.start(StartOptions::TRANSIENT).await {
                error!(bundle = bundle.id(), error = %err, "autostart failed");
                self.core
                    .listeners
                    .fire_framework_event(
                        &FrameworkEvent::new(FrameworkEventKind::Error, bundle.id())
                            .with_message(err.to_string()),
                    )
                    .await;
            }
        }
    }

    /// Records the stop event and parks the framework bundle in `RESOLVED`.
    /// Callers hold the resolver monitor.
    fn system_shutting_down_done(&self, event: StopEvent) {
        if self.state() != BundleState::Installed {
            self.shared.bundle.set_state(BundleState::Resolved);
            self.shared.bundle.set_operation(Operation::Idle);
            self.shared.bundle.invalidate_context();
            self.core.resolver.notify_all();
        }
        self.set_stop_event(event);
    }

    fn stop_event(&self) -> StopEvent {
        self.shared
            .stop_event
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_stop_event(&self, event: StopEvent) {
        *self
            .shared
            .stop_event
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = event;
    }
}
