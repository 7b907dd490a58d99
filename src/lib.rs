//! # bundlevisor
//!
//! **Bundlevisor** is a single-process dynamic bundle runtime: it installs,
//! resolves, starts, stops and uninstalls self-describing code units called
//! *bundles*, and lets them publish and consume strongly-typed *services*
//! through a shared registry. Bundles come and go at runtime; consumers learn
//! about service churn through event listeners.
//!
//! ## Features
//!
//! | Area           | Description                                                       | Key types / traits                             |
//! |----------------|-------------------------------------------------------------------|------------------------------------------------|
//! | **Lifecycle**  | Install/start/stop/uninstall with timeout and abort semantics.    | [`Framework`], [`Bundle`], [`BundleActivator`] |
//! | **Services**   | Typed publication and lookup with properties and prototype scope. | [`ServiceRegistration`], [`ServiceReference`]  |
//! | **Events**     | Bundle, service and framework events with stable ordering.        | [`BundleEvent`], [`ServiceEvent`]              |
//! | **Listeners**  | Panic-isolated synchronous fan-out, filterable for services.      | [`BundleListener`], [`ServiceListener`]        |
//! | **Errors**     | Typed errors for lifecycle and registry failures.                 | [`FrameworkError`]                             |
//! | **Config**     | Opaque property map with a few recognized keys.                   | [`FrameworkConfig`]                            |
//!
//! ## Example
//! ```no_run
//! use std::collections::HashMap;
//! use std::time::Duration;
//! use bundlevisor::{FnActivator, Framework, StartOptions, StopOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), bundlevisor::FrameworkError> {
//!     let framework = Framework::new(HashMap::new());
//!     framework.start().await?;
//!
//!     let ctx = framework.bundle_context().expect("framework is active");
//!     let greeter = ctx
//!         .install_bundle("greeter", || {
//!             FnActivator::arc(
//!                 |_ctx| async {
//!                     println!("greeter up");
//!                     Ok(())
//!                 },
//!                 |_ctx| async {
//!                     println!("greeter down");
//!                     Ok(())
//!                 },
//!             )
//!         })
//!         .await?;
//!
//!     greeter.start(StartOptions::default()).await?;
//!     greeter.stop(StopOptions::default()).await?;
//!
//!     framework.stop().await?;
//!     framework.wait_for_stop(Duration::ZERO).await;
//!     Ok(())
//! }
//! ```
//!
//! Activator callbacks are user code and may hang; the framework bounds each
//! `start`/`stop` call by a configurable wall-clock budget and *disowns* a
//! callback that overstays rather than interrupting it. See
//! [`FrameworkConfig`] for the recognized properties.

mod bundle;
mod config;
mod core;
mod error;
mod events;
mod listeners;
mod service;

// ---- Public re-exports ----

pub use bundle::{
    Bundle, BundleActivator, BundleContext, BundleState, FnActivator, StartOptions, StopOptions,
    STATE_ACTIVE_SET, STATE_CONTEXT_VALID, STATE_STOPPED_SET, SYSTEM_BUNDLE,
};
pub use config::{
    FrameworkConfig, LogLevel, FRAMEWORK_LOG_LEVEL, FRAMEWORK_STARTSTOP_TIMEOUT_MS,
    FRAMEWORK_WORKER_KEEPALIVE_MS,
};
pub use crate::core::Framework;
pub use error::{ActivatorError, FrameworkError, LifecycleOp};
pub use events::{
    BundleEvent, BundleEventKind, FrameworkEvent, FrameworkEventKind, ServiceEvent,
    ServiceEventKind,
};
pub use listeners::{
    BundleListener, FrameworkListener, ListenerToken, LoggingListener, ServiceFilter,
    ServiceListener,
};
pub use service::{
    DynService, PropValue, ServiceFactory, ServiceProperties, ServiceReference,
    ServiceRegistration, OBJECT_CLASS, SERVICE_ID,
};
