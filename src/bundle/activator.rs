//! # Bundle activator: the user-supplied lifecycle entry points.
//!
//! A [`BundleActivator`] is instantiated on every activation through the
//! factory handed to `install_bundle` and dropped again when the bundle stops
//! (or its start fails, or the framework disowns a hung call). [`FnActivator`]
//! builds one from two closures for embedders and tests that do not want a
//! dedicated type.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::bundle::context::BundleContext;
use crate::error::ActivatorError;

/// User-supplied pair of lifecycle entry points for a bundle.
///
/// Both callbacks run on a bundle worker that holds no framework locks. The
/// framework bounds each call by the configured start/stop budget; a callback
/// that overstays is disowned, never interrupted, so implementations should
/// return promptly or be prepared to finish in quarantine.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use bundlevisor::{ActivatorError, BundleActivator, BundleContext};
///
/// struct Echo;
///
/// #[async_trait]
/// impl BundleActivator for Echo {
///     async fn start(&self, _ctx: BundleContext) -> Result<(), ActivatorError> {
///         // register services, subscribe listeners...
///         Ok(())
///     }
///
///     async fn stop(&self, _ctx: BundleContext) -> Result<(), ActivatorError> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait BundleActivator: Send + Sync + 'static {
    /// Brings the bundle up. Runs while the bundle is `STARTING`.
    async fn start(&self, ctx: BundleContext) -> Result<(), ActivatorError>;

    /// Takes the bundle down. Runs while the bundle is `STOPPING`.
    async fn stop(&self, ctx: BundleContext) -> Result<(), ActivatorError>;
}

/// Factory invoked on each activation to manufacture the bundle's activator.
pub type ActivatorFactory = Arc<dyn Fn() -> Arc<dyn BundleActivator> + Send + Sync>;

type HookFn =
    Box<dyn Fn(BundleContext) -> BoxFuture<'static, Result<(), ActivatorError>> + Send + Sync>;

/// Function-backed activator built from two closures.
///
/// # Example
/// ```
/// use bundlevisor::FnActivator;
///
/// let activator = FnActivator::arc(
///     |_ctx| async { Ok(()) },
///     |_ctx| async { Ok(()) },
/// );
/// # let _ = activator;
/// ```
pub struct FnActivator {
    start: HookFn,
    stop: HookFn,
}

impl FnActivator {
    /// Creates an activator from a start and a stop closure.
    pub fn new<S, SF, T, TF>(start: S, stop: T) -> Self
    where
        S: Fn(BundleContext) -> SF + Send + Sync + 'static,
        SF: std::future::Future<Output = Result<(), ActivatorError>> + Send + 'static,
        T: Fn(BundleContext) -> TF + Send + Sync + 'static,
        TF: std::future::Future<Output = Result<(), ActivatorError>> + Send + 'static,
    {
        Self {
            start: Box::new(move |ctx| Box::pin(start(ctx))),
            stop: Box::new(move |ctx| Box::pin(stop(ctx))),
        }
    }

    /// Creates the activator and returns it as a shared handle.
    pub fn arc<S, SF, T, TF>(start: S, stop: T) -> Arc<dyn BundleActivator>
    where
        S: Fn(BundleContext) -> SF + Send + Sync + 'static,
        SF: std::future::Future<Output = Result<(), ActivatorError>> + Send + 'static,
        T: Fn(BundleContext) -> TF + Send + Sync + 'static,
        TF: std::future::Future<Output = Result<(), ActivatorError>> + Send + 'static,
    {
        Arc::new(Self::new(start, stop))
    }
}

#[async_trait]
impl BundleActivator for FnActivator {
    async fn start(&self, ctx: BundleContext) -> Result<(), ActivatorError> {
        (self.start)(ctx).await
    }

    async fn stop(&self, ctx: BundleContext) -> Result<(), ActivatorError> {
        (self.stop)(ctx).await
    }
}
