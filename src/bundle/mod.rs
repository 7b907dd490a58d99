//! # Bundle: installable unit, activator, context, worker, pool.
//!
//! - **lifecycle.rs**: the `Bundle` record and the caller side of the state
//!   machine; worker-side commit paths (`start0`, `stop1`, `stop2`,
//!   `start_failed`).
//! - **worker.rs**: the per-operation executor with timeout and cooperative
//!   abort; the result slot.
//! - **pool.rs**: live/zombie worker bookkeeping.
//! - **activator.rs**: the user-facing activator trait and closure adapter.
//! - **context.rs**: the handle a running bundle uses to talk back to the
//!   framework.
//! - **state.rs**: state bits, operation tag, abort flag, option bitsets.

pub(crate) mod activator;
pub(crate) mod context;
pub(crate) mod lifecycle;
pub(crate) mod pool;
pub(crate) mod state;
pub(crate) mod worker;

pub use activator::{BundleActivator, FnActivator};
pub use context::BundleContext;
pub use lifecycle::{Bundle, SYSTEM_BUNDLE};
pub use state::{
    BundleState, StartOptions, StopOptions, STATE_ACTIVE_SET, STATE_CONTEXT_VALID,
    STATE_STOPPED_SET,
};

pub(crate) use activator::ActivatorFactory;
