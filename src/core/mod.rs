//! # Framework core: resolver monitor, registries, controller.
//!
//! - **resolver.rs**: the framework-wide monitor callers and workers
//!   rendezvous through.
//! - **context.rs**: the composition root owning hub, registries and pool.
//! - **registry.rs**: id → bundle mapping with snapshot enumeration.
//! - **framework.rs**: the public [`Framework`] controller.

pub(crate) mod context;
pub(crate) mod framework;
pub(crate) mod registry;
pub(crate) mod resolver;

pub use framework::Framework;
