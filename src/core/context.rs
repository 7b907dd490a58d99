//! # Core context: composition root for one framework instance.
//!
//! Owns the resolver monitor, the listener hub, the bundle and service
//! registries, and the worker pool. Bundles and contexts hold weak
//! back-references; the [`Framework`](crate::Framework) handle owns the Arc.

use std::sync::{Arc, Weak};

use tracing::debug;

use crate::bundle::lifecycle::Bundle;
use crate::bundle::pool::WorkerPool;
use crate::bundle::state::Operation;
use crate::bundle::ActivatorFactory;
use crate::config::FrameworkConfig;
use crate::core::registry::BundleRegistry;
use crate::core::resolver::{Resolver, ResolverGuard};
use crate::error::FrameworkError;
use crate::events::{BundleEvent, BundleEventKind};
use crate::listeners::ListenerHub;
use crate::service::ServiceRegistry;

pub(crate) struct CoreContext {
    pub(crate) config: FrameworkConfig,
    pub(crate) resolver: Resolver,
    pub(crate) listeners: ListenerHub,
    pub(crate) bundles: BundleRegistry,
    pub(crate) services: ServiceRegistry,
    pub(crate) threads: WorkerPool,
    self_weak: Weak<CoreContext>,
}

impl CoreContext {
    pub(crate) fn new(config: FrameworkConfig) -> Arc<CoreContext> {
        Arc::new_cyclic(|weak| CoreContext {
            config,
            resolver: Resolver::new(),
            listeners: ListenerHub::new(),
            bundles: BundleRegistry::new(),
            services: ServiceRegistry::new(),
            threads: WorkerPool::new(),
            self_weak: weak.clone(),
        })
    }

    fn strong(&self) -> Option<Arc<CoreContext>> {
        self.self_weak.upgrade()
    }

    /// Blocks (releasing the monitor while sleeping) until no operation is in
    /// flight on `bundle`.
    pub(crate) async fn wait_on_operation<'a>(
        &'a self,
        mut guard: ResolverGuard<'a>,
        bundle: &Bundle,
    ) -> ResolverGuard<'a> {
        while bundle.operation() != Operation::Idle {
            guard = self.resolver.wait(guard).await;
        }
        guard
    }

    /// Delivers a bundle event through the bundle's worker so it serializes
    /// with the bundle's lifecycle callbacks. Reentrant deliveries (a
    /// listener already running on that worker raised another event) go
    /// inline instead; queueing onto the busy worker would self-deadlock.
    pub(crate) async fn post_bundle_event_locked<'a>(
        &'a self,
        bundle: &Bundle,
        event: BundleEvent,
        guard: ResolverGuard<'a>,
    ) -> ResolverGuard<'a> {
        let reentrant = bundle
            .worker()
            .is_some_and(|worker| worker.is_executing_bundle_changed());
        if !reentrant {
            if let Some(this) = self.strong() {
                let worker = self.threads.checkout(&this);
                let (guard, _failure, _staged) = worker
                    .call_bundle_changed(self, bundle, event, guard)
                    .await;
                return guard;
            }
        }
        // Reentrant delivery, or teardown already dropped the owning Arc:
        // deliver inline with the monitor released.
        drop(guard);
        self.listeners.fire_bundle_event(&event).await;
        self.resolver.lock().await
    }

    /// Installs a bundle and delivers its `Installed` event before returning.
    pub(crate) async fn install_bundle(
        &self,
        symbolic_name: &str,
        factory: ActivatorFactory,
    ) -> Result<Bundle, FrameworkError> {
        let guard = self.resolver.lock().await;
        let bundle = self
            .bundles
            .install(symbolic_name, factory, self.self_weak.clone())?;
        debug!(bundle = bundle.id(), name = symbolic_name, "bundle installed");
        let event = BundleEvent::new(BundleEventKind::Installed, bundle.id(), symbolic_name);
        let guard = self.post_bundle_event_locked(&bundle, event, guard).await;
        drop(guard);
        Ok(bundle)
    }

    pub(crate) fn init(&self) {
        debug!("framework core initialized");
    }

    /// First uninit phase, outside the resolver lock: bundle stop activators
    /// have already run; withdraw leftover services and terminate workers.
    pub(crate) async fn uninit0(&self) {
        let staged = self.services.unregister_all();
        for event in staged {
            self.listeners.fire_service_event(&event).await;
        }
        debug!(
            live = self.threads.live_len(),
            zombies = self.threads.zombie_len(),
            "terminating bundle workers"
        );
        self.threads.quit_all().await;
        self.threads.drain_zombies().await;
    }

    /// Second uninit phase, under the resolver lock: final teardown of the
    /// subscription tables.
    pub(crate) fn uninit1(&self) {
        self.listeners.clear();
    }
}
