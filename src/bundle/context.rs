//! # Bundle context: the handle through which a running bundle talks to the
//! framework.
//!
//! A context exists only while its bundle is `STARTING`, `ACTIVE` or
//! `STOPPING`. Clones handed to user code are invalidated when the bundle
//! leaves those states; operations on an invalidated context fail with
//! `IllegalState`.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::bundle::activator::BundleActivator;
use crate::bundle::lifecycle::{Bundle, BundleInner};
use crate::core::context::CoreContext;
use crate::error::FrameworkError;
use crate::events::{ServiceEvent, ServiceEventKind};
use crate::listeners::{
    BundleListener, FrameworkListener, ListenerToken, ServiceFilter, ServiceListener,
};
use crate::service::{
    DynService, InterfaceMap, ServiceFactory, ServiceObject, ServiceProperties, ServiceReference,
    ServiceRegistration,
};

struct ContextInner {
    bundle_id: u64,
    bundle: Weak<BundleInner>,
    core: Weak<CoreContext>,
    valid: AtomicBool,
}

/// Per-bundle gateway to the framework: install, publish, look up, subscribe.
#[derive(Clone)]
pub struct BundleContext {
    inner: Arc<ContextInner>,
}

impl BundleContext {
    pub(crate) fn new(bundle: &Bundle, core: &Arc<CoreContext>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                bundle_id: bundle.id(),
                bundle: bundle.downgrade(),
                core: Arc::downgrade(core),
                valid: AtomicBool::new(true),
            }),
        }
    }

    pub(crate) fn invalidate(&self) {
        self.inner.valid.store(false, Ordering::SeqCst);
    }

    /// Id of the bundle this context belongs to.
    pub fn bundle_id(&self) -> u64 {
        self.inner.bundle_id
    }

    /// The bundle this context belongs to.
    pub fn bundle(&self) -> Result<Bundle, FrameworkError> {
        self.inner
            .bundle
            .upgrade()
            .map(Bundle::from_inner)
            .ok_or(FrameworkError::NotFound {
                what: format!("bundle #{}", self.inner.bundle_id),
            })
    }

    /// Looks up a framework property (construction map, unknown keys included).
    pub fn property(&self, key: &str) -> Option<String> {
        let core = self.core().ok()?;
        core.config.property(key).map(String::from)
    }

    /// Snapshot of all installed bundles, ascending id order.
    pub fn bundles(&self) -> Vec<Bundle> {
        match self.core() {
            Ok(core) => core.bundles.snapshot(),
            Err(_) => Vec::new(),
        }
    }

    /// Looks up one bundle by id.
    pub fn get_bundle(&self, id: u64) -> Option<Bundle> {
        self.core().ok()?.bundles.get(id)
    }

    /// Installs a new bundle under `symbolic_name`.
    ///
    /// `factory` manufactures the bundle's activator on each activation.
    /// Listeners observe an `Installed` event before this returns.
    pub async fn install_bundle<F>(
        &self,
        symbolic_name: &str,
        factory: F,
    ) -> Result<Bundle, FrameworkError>
    where
        F: Fn() -> Arc<dyn BundleActivator> + Send + Sync + 'static,
    {
        let core = self.core()?;
        core.install_bundle(symbolic_name, Arc::new(factory)).await
    }

    /// Publishes a shared service instance under interface `T`.
    pub async fn register_service<T>(
        &self,
        service: Arc<T>,
        properties: ServiceProperties,
    ) -> Result<ServiceRegistration, FrameworkError>
    where
        T: Any + Send + Sync,
    {
        let object: DynService = service;
        let mut map: InterfaceMap = HashMap::new();
        map.insert(type_name::<T>(), object);
        self.register(vec![type_name::<T>()], ServiceObject::Instance(map), properties)
            .await
    }

    /// Publishes a prototype-scoped service under interface `T`: each
    /// consuming bundle receives its own instance from `factory`.
    pub async fn register_service_factory<T>(
        &self,
        factory: Arc<dyn ServiceFactory>,
        properties: ServiceProperties,
    ) -> Result<ServiceRegistration, FrameworkError>
    where
        T: Any + Send + Sync,
    {
        self.register(vec![type_name::<T>()], ServiceObject::Factory(factory), properties)
            .await
    }

    async fn register(
        &self,
        interfaces: Vec<&'static str>,
        service: ServiceObject,
        properties: ServiceProperties,
    ) -> Result<ServiceRegistration, FrameworkError> {
        let core = self.core()?;
        let inner = core
            .services
            .register(self.inner.bundle_id, interfaces, service, properties);
        let registration = ServiceRegistration::new(inner, Arc::downgrade(&core));
        core.listeners
            .fire_service_event(&ServiceEvent::new(
                ServiceEventKind::Registered,
                registration.reference(),
            ))
            .await;
        Ok(registration)
    }

    /// Reference to the oldest available provider of `T`, if any.
    pub fn get_service_reference<T>(&self) -> Option<ServiceReference>
    where
        T: Any + Send + Sync,
    {
        self.get_service_references::<T>().into_iter().next()
    }

    /// References to every available provider of `T`, oldest first.
    pub fn get_service_references<T>(&self) -> Vec<ServiceReference>
    where
        T: Any + Send + Sync,
    {
        match self.core() {
            Ok(core) => core
                .services
                .lookup(type_name::<T>())
                .into_iter()
                .map(ServiceReference::new)
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Fetches the service behind `reference`, registering this bundle as a
    /// dependent. Returns `None` when the service is gone, was published
    /// under a different type, or the reference is stale.
    pub fn get_service<T>(&self, reference: &ServiceReference) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.core().ok()?;
        let registration = reference.registration();
        if !registration.is_available() {
            return None;
        }
        let me = self.inner.bundle_id;
        match &registration.service {
            ServiceObject::Instance(map) => {
                let object = Arc::clone(map.get(type_name::<T>())?);
                let typed = object.downcast::<T>().ok()?;
                let mut st = registration.lock_state();
                *st.dependents.entry(me).or_insert(0) += 1;
                Some(typed)
            }
            ServiceObject::Factory(factory) => {
                let object = factory.get_service(me, reference);
                let typed = Arc::clone(&object).downcast::<T>().ok()?;
                registration
                    .lock_state()
                    .prototype_instances
                    .entry(me)
                    .or_default()
                    .push(object);
                Some(typed)
            }
        }
    }

    /// Releases one use of `reference` by this bundle: decrements the shared
    /// use count, or returns the most recent prototype instance to its
    /// factory.
    pub fn unget_service(&self, reference: &ServiceReference) {
        let registration = reference.registration();
        let me = self.inner.bundle_id;
        let mut returned = None;
        {
            let mut st = registration.lock_state();
            if let Some(count) = st.dependents.get_mut(&me) {
                *count -= 1;
                if *count == 0 {
                    st.dependents.remove(&me);
                }
            } else if let Some(instances) = st.prototype_instances.get_mut(&me) {
                returned = instances.pop();
                if instances.is_empty() {
                    st.prototype_instances.remove(&me);
                }
            }
        }
        if let (Some(instance), ServiceObject::Factory(factory)) =
            (returned, &registration.service)
        {
            factory.unget_service(me, instance);
        }
    }

    /// Subscribes a bundle listener. Returns a token for removal.
    pub fn add_bundle_listener(
        &self,
        listener: Arc<dyn BundleListener>,
    ) -> Result<ListenerToken, FrameworkError> {
        Ok(self.core()?.listeners.add_bundle_listener(listener))
    }

    pub fn remove_bundle_listener(&self, token: ListenerToken) {
        if let Ok(core) = self.core() {
            core.listeners.remove_bundle_listener(token);
        }
    }

    /// Subscribes a service listener, optionally filtered by a predicate over
    /// the registration's properties.
    pub fn add_service_listener(
        &self,
        listener: Arc<dyn ServiceListener>,
        filter: Option<ServiceFilter>,
    ) -> Result<ListenerToken, FrameworkError> {
        Ok(self.core()?.listeners.add_service_listener(listener, filter))
    }

    pub fn remove_service_listener(&self, token: ListenerToken) {
        if let Ok(core) = self.core() {
            core.listeners.remove_service_listener(token);
        }
    }

    /// Subscribes a framework listener.
    pub fn add_framework_listener(
        &self,
        listener: Arc<dyn FrameworkListener>,
    ) -> Result<ListenerToken, FrameworkError> {
        Ok(self.core()?.listeners.add_framework_listener(listener))
    }

    pub fn remove_framework_listener(&self, token: ListenerToken) {
        if let Ok(core) = self.core() {
            core.listeners.remove_framework_listener(token);
        }
    }

    fn core(&self) -> Result<Arc<CoreContext>, FrameworkError> {
        if !self.inner.valid.load(Ordering::SeqCst) {
            return Err(FrameworkError::IllegalState {
                expected: "valid bundle context",
                actual: "invalidated".to_string(),
            });
        }
        self.inner.core.upgrade().ok_or(FrameworkError::IllegalState {
            expected: "running framework",
            actual: "framework dropped".to_string(),
        })
    }
}
