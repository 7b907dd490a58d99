//! # Service registration bookkeeping.
//!
//! [`RegistrationInner`] is the framework's record for one published service:
//! the owning bundle, the logically immutable interface map, the mutable
//! property bag, availability flags, and the two sets of dependent bundles
//! (plain users and prototype instances). [`ServiceRegistration`] is the
//! publisher-facing handle over it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::core::context::CoreContext;
use crate::error::FrameworkError;
use crate::events::{ServiceEvent, ServiceEventKind};
use crate::service::factory::{DynService, ServiceFactory};
use crate::service::properties::{PropValue, ServiceProperties};
use crate::service::reference::ServiceReference;
use crate::service::{OBJECT_CLASS, SERVICE_ID};

/// Interface id → implementation, fixed at publication time.
pub(crate) type InterfaceMap = HashMap<&'static str, DynService>;

/// What the registration actually holds: a shared instance map or a factory.
pub(crate) enum ServiceObject {
    Instance(InterfaceMap),
    Factory(Arc<dyn ServiceFactory>),
}

pub(crate) struct RegState {
    pub properties: ServiceProperties,
    pub available: bool,
    pub unregistering: bool,
    /// Bundles holding the shared instance, with a use count each.
    pub dependents: HashMap<u64, u32>,
    /// Prototype instances manufactured per bundle.
    pub prototype_instances: HashMap<u64, Vec<DynService>>,
}

pub(crate) struct RegistrationInner {
    pub id: u64,
    pub bundle_id: u64,
    pub interfaces: Vec<&'static str>,
    pub service: ServiceObject,
    state: Mutex<RegState>,
}

impl RegistrationInner {
    pub(crate) fn new(
        id: u64,
        bundle_id: u64,
        interfaces: Vec<&'static str>,
        service: ServiceObject,
        mut properties: ServiceProperties,
    ) -> Arc<RegistrationInner> {
        properties.insert(SERVICE_ID.to_string(), PropValue::Int(id as i64));
        properties.insert(
            OBJECT_CLASS.to_string(),
            PropValue::Str(interfaces.join(",")),
        );
        Arc::new(RegistrationInner {
            id,
            bundle_id,
            interfaces,
            service,
            state: Mutex::new(RegState {
                properties,
                available: true,
                unregistering: false,
                dependents: HashMap::new(),
                prototype_instances: HashMap::new(),
            }),
        })
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, RegState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn properties_snapshot(&self) -> ServiceProperties {
        self.lock_state().properties.clone()
    }

    pub(crate) fn is_available(&self) -> bool {
        let st = self.lock_state();
        st.available && !st.unregistering
    }
}

/// Publisher-side handle for one published service.
///
/// Cloneable; all clones refer to the same registration.
#[derive(Clone)]
pub struct ServiceRegistration {
    inner: Arc<RegistrationInner>,
    core: Weak<CoreContext>,
}

impl ServiceRegistration {
    pub(crate) fn new(inner: Arc<RegistrationInner>, core: Weak<CoreContext>) -> Self {
        Self { inner, core }
    }

    /// Returns a consumer-side reference to this registration.
    pub fn reference(&self) -> ServiceReference {
        ServiceReference::new(Arc::clone(&self.inner))
    }

    /// True if `bundle_id` holds the shared instance or a prototype instance.
    pub fn is_used_by(&self, bundle_id: u64) -> bool {
        let st = self.inner.lock_state();
        st.dependents.contains_key(&bundle_id) || st.prototype_instances.contains_key(&bundle_id)
    }

    /// Replaces the registration's properties and notifies service listeners.
    ///
    /// The framework-maintained `service.id` and `objectclass` entries are
    /// reasserted over whatever the caller supplies. Listeners whose filter
    /// matches the new properties receive `Modified`; listeners whose filter
    /// matched only the old ones receive `ModifiedEndmatch`.
    pub async fn set_properties(
        &self,
        properties: ServiceProperties,
    ) -> Result<(), FrameworkError> {
        let core = self.core()?;
        let old = {
            let mut st = self.inner.lock_state();
            if st.unregistering {
                return Err(FrameworkError::IllegalState {
                    expected: "registered service",
                    actual: "unregistering".to_string(),
                });
            }
            let mut next = properties;
            next.insert(SERVICE_ID.to_string(), PropValue::Int(self.inner.id as i64));
            next.insert(
                OBJECT_CLASS.to_string(),
                PropValue::Str(self.inner.interfaces.join(",")),
            );
            std::mem::replace(&mut st.properties, next)
        };
        core.listeners.service_modified(&self.reference(), &old).await;
        Ok(())
    }

    /// Withdraws the service: notifies listeners, then removes the
    /// registration from the registry and clears its dependents.
    pub async fn unregister(&self) -> Result<(), FrameworkError> {
        let core = self.core()?;
        {
            let mut st = self.inner.lock_state();
            if st.unregistering {
                return Err(FrameworkError::IllegalState {
                    expected: "registered service",
                    actual: "unregistering".to_string(),
                });
            }
            st.unregistering = true;
        }
        core.listeners
            .fire_service_event(&ServiceEvent::new(
                ServiceEventKind::Unregistering,
                self.reference(),
            ))
            .await;
        {
            let mut st = self.inner.lock_state();
            st.available = false;
            st.dependents.clear();
            st.prototype_instances.clear();
        }
        core.services.remove(self.inner.id);
        Ok(())
    }

    fn core(&self) -> Result<Arc<CoreContext>, FrameworkError> {
        self.core.upgrade().ok_or(FrameworkError::IllegalState {
            expected: "running framework",
            actual: "framework dropped".to_string(),
        })
    }
}
