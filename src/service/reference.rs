use std::fmt;
use std::sync::Arc;

use crate::service::properties::{PropValue, ServiceProperties};
use crate::service::registration::RegistrationInner;
use crate::service::SERVICE_ID;

/// Consumer-side handle to a published service.
///
/// References hold the registration record alive so late observers (event
/// listeners, diagnostics) can still inspect it; whether the service can
/// actually be fetched is governed by [`ServiceReference::is_available`].
#[derive(Clone)]
pub struct ServiceReference {
    inner: Arc<RegistrationInner>,
}

impl ServiceReference {
    pub(crate) fn new(inner: Arc<RegistrationInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn registration(&self) -> &Arc<RegistrationInner> {
        &self.inner
    }

    /// The framework-assigned service id.
    pub fn service_id(&self) -> u64 {
        self.inner.id
    }

    /// Id of the bundle that published the service.
    pub fn bundle_id(&self) -> u64 {
        self.inner.bundle_id
    }

    /// Interface identifiers the service was published under.
    pub fn interfaces(&self) -> Vec<&'static str> {
        self.inner.interfaces.clone()
    }

    /// Looks up one property.
    pub fn property(&self, key: &str) -> Option<PropValue> {
        self.inner.lock_state().properties.get(key).cloned()
    }

    /// Snapshot of the whole property bag.
    pub fn properties(&self) -> ServiceProperties {
        self.inner.properties_snapshot()
    }

    /// True while the service is registered and not being withdrawn.
    pub fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}

impl PartialEq for ServiceReference {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ServiceReference {}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReference")
            .field(SERVICE_ID, &self.inner.id)
            .field("bundle", &self.inner.bundle_id)
            .field("interfaces", &self.inner.interfaces)
            .finish()
    }
}
