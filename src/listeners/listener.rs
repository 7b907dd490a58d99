use std::sync::Arc;

use async_trait::async_trait;

use crate::events::{BundleEvent, FrameworkEvent, ServiceEvent};
use crate::service::ServiceProperties;

/// Receives bundle lifecycle events.
///
/// Called synchronously from the bundle's worker (or from the staged-event
/// drain after a framework lock is released), so implementations should not
/// block for long. Panics are isolated and reported; they never abort
/// delivery to other listeners or a shutdown sweep.
#[async_trait]
pub trait BundleListener: Send + Sync + 'static {
    async fn bundle_changed(&self, event: &BundleEvent);
}

/// Receives service registration events, optionally filtered.
#[async_trait]
pub trait ServiceListener: Send + Sync + 'static {
    async fn service_changed(&self, event: &ServiceEvent);
}

/// Receives framework-level events, including swallowed-error reports.
#[async_trait]
pub trait FrameworkListener: Send + Sync + 'static {
    async fn framework_event(&self, event: &FrameworkEvent);
}

/// Predicate attached to a service subscription.
///
/// Evaluated against the registration's current properties before delivery.
/// This is the seam where an LDAP-style filter expression would plug in; the
/// expression engine itself is not part of the framework.
pub type ServiceFilter = Arc<dyn Fn(&ServiceProperties) -> bool + Send + Sync>;

/// Handle returned by listener subscription, used for removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerToken(pub(crate) u64);
