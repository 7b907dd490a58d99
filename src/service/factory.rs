use std::any::Any;
use std::sync::Arc;

use crate::service::ServiceReference;

/// Type-erased service instance as stored in an interface map.
pub type DynService = Arc<dyn Any + Send + Sync>;

/// Manufactures prototype-scoped service instances.
///
/// A registration published through
/// [`BundleContext::register_service_factory`](crate::BundleContext::register_service_factory)
/// hands each consuming bundle its own instance instead of a shared one. The
/// framework tracks the manufactured instances per bundle in the
/// registration's prototype-instance set and releases them through
/// [`ServiceFactory::unget_service`].
pub trait ServiceFactory: Send + Sync + 'static {
    /// Manufactures an instance for the requesting bundle.
    fn get_service(&self, bundle_id: u64, reference: &ServiceReference) -> DynService;

    /// Releases an instance previously manufactured for the requesting bundle.
    fn unget_service(&self, bundle_id: u64, service: DynService) {
        let _ = (bundle_id, service);
    }
}
