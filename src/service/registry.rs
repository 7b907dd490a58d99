use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::events::{ServiceEvent, ServiceEventKind};
use crate::service::reference::ServiceReference;
use crate::service::registration::{RegistrationInner, ServiceObject};
use crate::service::ServiceProperties;

/// Framework-wide map of published services.
pub(crate) struct ServiceRegistry {
    regs: DashMap<u64, Arc<RegistrationInner>>,
    next_id: AtomicU64,
}

impl ServiceRegistry {
    pub(crate) fn new() -> Self {
        Self {
            regs: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn register(
        &self,
        bundle_id: u64,
        interfaces: Vec<&'static str>,
        service: ServiceObject,
        properties: ServiceProperties,
    ) -> Arc<RegistrationInner> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = RegistrationInner::new(id, bundle_id, interfaces, service, properties);
        self.regs.insert(id, Arc::clone(&inner));
        inner
    }

    /// Available registrations providing `interface`, oldest id first.
    pub(crate) fn lookup(&self, interface: &str) -> Vec<Arc<RegistrationInner>> {
        let mut found: Vec<Arc<RegistrationInner>> = self
            .regs
            .iter()
            .filter(|entry| {
                entry.value().interfaces.iter().any(|i| *i == interface)
                    && entry.value().is_available()
            })
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        found.sort_by_key(|r| r.id);
        found
    }

    pub(crate) fn remove(&self, id: u64) {
        self.regs.remove(&id);
    }

    /// Withdraws every service a bundle published, returning the staged
    /// `Unregistering` events for delivery once framework locks are released.
    pub(crate) fn unregister_bundle(&self, bundle_id: u64) -> Vec<ServiceEvent> {
        let mine: Vec<Arc<RegistrationInner>> = self
            .regs
            .iter()
            .filter(|entry| entry.value().bundle_id == bundle_id)
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut staged = Vec::with_capacity(mine.len());
        for reg in mine {
            staged.extend(self.withdraw(&reg));
        }
        staged
    }

    /// Withdraws every remaining service (framework teardown).
    pub(crate) fn unregister_all(&self) -> Vec<ServiceEvent> {
        let all: Vec<Arc<RegistrationInner>> = self
            .regs
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut staged = Vec::with_capacity(all.len());
        for reg in all {
            staged.extend(self.withdraw(&reg));
        }
        staged
    }

    fn withdraw(&self, reg: &Arc<RegistrationInner>) -> Option<ServiceEvent> {
        {
            let mut st = reg.lock_state();
            if st.unregistering {
                return None;
            }
            st.unregistering = true;
            st.available = false;
            st.dependents.clear();
            st.prototype_instances.clear();
        }
        self.regs.remove(&reg.id);
        Some(ServiceEvent::new(
            ServiceEventKind::Unregistering,
            ServiceReference::new(Arc::clone(reg)),
        ))
    }
}
