use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use tracing::error;

use crate::events::{
    BundleEvent, FrameworkEvent, FrameworkEventKind, ServiceEvent, ServiceEventKind,
};
use crate::listeners::listener::{
    BundleListener, FrameworkListener, ListenerToken, ServiceFilter, ServiceListener,
};
use crate::service::ServiceReference;

/// An event produced while a framework lock was held, to be fired after the
/// lock is released.
pub(crate) enum StagedEvent {
    Bundle(BundleEvent),
    Service(ServiceEvent),
    Framework(FrameworkEvent),
}

struct BundleEntry {
    token: u64,
    listener: Arc<dyn BundleListener>,
}

struct ServiceEntry {
    token: u64,
    listener: Arc<dyn ServiceListener>,
    filter: Option<ServiceFilter>,
}

struct FrameworkEntry {
    token: u64,
    listener: Arc<dyn FrameworkListener>,
}

/// Fan-out of framework events over ordered subscriptions.
pub(crate) struct ListenerHub {
    bundle: Mutex<Vec<BundleEntry>>,
    service: Mutex<Vec<ServiceEntry>>,
    framework: Mutex<Vec<FrameworkEntry>>,
    next_token: AtomicU64,
}

impl ListenerHub {
    pub(crate) fn new() -> Self {
        Self {
            bundle: Mutex::new(Vec::new()),
            service: Mutex::new(Vec::new()),
            framework: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
        }
    }

    fn token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn add_bundle_listener(&self, listener: Arc<dyn BundleListener>) -> ListenerToken {
        let token = self.token();
        lock(&self.bundle).push(BundleEntry { token, listener });
        ListenerToken(token)
    }

    pub(crate) fn remove_bundle_listener(&self, token: ListenerToken) {
        lock(&self.bundle).retain(|e| e.token != token.0);
    }

    pub(crate) fn add_service_listener(
        &self,
        listener: Arc<dyn ServiceListener>,
        filter: Option<ServiceFilter>,
    ) -> ListenerToken {
        let token = self.token();
        lock(&self.service).push(ServiceEntry {
            token,
            listener,
            filter,
        });
        ListenerToken(token)
    }

    pub(crate) fn remove_service_listener(&self, token: ListenerToken) {
        lock(&self.service).retain(|e| e.token != token.0);
    }

    pub(crate) fn add_framework_listener(
        &self,
        listener: Arc<dyn FrameworkListener>,
    ) -> ListenerToken {
        let token = self.token();
        lock(&self.framework).push(FrameworkEntry { token, listener });
        ListenerToken(token)
    }

    pub(crate) fn remove_framework_listener(&self, token: ListenerToken) {
        lock(&self.framework).retain(|e| e.token != token.0);
    }

    /// Delivers a bundle event to every bundle listener, in subscription order.
    pub(crate) async fn fire_bundle_event(&self, event: &BundleEvent) {
        let snapshot: Vec<Arc<dyn BundleListener>> = lock(&self.bundle)
            .iter()
            .map(|e| Arc::clone(&e.listener))
            .collect();
        let mut failures = Vec::new();
        for listener in snapshot {
            let fut = listener.bundle_changed(event);
            if let Err(payload) = AssertUnwindSafe(fut).catch_unwind().await {
                failures.push(panic_message(payload));
            }
        }
        self.report_listener_failures(event.bundle_id, failures).await;
    }

    /// Delivers a service event to every service listener whose filter
    /// matches the registration's current properties.
    pub(crate) async fn fire_service_event(&self, event: &ServiceEvent) {
        let props = event.reference.properties();
        let snapshot = self.service_snapshot();
        let mut failures = Vec::new();
        for (listener, filter) in snapshot {
            if filter.as_ref().map_or(true, |f| f(&props)) {
                let fut = listener.service_changed(event);
                if let Err(payload) = AssertUnwindSafe(fut).catch_unwind().await {
                    failures.push(panic_message(payload));
                }
            }
        }
        self.report_listener_failures(event.reference.bundle_id(), failures)
            .await;
    }

    /// Property-change delivery: listeners matching the new properties receive
    /// `Modified`; listeners that matched only the old ones receive
    /// `ModifiedEndmatch`.
    pub(crate) async fn service_modified(
        &self,
        reference: &ServiceReference,
        old: &crate::service::ServiceProperties,
    ) {
        let new_props = reference.properties();
        let modified = ServiceEvent::new(ServiceEventKind::Modified, reference.clone());
        let endmatch = ServiceEvent::new(ServiceEventKind::ModifiedEndmatch, reference.clone());
        let snapshot = self.service_snapshot();
        let mut failures = Vec::new();
        for (listener, filter) in snapshot {
            let event = match &filter {
                None => Some(&modified),
                Some(f) if f(&new_props) => Some(&modified),
                Some(f) if f(old) => Some(&endmatch),
                Some(_) => None,
            };
            if let Some(event) = event {
                let fut = listener.service_changed(event);
                if let Err(payload) = AssertUnwindSafe(fut).catch_unwind().await {
                    failures.push(panic_message(payload));
                }
            }
        }
        self.report_listener_failures(reference.bundle_id(), failures)
            .await;
    }

    /// Delivers a framework event to every framework listener.
    pub(crate) async fn fire_framework_event(&self, event: &FrameworkEvent) {
        let snapshot: Vec<Arc<dyn FrameworkListener>> = lock(&self.framework)
            .iter()
            .map(|e| Arc::clone(&e.listener))
            .collect();
        for listener in snapshot {
            let fut = listener.framework_event(event);
            if let Err(payload) = AssertUnwindSafe(fut).catch_unwind().await {
                // Error reports about error reports would not terminate.
                error!(
                    reason = %panic_message(payload),
                    "framework listener panicked"
                );
            }
        }
    }

    /// Fires a batch of staged events in order.
    pub(crate) async fn fire_staged(&self, staged: Vec<StagedEvent>) {
        for event in staged {
            match event {
                StagedEvent::Bundle(ev) => self.fire_bundle_event(&ev).await,
                StagedEvent::Service(ev) => self.fire_service_event(&ev).await,
                StagedEvent::Framework(ev) => self.fire_framework_event(&ev).await,
            }
        }
    }

    /// Drops every subscription (framework teardown).
    pub(crate) fn clear(&self) {
        lock(&self.bundle).clear();
        lock(&self.service).clear();
        lock(&self.framework).clear();
    }

    fn service_snapshot(&self) -> Vec<(Arc<dyn ServiceListener>, Option<ServiceFilter>)> {
        lock(&self.service)
            .iter()
            .map(|e| (Arc::clone(&e.listener), e.filter.clone()))
            .collect()
    }

    async fn report_listener_failures(&self, bundle_id: u64, failures: Vec<String>) {
        for reason in failures {
            error!(bundle = bundle_id, %reason, "event listener panicked");
            let report = FrameworkEvent::new(FrameworkEventKind::Error, bundle_id)
                .with_message(format!("listener panicked: {reason}"));
            self.fire_framework_event(&report).await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Renders a panic payload into a loggable string.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
