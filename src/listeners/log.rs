use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{BundleEvent, FrameworkEvent, FrameworkEventKind, ServiceEvent};
use crate::listeners::listener::{BundleListener, FrameworkListener, ServiceListener};

/// Ready-made listener that forwards every event to `tracing`.
///
/// Subscribe it through a [`BundleContext`](crate::BundleContext) when the
/// embedding wants framework churn in its logs without writing listeners of
/// its own.
pub struct LoggingListener;

#[async_trait]
impl BundleListener for LoggingListener {
    async fn bundle_changed(&self, event: &BundleEvent) {
        debug!(
            bundle = event.bundle_id,
            name = %event.symbolic_name,
            kind = ?event.kind,
            "bundle event"
        );
    }
}

#[async_trait]
impl ServiceListener for LoggingListener {
    async fn service_changed(&self, event: &ServiceEvent) {
        debug!(
            service = event.reference.service_id(),
            bundle = event.reference.bundle_id(),
            kind = ?event.kind,
            "service event"
        );
    }
}

#[async_trait]
impl FrameworkListener for LoggingListener {
    async fn framework_event(&self, event: &FrameworkEvent) {
        let message = event.message.as_deref().unwrap_or("");
        match event.kind {
            FrameworkEventKind::Error => {
                error!(bundle = event.bundle_id, message, "framework event")
            }
            FrameworkEventKind::Warning => {
                warn!(bundle = event.bundle_id, message, "framework event")
            }
            _ => info!(bundle = event.bundle_id, kind = ?event.kind, message, "framework event"),
        }
    }
}
