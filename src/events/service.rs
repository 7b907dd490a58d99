use std::time::SystemTime;

use crate::service::ServiceReference;

/// Classification of service registration events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEventKind {
    /// The service was published.
    Registered,
    /// The service properties changed and still match the subscriber's filter.
    Modified,
    /// The service properties changed and no longer match a filter that
    /// previously matched.
    ModifiedEndmatch,
    /// The service is about to be withdrawn.
    Unregistering,
}

/// Event about one service registration.
#[derive(Debug, Clone)]
pub struct ServiceEvent {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp (for logging only).
    pub at: SystemTime,
    /// The kind of event.
    pub kind: ServiceEventKind,
    /// Reference to the registration the event is about.
    pub reference: ServiceReference,
}

impl ServiceEvent {
    /// Creates a new event with the current timestamp and next sequence number.
    pub fn new(kind: ServiceEventKind, reference: ServiceReference) -> Self {
        Self {
            seq: super::next_seq(),
            at: SystemTime::now(),
            kind,
            reference,
        }
    }
}
