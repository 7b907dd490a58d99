use std::time::SystemTime;

/// Classification of bundle lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleEventKind {
    /// The bundle was installed into the registry.
    Installed,
    /// The activator's `start` is about to run.
    Starting,
    /// The bundle reached `ACTIVE`.
    Started,
    /// The activator's `stop` is about to run.
    Stopping,
    /// The bundle left `ACTIVE` (orderly stop or failed start).
    Stopped,
    /// The bundle reached its terminal state.
    Uninstalled,
}

/// Lifecycle event of one bundle.
#[derive(Debug, Clone)]
pub struct BundleEvent {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp (for logging only).
    pub at: SystemTime,
    /// The kind of transition.
    pub kind: BundleEventKind,
    /// Id of the bundle the event is about.
    pub bundle_id: u64,
    /// Symbolic name of the bundle the event is about.
    pub symbolic_name: String,
}

impl BundleEvent {
    /// Creates a new event with the current timestamp and next sequence number.
    pub fn new(kind: BundleEventKind, bundle_id: u64, symbolic_name: impl Into<String>) -> Self {
        Self {
            seq: super::next_seq(),
            at: SystemTime::now(),
            kind,
            bundle_id,
            symbolic_name: symbolic_name.into(),
        }
    }
}
