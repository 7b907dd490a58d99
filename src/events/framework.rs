use std::time::SystemTime;

/// Classification of framework-level events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameworkEventKind {
    /// The framework completed its start sequence.
    Started,
    /// An error was swallowed and reported instead of propagated
    /// (listener panic, activator failure during a shutdown sweep).
    Error,
    /// A recoverable anomaly worth surfacing.
    Warning,
    /// Informational milestone.
    Info,
    /// The framework stopped.
    Stopped,
    /// The framework stopped as part of an update and restarted.
    StoppedUpdate,
    /// `wait_for_stop` gave up before a stop cycle completed.
    WaitTimedOut,
}

/// Framework-level event.
#[derive(Debug, Clone)]
pub struct FrameworkEvent {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp (for logging only).
    pub at: SystemTime,
    /// The kind of event.
    pub kind: FrameworkEventKind,
    /// Bundle the event refers to (0 for the framework itself).
    pub bundle_id: u64,
    /// Human-readable detail, if any.
    pub message: Option<String>,
}

impl FrameworkEvent {
    /// Creates a new event with the current timestamp and next sequence number.
    pub fn new(kind: FrameworkEventKind, bundle_id: u64) -> Self {
        Self {
            seq: super::next_seq(),
            at: SystemTime::now(),
            kind,
            bundle_id,
            message: None,
        }
    }

    /// Attaches a detail message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
