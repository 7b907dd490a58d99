#![allow(dead_code)]

//! Shared fixtures for the integration tests: probed activators and
//! event-collecting listeners.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bundlevisor::{
    ActivatorError, BundleActivator, BundleContext, BundleEvent, BundleEventKind, BundleListener,
    Framework, FrameworkEvent, FrameworkEventKind, FrameworkListener, ServiceEvent,
    ServiceEventKind, ServiceListener,
};

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Builds a framework from `(key, value)` property pairs and starts it.
pub async fn started_framework(props: &[(&str, &str)]) -> Framework {
    let map: HashMap<String, String> = props
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let framework = Framework::new(map);
    framework.start().await.expect("framework starts");
    framework
}

/// Shared append-only record of activator calls, e.g. `"b1:start"`.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn journal_entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

pub fn journal_count(journal: &Journal, entry: &str) -> usize {
    journal.lock().unwrap().iter().filter(|e| *e == entry).count()
}

/// Probe observed by a [`RecordingActivator`]; `dropped` flips when the
/// activator instance is released by the framework (and its quarantined
/// callback, if any, has finished).
pub struct ActivatorProbe {
    pub name: String,
    pub journal: Journal,
    pub dropped: AtomicBool,
}

impl ActivatorProbe {
    pub fn new(name: &str, journal: &Journal) -> Arc<ActivatorProbe> {
        Arc::new(ActivatorProbe {
            name: name.to_string(),
            journal: Arc::clone(journal),
            dropped: AtomicBool::new(false),
        })
    }

    pub fn record(&self, what: &str) {
        self.journal
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.name, what));
    }

    pub fn starts(&self) -> usize {
        journal_count(&self.journal, &format!("{}:start", self.name))
    }

    pub fn stops(&self) -> usize {
        journal_count(&self.journal, &format!("{}:stop", self.name))
    }

    pub fn was_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

/// Activator that records its calls and sleeps for the configured delays.
pub struct RecordingActivator {
    probe: Arc<ActivatorProbe>,
    start_delay: Duration,
    stop_delay: Duration,
    block_in_start: bool,
}

#[async_trait]
impl BundleActivator for RecordingActivator {
    async fn start(&self, _ctx: BundleContext) -> Result<(), ActivatorError> {
        self.probe.record("start");
        if self.block_in_start {
            std::future::pending::<()>().await;
        }
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        Ok(())
    }

    async fn stop(&self, _ctx: BundleContext) -> Result<(), ActivatorError> {
        self.probe.record("stop");
        if !self.stop_delay.is_zero() {
            tokio::time::sleep(self.stop_delay).await;
        }
        Ok(())
    }
}

impl Drop for RecordingActivator {
    fn drop(&mut self) {
        self.probe.dropped.store(true, Ordering::SeqCst);
    }
}

/// Activator factory whose instances record into `probe` and sleep for the
/// given delays.
pub fn recording(
    probe: &Arc<ActivatorProbe>,
    start_delay: Duration,
    stop_delay: Duration,
) -> impl Fn() -> Arc<dyn BundleActivator> + Send + Sync + 'static {
    let probe = Arc::clone(probe);
    move || {
        let activator: Arc<dyn BundleActivator> = Arc::new(RecordingActivator {
            probe: Arc::clone(&probe),
            start_delay,
            stop_delay,
            block_in_start: false,
        });
        activator
    }
}

/// Activator factory whose instances never return from `start`.
pub fn blocking_start(
    probe: &Arc<ActivatorProbe>,
) -> impl Fn() -> Arc<dyn BundleActivator> + Send + Sync + 'static {
    let probe = Arc::clone(probe);
    move || {
        let activator: Arc<dyn BundleActivator> = Arc::new(RecordingActivator {
            probe: Arc::clone(&probe),
            start_delay: Duration::ZERO,
            stop_delay: Duration::ZERO,
            block_in_start: true,
        });
        activator
    }
}

/// Collects bundle events in arrival order.
#[derive(Default)]
pub struct BundleEventLog {
    events: Mutex<Vec<(u64, BundleEventKind)>>,
}

impl BundleEventLog {
    pub fn kinds(&self) -> Vec<BundleEventKind> {
        self.events.lock().unwrap().iter().map(|(_, k)| *k).collect()
    }

    pub fn seqs(&self) -> Vec<u64> {
        self.events.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }
}

pub struct CollectingBundleListener {
    pub log: Arc<BundleEventLog>,
}

#[async_trait]
impl BundleListener for CollectingBundleListener {
    async fn bundle_changed(&self, event: &BundleEvent) {
        self.log
            .events
            .lock()
            .unwrap()
            .push((event.seq, event.kind));
    }
}

/// Bundle listener that panics on every delivery.
pub struct PanickingBundleListener;

#[async_trait]
impl BundleListener for PanickingBundleListener {
    async fn bundle_changed(&self, event: &BundleEvent) {
        panic!("listener rejects {:?}", event.kind);
    }
}

/// Collects service events in arrival order.
#[derive(Default)]
pub struct ServiceEventLog {
    events: Mutex<Vec<(u64, ServiceEventKind)>>,
}

impl ServiceEventLog {
    pub fn kinds(&self) -> Vec<ServiceEventKind> {
        self.events.lock().unwrap().iter().map(|(_, k)| *k).collect()
    }

    pub fn seqs(&self) -> Vec<u64> {
        self.events.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }
}

pub struct CollectingServiceListener {
    pub log: Arc<ServiceEventLog>,
}

#[async_trait]
impl ServiceListener for CollectingServiceListener {
    async fn service_changed(&self, event: &ServiceEvent) {
        self.log
            .events
            .lock()
            .unwrap()
            .push((event.seq, event.kind));
    }
}

/// Collects framework events in arrival order.
#[derive(Default)]
pub struct FrameworkEventLog {
    events: Mutex<Vec<(FrameworkEventKind, Option<String>)>>,
}

impl FrameworkEventLog {
    pub fn kinds(&self) -> Vec<FrameworkEventKind> {
        self.events.lock().unwrap().iter().map(|(k, _)| *k).collect()
    }
}

pub struct CollectingFrameworkListener {
    pub log: Arc<FrameworkEventLog>,
}

#[async_trait]
impl FrameworkListener for CollectingFrameworkListener {
    async fn framework_event(&self, event: &FrameworkEvent) {
        self.log
            .events
            .lock()
            .unwrap()
            .push((event.kind, event.message.clone()));
    }
}
