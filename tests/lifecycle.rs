//! Bundle lifecycle scenarios: happy path, timeout, uninstall race,
//! worker keep-alive, and state-machine edges.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bundlevisor::{
    BundleEventKind, BundleState, FrameworkError, StartOptions, StopOptions,
    FRAMEWORK_STARTSTOP_TIMEOUT_MS, FRAMEWORK_WORKER_KEEPALIVE_MS, STATE_ACTIVE_SET,
};

use common::*;

#[tokio::test]
async fn happy_start_stop_walks_the_lifecycle() {
    let framework = started_framework(&[]).await;
    let ctx = framework.bundle_context().expect("active framework has a context");

    let journal = journal();
    let probe = ActivatorProbe::new("b1", &journal);
    let b1 = ctx
        .install_bundle("b1", recording(&probe, ms(10), ms(10)))
        .await
        .expect("install succeeds");
    assert_eq!(b1.state(), BundleState::Installed);

    let log = Arc::new(BundleEventLog::default());
    let token = ctx
        .add_bundle_listener(Arc::new(CollectingBundleListener { log: log.clone() }))
        .unwrap();

    b1.start(StartOptions::default()).await.expect("start succeeds");
    assert_eq!(b1.state(), BundleState::Active);

    b1.stop(StopOptions::default()).await.expect("stop succeeds");
    assert_eq!(b1.state(), BundleState::Resolved);

    // Exactly the four transition events, in order.
    assert_eq!(
        log.kinds(),
        vec![
            BundleEventKind::Starting,
            BundleEventKind::Started,
            BundleEventKind::Stopping,
            BundleEventKind::Stopped,
        ]
    );
    let seqs = log.seqs();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]), "seqs not monotonic: {seqs:?}");

    // The activator's start ran exactly once, before its stop.
    assert_eq!(journal_entries(&journal), vec!["b1:start", "b1:stop"]);
    assert!(probe.was_dropped(), "activator is released after stop");

    ctx.remove_bundle_listener(token);
    framework.stop().await.unwrap();
    framework.wait_for_stop(Duration::ZERO).await;
}

#[tokio::test]
async fn start_is_idempotent_on_active() {
    let framework = started_framework(&[]).await;
    let ctx = framework.bundle_context().unwrap();
    let journal = journal();
    let probe = ActivatorProbe::new("b1", &journal);
    let b1 = ctx
        .install_bundle("b1", recording(&probe, Duration::ZERO, Duration::ZERO))
        .await
        .unwrap();

    b1.start(StartOptions::default()).await.unwrap();
    b1.start(StartOptions::default()).await.unwrap();
    assert_eq!(probe.starts(), 1);

    framework.stop().await.unwrap();
    framework.wait_for_stop(Duration::ZERO).await;
}

#[tokio::test]
async fn start_timeout_disowns_the_activator() {
    let framework = started_framework(&[(FRAMEWORK_STARTSTOP_TIMEOUT_MS, "50")]).await;
    let ctx = framework.bundle_context().unwrap();

    let journal = journal();
    let probe = ActivatorProbe::new("b1", &journal);
    let b1 = ctx
        .install_bundle("b1", recording(&probe, ms(200), Duration::ZERO))
        .await
        .unwrap();

    let log = Arc::new(BundleEventLog::default());
    ctx.add_bundle_listener(Arc::new(CollectingBundleListener { log: log.clone() }))
        .unwrap();

    let err = b1
        .start(StartOptions::default())
        .await
        .expect_err("start must time out");
    assert!(err.is_timeout(), "unexpected error: {err}");
    assert!(
        err.to_string().contains("Time-out during bundle start()"),
        "unexpected message: {err}"
    );
    assert_eq!(b1.state(), BundleState::Resolved);

    // StartFailed cleanup announced the unwind.
    assert_eq!(
        log.kinds(),
        vec![
            BundleEventKind::Starting,
            BundleEventKind::Stopping,
            BundleEventKind::Stopped,
        ]
    );

    // The quarantined callback finishes on its own; the instance is then
    // released. It was only ever started once.
    tokio::time::sleep(ms(300)).await;
    assert_eq!(probe.starts(), 1);
    assert!(probe.was_dropped());

    framework.stop().await.unwrap();
    framework.wait_for_stop(Duration::ZERO).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn uninstall_aborts_an_inflight_start() {
    // Unbounded start/stop budget; the activator blocks forever.
    let framework = started_framework(&[]).await;
    let ctx = framework.bundle_context().unwrap();

    let journal = journal();
    let probe = ActivatorProbe::new("b1", &journal);
    let b1 = ctx
        .install_bundle("b1", blocking_start(&probe))
        .await
        .unwrap();

    let log = Arc::new(BundleEventLog::default());
    ctx.add_bundle_listener(Arc::new(CollectingBundleListener { log: log.clone() }))
        .unwrap();

    let starter = {
        let b1 = b1.clone();
        tokio::spawn(async move { b1.start(StartOptions::default()).await })
    };
    // Let the start reach the activator.
    tokio::time::sleep(ms(100)).await;
    assert_eq!(probe.starts(), 1);
    assert_eq!(b1.state(), BundleState::Starting);

    b1.uninstall().await.expect("uninstall succeeds");
    assert_eq!(b1.state(), BundleState::Uninstalled);

    let err = starter
        .await
        .expect("starter task completes")
        .expect_err("start observes the uninstall");
    assert!(
        err.to_string().contains("Bundle uninstalled during start()"),
        "unexpected message: {err}"
    );
    assert!(
        log.kinds().contains(&BundleEventKind::Uninstalled),
        "uninstall event was delivered: {:?}",
        log.kinds()
    );

    // Terminal state: nothing more is legal.
    let err = b1.start(StartOptions::default()).await.unwrap_err();
    assert!(matches!(err, FrameworkError::IllegalState { .. }));
    let err = b1.uninstall().await.unwrap_err();
    assert!(matches!(err, FrameworkError::IllegalState { .. }));

    framework.stop().await.unwrap();
    framework.wait_for_stop(Duration::ZERO).await;
}

#[tokio::test]
async fn idle_workers_retire_without_breaking_dispatch() {
    let framework = started_framework(&[(FRAMEWORK_WORKER_KEEPALIVE_MS, "100")]).await;
    let ctx = framework.bundle_context().unwrap();

    let journal = journal();
    let probe = ActivatorProbe::new("b", &journal);
    let bundle = ctx
        .install_bundle("b", recording(&probe, Duration::ZERO, Duration::ZERO))
        .await
        .unwrap();

    // Long idle: the install-event worker retires itself.
    tokio::time::sleep(ms(400)).await;

    // A fresh (or reaped) worker serves the start transparently.
    bundle.start(StartOptions::default()).await.unwrap();
    assert_eq!(bundle.state(), BundleState::Active);
    let active: Vec<u64> = ctx
        .bundles()
        .into_iter()
        .filter(|b| b.state().is_in(STATE_ACTIVE_SET))
        .map(|b| b.id())
        .collect();
    assert!(active.contains(&bundle.id()));

    framework.stop().await.unwrap();
    framework.wait_for_stop(Duration::ZERO).await;
}

#[tokio::test]
async fn install_rejects_duplicate_names() {
    let framework = started_framework(&[]).await;
    let ctx = framework.bundle_context().unwrap();
    let journal = journal();
    let probe = ActivatorProbe::new("dup", &journal);

    ctx.install_bundle("dup", recording(&probe, Duration::ZERO, Duration::ZERO))
        .await
        .unwrap();
    let err = ctx
        .install_bundle("dup", recording(&probe, Duration::ZERO, Duration::ZERO))
        .await
        .unwrap_err();
    assert!(matches!(err, FrameworkError::Duplicate { .. }));
    assert_eq!(err.as_label(), "duplicate_bundle");

    framework.stop().await.unwrap();
    framework.wait_for_stop(Duration::ZERO).await;
}

#[tokio::test]
async fn failing_activator_lands_in_resolved() {
    let framework = started_framework(&[]).await;
    let ctx = framework.bundle_context().unwrap();

    let bundle = ctx
        .install_bundle("flaky", || {
            bundlevisor::FnActivator::arc(
                |_ctx| async { Err("refusing to start".into()) },
                |_ctx| async { Ok(()) },
            )
        })
        .await
        .unwrap();

    let err = bundle.start(StartOptions::default()).await.unwrap_err();
    assert!(matches!(err, FrameworkError::ActivatorFailed { .. }));
    assert!(err.to_string().contains("refusing to start"), "{err}");
    assert_eq!(bundle.state(), BundleState::Resolved);

    framework.stop().await.unwrap();
    framework.wait_for_stop(Duration::ZERO).await;
}
