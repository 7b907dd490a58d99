//! Service registry scenarios: typed lookup, event ordering, filters,
//! listener isolation, prototype scope.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bundlevisor::{
    BundleEventKind, DynService, FrameworkEventKind, PropValue, ServiceEventKind, ServiceFactory,
    ServiceFilter, ServiceProperties, ServiceReference, StartOptions, OBJECT_CLASS, SERVICE_ID,
};

use common::*;

struct Greeter {
    greeting: String,
}

#[tokio::test]
async fn register_and_fetch_a_typed_service() {
    let framework = started_framework(&[]).await;
    let ctx = framework.bundle_context().unwrap();

    let mut props = ServiceProperties::new();
    props.insert("lang".to_string(), PropValue::from("en"));
    let registration = ctx
        .register_service(
            Arc::new(Greeter {
                greeting: "hello".to_string(),
            }),
            props,
        )
        .await
        .unwrap();

    let reference = ctx
        .get_service_reference::<Greeter>()
        .expect("service is discoverable by type");
    assert!(reference.is_available());
    assert_eq!(reference.bundle_id(), 0);
    assert!(reference.property(SERVICE_ID).and_then(|v| v.as_int()).is_some());
    assert!(reference
        .property(OBJECT_CLASS)
        .and_then(|v| v.as_str().map(|s| s.contains("Greeter")))
        .unwrap_or(false));
    assert_eq!(
        reference.property("lang").and_then(|v| v.as_str().map(String::from)),
        Some("en".to_string())
    );

    let service = ctx
        .get_service::<Greeter>(&reference)
        .expect("service instance is fetchable");
    assert_eq!(service.greeting, "hello");
    assert!(registration.is_used_by(0));

    ctx.unget_service(&reference);
    assert!(!registration.is_used_by(0));

    registration.unregister().await.unwrap();
    assert!(!reference.is_available());
    assert!(ctx.get_service_reference::<Greeter>().is_none());
    assert!(ctx.get_service::<Greeter>(&reference).is_none());

    framework.stop().await.unwrap();
    framework.wait_for_stop(Duration::ZERO).await;
}

#[tokio::test]
async fn service_events_arrive_in_registration_order() {
    let framework = started_framework(&[]).await;
    let ctx = framework.bundle_context().unwrap();

    let log = Arc::new(ServiceEventLog::default());
    ctx.add_service_listener(Arc::new(CollectingServiceListener { log: log.clone() }), None)
        .unwrap();

    let registration = ctx
        .register_service(Arc::new(Greeter { greeting: "hi".to_string() }), HashMap::new())
        .await
        .unwrap();
    let mut props = ServiceProperties::new();
    props.insert("rev".to_string(), PropValue::Int(1));
    registration.set_properties(props).await.unwrap();
    let mut props = ServiceProperties::new();
    props.insert("rev".to_string(), PropValue::Int(2));
    registration.set_properties(props).await.unwrap();
    registration.unregister().await.unwrap();

    assert_eq!(
        log.kinds(),
        vec![
            ServiceEventKind::Registered,
            ServiceEventKind::Modified,
            ServiceEventKind::Modified,
            ServiceEventKind::Unregistering,
        ]
    );
    let seqs = log.seqs();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]), "seqs not monotonic: {seqs:?}");

    framework.stop().await.unwrap();
    framework.wait_for_stop(Duration::ZERO).await;
}

#[tokio::test]
async fn filtered_listeners_see_modified_and_endmatch() {
    let framework = started_framework(&[]).await;
    let ctx = framework.bundle_context().unwrap();

    let log = Arc::new(ServiceEventLog::default());
    let filter: ServiceFilter = Arc::new(|props: &ServiceProperties| {
        props.get("flag").and_then(PropValue::as_bool).unwrap_or(false)
    });
    ctx.add_service_listener(
        Arc::new(CollectingServiceListener { log: log.clone() }),
        Some(filter),
    )
    .unwrap();

    let mut props = ServiceProperties::new();
    props.insert("flag".to_string(), PropValue::Bool(true));
    let registration = ctx
        .register_service(Arc::new(Greeter { greeting: "hi".to_string() }), props)
        .await
        .unwrap();

    // true -> false: the filter stops matching.
    let mut props = ServiceProperties::new();
    props.insert("flag".to_string(), PropValue::Bool(false));
    registration.set_properties(props).await.unwrap();

    // false -> false: neither old nor new match; silence.
    let mut props = ServiceProperties::new();
    props.insert("flag".to_string(), PropValue::Bool(false));
    registration.set_properties(props).await.unwrap();

    // false -> true: matching again.
    let mut props = ServiceProperties::new();
    props.insert("flag".to_string(), PropValue::Bool(true));
    registration.set_properties(props).await.unwrap();

    assert_eq!(
        log.kinds(),
        vec![
            ServiceEventKind::Registered,
            ServiceEventKind::ModifiedEndmatch,
            ServiceEventKind::Modified,
        ]
    );

    framework.stop().await.unwrap();
    framework.wait_for_stop(Duration::ZERO).await;
}

#[tokio::test]
async fn panicking_listener_does_not_starve_the_next_one() {
    let framework = started_framework(&[]).await;
    let ctx = framework.bundle_context().unwrap();

    let fw_log = Arc::new(FrameworkEventLog::default());
    ctx.add_framework_listener(Arc::new(CollectingFrameworkListener { log: fw_log.clone() }))
        .unwrap();

    // First listener panics on every event; the second must still see all.
    ctx.add_bundle_listener(Arc::new(PanickingBundleListener)).unwrap();
    let log = Arc::new(BundleEventLog::default());
    ctx.add_bundle_listener(Arc::new(CollectingBundleListener { log: log.clone() }))
        .unwrap();

    let journal = journal();
    let probe = ActivatorProbe::new("b1", &journal);
    let bundle = ctx
        .install_bundle("b1", recording(&probe, Duration::ZERO, Duration::ZERO))
        .await
        .unwrap();
    bundle.start(StartOptions::default()).await.unwrap();

    assert_eq!(
        log.kinds(),
        vec![
            BundleEventKind::Installed,
            BundleEventKind::Starting,
            BundleEventKind::Started,
        ]
    );
    // Each swallowed panic was reported through the error channel.
    assert!(fw_log.kinds().contains(&FrameworkEventKind::Error));

    framework.stop().await.unwrap();
    framework.wait_for_stop(Duration::ZERO).await;
}

struct Session {
    serial: u64,
}

struct SessionFactory {
    made: AtomicU64,
}

impl ServiceFactory for SessionFactory {
    fn get_service(&self, _bundle_id: u64, _reference: &ServiceReference) -> DynService {
        let instance: DynService = Arc::new(Session {
            serial: self.made.fetch_add(1, Ordering::SeqCst),
        });
        instance
    }
}

#[tokio::test]
async fn prototype_factory_hands_out_distinct_instances() {
    let framework = started_framework(&[]).await;
    let ctx = framework.bundle_context().unwrap();

    let registration = ctx
        .register_service_factory::<Session>(
            Arc::new(SessionFactory {
                made: AtomicU64::new(0),
            }),
            HashMap::new(),
        )
        .await
        .unwrap();

    let reference = ctx.get_service_reference::<Session>().unwrap();
    let first = ctx.get_service::<Session>(&reference).unwrap();
    let second = ctx.get_service::<Session>(&reference).unwrap();
    assert_ne!(first.serial, second.serial, "prototype instances are distinct");
    assert!(registration.is_used_by(0));

    ctx.unget_service(&reference);
    assert!(registration.is_used_by(0), "one prototype instance remains");
    ctx.unget_service(&reference);
    assert!(!registration.is_used_by(0));

    framework.stop().await.unwrap();
    framework.wait_for_stop(Duration::ZERO).await;
}

#[tokio::test]
async fn framework_properties_are_preserved() {
    let framework = started_framework(&[("embedding.banner", "v7")]).await;
    let ctx = framework.bundle_context().unwrap();
    assert_eq!(ctx.property("embedding.banner").as_deref(), Some("v7"));
    assert_eq!(ctx.property("absent"), None);

    framework.stop().await.unwrap();
    framework.wait_for_stop(Duration::ZERO).await;
}
