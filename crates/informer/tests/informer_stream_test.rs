//! Drives an informer from a scripted watch stream.

use anyhow::Context;
use futures::stream;
use informer::{NotificationKind, ObjectKey, informer};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube_runtime::watcher::Event;
use std::time::Duration;

fn pod(namespace: &str, name: &str, resource_version: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version: Some(resource_version.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_stream_errors_do_not_stop_the_informer() -> anyhow::Result<()> {
    let (informer, mirror, mut notifications) = informer::<Pod>();

    let events: Vec<Result<Event<Pod>, String>> = vec![
        Ok(Event::Init),
        Ok(Event::InitApply(pod("default", "web", "1"))),
        Ok(Event::InitDone),
        Err("connection reset by peer".to_string()),
        Ok(Event::Apply(pod("default", "web", "2"))),
        Ok(Event::Apply(pod("default", "worker", "3"))),
    ];
    informer.run(stream::iter(events)).await;

    assert!(mirror.has_synced());
    mirror.wait_for_sync(Duration::from_millis(10)).await?;

    let web = mirror
        .get_by_key(&ObjectKey::namespaced("default", "web"))
        .context("web should be cached")?;
    assert_eq!(web.metadata.resource_version.as_deref(), Some("2"));
    assert_eq!(mirror.len(), 2);

    let mut kinds = Vec::new();
    while let Ok(notification) = notifications.try_recv() {
        kinds.push(notification.kind());
    }
    assert_eq!(
        kinds,
        vec![NotificationKind::Add, NotificationKind::Update, NotificationKind::Add]
    );
    Ok(())
}

#[tokio::test]
async fn test_cache_served_while_stream_is_failing() {
    let (informer, mirror, _notifications) = informer::<Pod>();

    let events: Vec<Result<Event<Pod>, &str>> = vec![
        Ok(Event::Init),
        Ok(Event::InitApply(pod("default", "web", "1"))),
        Ok(Event::InitDone),
        Err("watch expired"),
        Err("connection refused"),
        Err("connection refused"),
    ];
    informer.run(stream::iter(events)).await;

    // Stale but intact
    assert_eq!(mirror.keys(), vec![ObjectKey::namespaced("default", "web")]);
}
