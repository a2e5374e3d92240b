//! Catalog worker behavior against an in-process catalog.

use routesync::core::RawServiceRecord;
use routesync::prelude::*;
use routesync::provider::BackoffPolicy;
use routesync::settings::CatalogSettings;
use routesync::sources::MemoryCatalog;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        initial_interval: Duration::from_millis(10),
        max_interval: Duration::from_millis(50),
        multiplier: 1.5,
        randomization_factor: 0.5,
    }
}

fn start(catalog: &MemoryCatalog, wait_time: Duration) -> (ConfigSyncHandle, mpsc::Receiver<ConfigMessage>) {
    let settings = CatalogSettings {
        domain: "localhost".to_string(),
        ..Default::default()
    };
    let provider = CatalogProvider::from_settings(catalog.clone(), &settings)
        .unwrap()
        .with_wait_time(wait_time);
    ConfigSync::new()
        .with_backoff(fast_backoff())
        .with_channel_capacity(4)
        .with_provider(provider)
        .start()
}

async fn next(rx: &mut mpsc::Receiver<ConfigMessage>) -> ConfigMessage {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

async fn assert_quiet(rx: &mut mpsc::Receiver<ConfigMessage>) {
    assert!(timeout(QUIET, rx.recv()).await.is_err(), "unexpected publication");
}

async fn wait_for_state(handle: &ConfigSyncHandle, state: ProviderState) {
    let mut states = handle.subscribe_state("consul_catalog").unwrap();
    timeout(WAIT, states.wait_for(|current| *current == state))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_unchanged_catalog_is_not_republished() {
    let catalog = MemoryCatalog::new();
    catalog.register(RawServiceRecord::new("web", "n1", "10.0.0.1", 80).with_tags(["traefik.backend.weight=5"]));
    let (handle, mut rx) = start(&catalog, Duration::from_millis(50));

    let first = next(&mut rx).await;
    assert_eq!(first.configuration.backends["backend-web"].servers.len(), 1);

    let fetches = catalog.node_fetches("web");
    catalog.touch();
    catalog.touch();
    assert_quiet(&mut rx).await;
    assert!(catalog.node_fetches("web") > fetches);

    catalog.register(RawServiceRecord::new("web", "n2", "10.0.0.2", 80));
    let second = next(&mut rx).await;
    let servers = &second.configuration.backends["backend-web"].servers;
    assert_eq!(servers.len(), 2);
    assert_eq!(servers.values().map(|s| s.weight).collect::<Vec<_>>(), vec![5, 1]);

    let latest = handle.latest("consul_catalog").unwrap();
    assert_eq!(*latest, second.configuration);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_instance_tag_change_is_republished() {
    let weighted = "traefik.backend.weight=5";
    let catalog = MemoryCatalog::new();
    catalog.register(RawServiceRecord::new("web", "a", "10.0.0.1", 80).with_tags([weighted]));
    catalog.register(RawServiceRecord::new("web", "b", "10.0.0.2", 80));
    let (handle, mut rx) = start(&catalog, Duration::from_millis(50));

    let weights = |message: &ConfigMessage| -> Vec<i32> {
        message.configuration.backends["backend-web"]
            .servers
            .values()
            .map(|server| server.weight)
            .collect()
    };
    assert_eq!(weights(&next(&mut rx).await), vec![5, 1]);

    // The service's tag union is unchanged; only instance b differs.
    catalog.deregister("web", "b");
    catalog.register(RawServiceRecord::new("web", "b", "10.0.0.2", 80).with_tags([weighted]));
    loop {
        let message = next(&mut rx).await;
        if weights(&message) == vec![5, 5] {
            break;
        }
        assert_eq!(weights(&message), vec![5], "unexpected intermediate state");
    }
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_partial_fetch_failure_publishes_nothing() {
    let catalog = MemoryCatalog::new();
    catalog.register(RawServiceRecord::new("api", "n1", "10.0.0.1", 8080));
    catalog.register(RawServiceRecord::new("web", "n1", "10.0.0.1", 80));
    catalog.set_failing_service("web", true);
    let (handle, mut rx) = start(&catalog, Duration::from_millis(50));

    assert_quiet(&mut rx).await;
    assert!(catalog.list_calls() > 1, "worker should keep retrying");

    catalog.set_failing_service("web", false);
    let message = next(&mut rx).await;
    assert!(message.configuration.backends.contains_key("backend-api"));
    assert!(message.configuration.backends.contains_key("backend-web"));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reconnect_after_outage_does_not_republish() {
    let catalog = MemoryCatalog::new();
    catalog.register(RawServiceRecord::new("web", "n1", "10.0.0.1", 80));
    let (handle, mut rx) = start(&catalog, Duration::from_millis(50));
    next(&mut rx).await;

    catalog.set_unreachable(true);
    wait_for_state(&handle, ProviderState::Backoff).await;
    catalog.set_unreachable(false);
    wait_for_state(&handle, ProviderState::Watching).await;
    assert_quiet(&mut rx).await;

    catalog.deregister("web", "n1");
    let message = next(&mut rx).await;
    assert!(message.configuration.backends.is_empty());
    assert!(message.configuration.frontends.is_empty());
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_never_gives_up() {
    let catalog = MemoryCatalog::new();
    catalog.set_unreachable(true);
    let (handle, mut rx) = start(&catalog, Duration::from_millis(50));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(catalog.list_calls() >= 5);
    assert_ne!(handle.state("consul_catalog"), Some(ProviderState::Stopped));

    catalog.set_unreachable(false);
    catalog.register(RawServiceRecord::new("web", "n1", "10.0.0.1", 80));
    assert!(next(&mut rx).await.configuration.backends.contains_key("backend-web"));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_interrupts_blocking_query() {
    let catalog = MemoryCatalog::new();
    catalog.register(RawServiceRecord::new("web", "n1", "10.0.0.1", 80));
    let (handle, mut rx) = start(&catalog, Duration::from_secs(300));
    next(&mut rx).await;

    timeout(WAIT, handle.shutdown()).await.unwrap().unwrap();
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_disabled_and_constrained_services() {
    let catalog = MemoryCatalog::new();
    catalog.register(RawServiceRecord::new("web", "n1", "10.0.0.1", 80).with_tags(["traefik.tags=public"]));
    catalog.register(RawServiceRecord::new("admin", "n1", "10.0.0.1", 81).with_tags(["traefik.tags=internal"]));
    catalog.register(RawServiceRecord::new("db", "n1", "10.0.0.1", 5432).with_tags(["traefik.enable=false", "traefik.tags=public"]));

    let settings = CatalogSettings {
        domain: "example.com".to_string(),
        constraints: vec!["tag==public".to_string()],
        ..Default::default()
    };
    let provider = CatalogProvider::from_settings(catalog.clone(), &settings)
        .unwrap()
        .with_wait_time(Duration::from_millis(50));
    let (handle, mut rx) = ConfigSync::new().with_provider(provider).start();

    let message = next(&mut rx).await;
    let backends: Vec<&String> = message.configuration.backends.keys().collect();
    assert_eq!(backends, vec!["backend-web"]);
    assert_eq!(
        message.configuration.frontends["frontend-web"].routes["route-host-web"].rule,
        "Host:web.example.com"
    );
    handle.shutdown().await.unwrap();
}
