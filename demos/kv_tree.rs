//! Example loading routing configuration from a key tree.
//!
//! This example shows how to:
//! - Lay out backends, frontends and TLS entries below a root key
//! - Publish once with watching disabled
//! - Print the resulting configuration as JSON
//!
//! Run with: cargo run --example kv_tree

use routesync::prelude::*;
use routesync::settings::KvSettings;
use routesync::sources::MemoryKvStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "routesync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== KV Tree Example ===\n");

    let store = MemoryKvStore::new();
    for (key, value) in [
        ("/traefik/backends/api/servers/s1/url", "http://10.0.0.1:8080"),
        ("/traefik/backends/api/servers/s1/weight", "5"),
        ("/traefik/backends/api/servers/s2/url", "http://10.0.0.2:8080"),
        ("/traefik/backends/api/loadbalancer/method", "drr"),
        ("/traefik/backends/api/healthcheck/path", "/health"),
        ("/traefik/frontends/api/backend", "api"),
        ("/traefik/frontends/api/entrypoints", "https"),
        ("/traefik/frontends/api/routes/host/rule", "Host:api.example.com"),
        ("/traefik/frontends/orphan/backend", "missing"),
        ("/traefik/tlsconfiguration/api/entrypoints", "https"),
        ("/traefik/tlsconfiguration/api/certificate/certfile", "/certs/api.crt"),
        ("/traefik/tlsconfiguration/api/certificate/keyfile", "/certs/api.key"),
    ] {
        store.put(key, value);
    }

    let settings = KvSettings {
        watch: false,
        ..Default::default()
    };
    let provider = KvProvider::from_settings(store, &settings)?;
    let (handle, mut updates) = ConfigSync::new().with_provider(provider).start();

    while let Some(message) = updates.recv().await {
        println!("Published by '{}':", message.provider_name);
        match serde_json::to_string_pretty(&message.configuration) {
            Ok(json) => println!("{}\n", json),
            Err(e) => println!("Cannot serialize configuration: {}\n", e),
        }
    }

    handle.join().await?;
    println!("✓ Example complete (the orphan frontend was dropped)");
    Ok(())
}
