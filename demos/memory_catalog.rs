//! Example running a catalog worker against an in-process catalog.
//!
//! This example shows how to:
//! - Start a worker and consume its configurations
//! - See that idempotent catalog writes are not republished
//! - Watch the worker back off during an outage and reconnect
//!
//! Run with: RUST_LOG=routesync=debug cargo run --example memory_catalog

use routesync::core::RawServiceRecord;
use routesync::prelude::*;
use routesync::settings::CatalogSettings;
use routesync::sources::MemoryCatalog;
use std::time::Duration;
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

    println!("=== Memory Catalog Example ===\n");

    let catalog = MemoryCatalog::new();
    catalog.register(
        RawServiceRecord::new("web", "node-1", "10.0.0.1", 80).with_tags([
            "traefik.backend.loadbalancer=drr",
            "traefik.frontend.entryPoints=http,https",
        ]),
    );

    let settings = CatalogSettings {
        domain: "example.com".to_string(),
        wait_time_ms: 500,
        ..Default::default()
    };
    let provider = CatalogProvider::from_settings(catalog.clone(), &settings)?;
    let (handle, mut updates) = ConfigSync::new().with_provider(provider).start();

    let printer = tokio::spawn(async move {
        while let Some(message) = updates.recv().await {
            println!("--- {} ---", message.provider_name);
            for (name, backend) in &message.configuration.backends {
                println!("{}: {} server(s)", name, backend.servers.len());
            }
            for (name, frontend) in &message.configuration.frontends {
                for route in frontend.routes.values() {
                    println!("{} -> {} [{}]", name, frontend.backend, route.rule);
                }
            }
            println!();
        }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("Idempotent write (nothing should be published)\n");
    catalog.touch();

    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("Adding a second instance\n");
    catalog.register(RawServiceRecord::new("web", "node-2", "10.0.0.2", 80).with_tags(["traefik.backend.weight=3"]));

    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("Simulating an outage\n");
    catalog.set_unreachable(true);
    tokio::time::sleep(Duration::from_secs(2)).await;
    println!("State during outage: {:?}\n", handle.state("consul_catalog"));
    catalog.set_unreachable(false);

    tokio::time::sleep(Duration::from_secs(2)).await;
    println!("State after recovery: {:?}\n", handle.state("consul_catalog"));

    handle.shutdown().await?;
    let _ = printer.await;
    println!("✓ Example complete");
    Ok(())
}
