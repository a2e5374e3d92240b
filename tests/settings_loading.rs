//! Settings files, environment overrides and validation.

use routesync::prelude::*;
use routesync::sources::StoreBackend;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_toml_and_json_files_merge_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("base.toml");
    let local = temp_dir.path().join("local.json");

    fs::write(
        &base,
        r#"
channel_capacity = 32

[catalog]
endpoint = "consul.service:8500"
domain = "example.com"
exposed_by_default = false

[kv]
backend = "zookeeper"
endpoints = ["zk1:2181", "zk2:2181"]
"#,
    )
    .unwrap();
    fs::write(&local, r#"{"catalog": {"domain": "local.test"}, "backoff": {"multiplier": 2.0}}"#).unwrap();

    let settings = SettingsLoader::new()
        .with_file(&base)
        .with_file(&local)
        .load()
        .unwrap();

    assert_eq!(settings.channel_capacity, 32);
    let catalog = settings.catalog.unwrap();
    assert_eq!(catalog.domain, "local.test");
    assert_eq!(catalog.endpoint_url(), "http://consul.service:8500");
    assert!(!catalog.exposed_by_default);
    assert_eq!(settings.backoff.multiplier, 2.0);

    let kv = settings.kv.unwrap();
    assert_eq!(kv.backend, StoreBackend::Zookeeper);
    assert_eq!(kv.endpoints.len(), 2);
    assert!(kv.watch);
}

#[test]
fn test_env_overrides_apply_last() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("routesync.yaml");
    fs::write(&path, "catalog:\n  domain: example.com\n  wait_time_ms: 1000\n").unwrap();

    let settings = SettingsLoader::new()
        .with_file(&path)
        .with_env_overrides("APP")
        .with_env_vars([
            ("APP_CATALOG__DOMAIN", "override.test"),
            ("APP_CATALOG__CONSTRAINTS", "tag==web,tag!=canary"),
            ("APP_BACKOFF__MAX_INTERVAL_MS", "2000"),
            ("OTHER_CATALOG__DOMAIN", "ignored"),
        ])
        .load()
        .unwrap();

    let catalog = settings.catalog.unwrap();
    assert_eq!(catalog.domain, "override.test");
    assert_eq!(catalog.wait_time_ms, 1000);
    assert_eq!(catalog.constraints, vec!["tag==web", "tag!=canary"]);
    assert_eq!(settings.backoff.max_interval_ms, 2000);
}

#[test]
fn test_validation_reports_every_problem() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.yaml");
    fs::write(
        &path,
        r#"
channel_capacity: 0
catalog:
  frontend_rule: "Host:{{getTag}}"
  constraints: ["name==web"]
kv:
  endpoints: []
"#,
    )
    .unwrap();

    match SettingsLoader::new().with_file(&path).load() {
        Err(ProviderError::Validation(message)) => {
            assert!(message.contains("channel_capacity"));
            assert!(message.contains("catalog.frontend_rule"));
            assert!(message.contains("kv.endpoints"));
        }
        other => panic!("expected a validation error, got {:?}", other),
    }
}

#[test]
fn test_malformed_file_is_settings_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bad.yaml");
    fs::write(&path, "catalog: [unclosed").unwrap();

    let result = SettingsLoader::new().with_file(&path).load();
    assert!(matches!(result, Err(ProviderError::Settings(_))));
}

#[tokio::test]
async fn test_sync_from_settings_without_sources() {
    let settings = SettingsLoader::new().load().unwrap();
    let (handle, mut updates) = ConfigSync::from_settings(&settings).unwrap().start();
    assert!(handle.provider_names().is_empty());
    assert!(updates.recv().await.is_none());
    handle.join().await.unwrap();
}
