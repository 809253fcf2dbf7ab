use std::io::Write;
use std::time::Duration;

use scoped_cache::config::{Config, LogFormat};
use scoped_cache::{CacheConfig, ScopedCache};

use crate::{Connections, connection_cache, setup};

#[test]
fn test_load_config_file() {
    let dir = std::env::temp_dir().join(format!("scoped-cache-config-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config.yml");

    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
        file,
        "logging:\n  level: debug\n  format: json\nmetrics:\n  custom_tags:\n    region: eu\ncache:\n  name: connections\n  capacity: 16\n  time_to_live: 10m"
    )
    .unwrap();
    drop(file);

    let config = Config::get(Some(&path)).unwrap();
    std::fs::remove_dir_all(&dir).ok();

    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.metrics.statsd, None);
    assert_eq!(config.metrics.custom_tags["region"], "eu");
    assert_eq!(config.cache.capacity, 16);
    assert_eq!(config.cache.time_to_live, Some(Duration::from_secs(600)));
}

#[test]
fn test_missing_config_file() {
    let err = Config::get(Some("/this/does/not/exist.yml".as_ref())).unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"failed to open configuration file");
}

#[tokio::test(start_paused = true)]
async fn test_cache_from_config() {
    setup();
    let config: CacheConfig = serde_yaml::from_str(
        r#"
        name: connections
        capacity: 1
        time_to_live: 1m
        failure_time_to_live: 1s
        "#,
    )
    .unwrap();

    let connections = Connections::new();
    let cache = connection_cache(&connections, ScopedCache::builder().config(&config));

    drop(cache.get(1).await.unwrap());
    drop(cache.get(2).await.unwrap());
    assert!(!cache.contains(&1));
    assert_eq!(connections.open_count(), 1);

    // failures expire sooner than connections
    assert!(cache.get(0).await.is_err());
    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(cache.get(0).await.is_err());
    assert_eq!(connections.attempts(), 4);
}
