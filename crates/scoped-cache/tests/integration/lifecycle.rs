use std::time::Duration;

use scoped_cache::{Lease, ScopedCache};

use crate::{Connections, connection_cache, setup};

#[tokio::test]
async fn test_connection_closed_after_last_lease() {
    setup();
    let connections = Connections::new();
    let cache = connection_cache(&connections, ScopedCache::builder().name("connections"));

    let connection = cache.get(1).await.unwrap();
    let shared = connection.clone();
    assert_eq!(connections.open_count(), 1);

    cache.invalidate(&1);
    drop(connection);
    assert_eq!(connections.open_count(), 1);
    assert_eq!(shared.key, 1);

    drop(shared);
    assert_eq!(connections.open_count(), 0);
}

#[tokio::test]
async fn test_eviction_closes_connections() {
    setup();
    let connections = Connections::new();
    let cache = connection_cache(&connections, ScopedCache::builder().capacity(2));

    for key in 1..=5 {
        drop(cache.get(key).await.unwrap());
    }

    assert_eq!(connections.attempts(), 5);
    assert_eq!(connections.open_count(), 2);
    assert!(cache.contains(&4));
    assert!(cache.contains(&5));

    insta::assert_debug_snapshot!(cache.cache_stats(), @r###"
    CacheStats {
        hits: 0,
        misses: 5,
        size: 2,
    }
    "###);
}

#[tokio::test]
async fn test_leased_connection_survives_eviction() {
    setup();
    let connections = Connections::new();
    let cache = connection_cache(&connections, ScopedCache::builder().capacity(1));

    let first = cache.get(1).await.unwrap();
    drop(cache.get(2).await.unwrap());

    assert!(!cache.contains(&1));
    assert_eq!(connections.open_count(), 2);
    assert_eq!(Lease::owners(&first), 1);

    drop(first);
    assert_eq!(connections.open_count(), 1);
}

#[tokio::test]
async fn test_refused_connection_is_replayed() {
    setup();
    let connections = Connections::new();
    let cache = connection_cache(&connections, ScopedCache::builder());

    let err = cache.get(0).await.unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"lookup failed: connection refused");
    assert_eq!(
        cache.get(0).await.unwrap_err().into_lookup_error().as_deref(),
        Some("connection refused")
    );

    assert_eq!(connections.attempts(), 1);
    assert_eq!(connections.open_count(), 0);
    assert_eq!(cache.size(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_connection_is_reopened() {
    setup();
    let connections = Connections::new();
    let cache = connection_cache(
        &connections,
        ScopedCache::builder().time_to_live(Duration::from_secs(30)),
    );

    assert_eq!(cache.get(1).await.unwrap().serial, 1);
    tokio::time::advance(Duration::from_secs(20)).await;
    assert_eq!(cache.get(1).await.unwrap().serial, 1);

    tokio::time::advance(Duration::from_secs(20)).await;
    assert_eq!(cache.get(1).await.unwrap().serial, 2);
    assert_eq!(connections.open_count(), 1);
}

#[tokio::test]
async fn test_dropping_cache_closes_connections() {
    setup();
    let connections = Connections::new();
    let cache = connection_cache(&connections, ScopedCache::builder());

    for key in 1..=3 {
        drop(cache.get(key).await.unwrap());
    }
    assert_eq!(connections.open_count(), 3);

    let other_handle = cache.clone();
    drop(cache);
    assert_eq!(connections.open_count(), 3);

    drop(other_handle);
    assert_eq!(connections.open_count(), 0);
}

#[tokio::test]
async fn test_invalidate_all_closes_connections() {
    setup();
    let connections = Connections::new();
    let cache = connection_cache(&connections, ScopedCache::builder());

    for key in 1..=3 {
        drop(cache.get(key).await.unwrap());
    }
    cache.invalidate_all();

    assert_eq!(cache.size(), 0);
    assert_eq!(connections.open_count(), 0);
    assert!(matches!(cache.get_option(1).await, Ok(None)));
    assert_eq!(cache.get(1).await.unwrap().serial, 4);
}
