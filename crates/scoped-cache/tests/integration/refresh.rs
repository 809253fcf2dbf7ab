use scoped_cache::ScopedCache;

use crate::{Connections, connection_cache, setup, wait_until};

#[tokio::test]
async fn test_refresh_keeps_serving_previous_connection() {
    setup();
    let connections = Connections::gated(1);
    let cache = connection_cache(&connections, ScopedCache::builder());

    assert_eq!(cache.get(1).await.unwrap().serial, 1);

    let refresh = tokio::spawn({
        let cache = cache.clone();
        async move { cache.refresh(1).await }
    });
    wait_until(|| connections.attempts() == 2).await;

    // the refresh is still waiting for its connection
    assert_eq!(cache.get(1).await.unwrap().serial, 1);
    assert_eq!(connections.open_count(), 1);

    connections.release(1);
    refresh.await.unwrap().unwrap();

    assert_eq!(cache.get(1).await.unwrap().serial, 2);
    // the previous connection was closed when it got replaced
    assert_eq!(connections.open_count(), 1);
}

#[tokio::test]
async fn test_invalidate_forces_new_connection() {
    setup();
    let connections = Connections::gated(1);
    let cache = connection_cache(&connections, ScopedCache::builder());

    assert_eq!(cache.get(1).await.unwrap().serial, 1);
    cache.invalidate(&1);
    assert_eq!(connections.open_count(), 0);

    let get = tokio::spawn({
        let cache = cache.clone();
        async move { cache.get(1).await.map(|connection| connection.serial) }
    });
    wait_until(|| connections.attempts() == 2).await;
    // nothing left to serve in the meantime
    assert!(cache.contains(&1));
    assert_eq!(cache.entry_stats(&1), None);

    connections.release(1);
    assert_eq!(get.await.unwrap(), Ok(2));
    assert!(cache.entry_stats(&1).is_some());
}

#[tokio::test]
async fn test_concurrent_refreshes_share_connection() {
    setup();
    let connections = Connections::gated(1);
    let cache = connection_cache(&connections, ScopedCache::builder());
    drop(cache.get(1).await.unwrap());

    let refreshes: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.refresh(1).await })
        })
        .collect();
    wait_until(|| connections.attempts() == 2).await;
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }

    connections.release(1);
    for refresh in refreshes {
        refresh.await.unwrap().unwrap();
    }

    assert_eq!(connections.attempts(), 2);
    assert_eq!(cache.get(1).await.unwrap().serial, 2);
}
