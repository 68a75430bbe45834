//! Tests for the in-memory cache tier.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use punchclock::{MemoryCache, MemoryCacheConfig, PunchclockError, Result};

// ============================================================================
// Helpers
// ============================================================================

/// A fetch that counts its invocations and resolves after `delay`.
fn slow_fetch(
    calls: &Arc<AtomicU32>,
    delay: Duration,
    value: &'static str,
) -> impl std::future::Future<Output = Result<String>> + Send + 'static {
    let calls = Arc::clone(calls);
    async move {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        Ok(value.to_string())
    }
}

// ============================================================================
// Coalescing
// ============================================================================

#[tokio::test]
async fn concurrent_callers_share_one_fetch() {
    let cache = MemoryCache::default();
    let calls = Arc::new(AtomicU32::new(0));

    let callers = (0..10).map(|_| {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        async move {
            cache
                .get_or_fetch(
                    "workspaces",
                    || slow_fetch(&calls, Duration::from_millis(50), "ws"),
                    None,
                )
                .await
        }
    });
    let results = join_all(callers).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(result.unwrap(), "ws");
    }
    assert_eq!(cache.stats().pending_requests, 0);
    assert_eq!(cache.get::<String>("workspaces").as_deref(), Some("ws"));
}

#[tokio::test]
async fn concurrent_callers_across_tasks_share_one_fetch() {
    let cache = MemoryCache::default();
    let calls = Arc::new(AtomicU32::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .get_or_fetch(
                        "projects:ws1",
                        || slow_fetch(&calls, Duration::from_millis(50), "p"),
                        None,
                    )
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "p");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn distinct_keys_fetch_independently() {
    let cache = MemoryCache::default();
    let calls = Arc::new(AtomicU32::new(0));

    let (a, b) = tokio::join!(
        cache.get_or_fetch("tags:a", || slow_fetch(&calls, Duration::from_millis(20), "a"), None),
        cache.get_or_fetch("tags:b", || slow_fetch(&calls, Duration::from_millis(20), "b"), None),
    );

    assert_eq!(a.unwrap(), "a");
    assert_eq!(b.unwrap(), "b");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn pending_request_is_visible_in_stats() {
    let cache = MemoryCache::default();
    let calls = Arc::new(AtomicU32::new(0));

    let background = {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        tokio::spawn(async move {
            cache
                .get_or_fetch(
                    "user",
                    || slow_fetch(&calls, Duration::from_millis(100), "me"),
                    None,
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(cache.stats().pending_requests, 1);

    background.await.unwrap().unwrap();
    assert_eq!(
        cache.stats(),
        punchclock::CacheStats {
            cache_size: 1,
            pending_requests: 0
        }
    );
}

// ============================================================================
// Failure propagation
// ============================================================================

#[tokio::test]
async fn failure_reaches_every_joiner_and_is_not_cached() {
    let cache = MemoryCache::default();
    let calls = Arc::new(AtomicU32::new(0));

    let failing = |calls: &Arc<AtomicU32>| {
        let calls = Arc::clone(calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            Err::<String, _>(PunchclockError::Api {
                status: 502,
                message: "bad gateway".into(),
            })
        }
    };

    let callers = (0..5).map(|_| cache.get_or_fetch("favorites:ws1", || failing(&calls), None));
    let results = join_all(callers).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert!(matches!(result, Err(PunchclockError::Api { status: 502, .. })));
    }
    assert_eq!(cache.get::<String>("favorites:ws1"), None);
    assert_eq!(cache.stats().pending_requests, 0);

    // The next call starts a fresh fetch
    let value = cache
        .get_or_fetch(
            "favorites:ws1",
            || slow_fetch(&calls, Duration::ZERO, "ok"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(value, "ok");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Expiry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn expired_entry_triggers_refetch() {
    let cache = MemoryCache::new(MemoryCacheConfig::new().default_ttl(Duration::from_secs(60)));
    let calls = Arc::new(AtomicU32::new(0));
    let ttl = Some(Duration::from_secs(10));

    cache
        .get_or_fetch("running:ws1:u1", || slow_fetch(&calls, Duration::ZERO, "e1"), ttl)
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(9)).await;
    cache
        .get_or_fetch("running:ws1:u1", || slow_fetch(&calls, Duration::ZERO, "e1"), ttl)
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    let value = cache
        .get_or_fetch("running:ws1:u1", || slow_fetch(&calls, Duration::ZERO, "e2"), ttl)
        .await
        .unwrap();
    assert_eq!(value, "e2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn expiry_is_exclusive_at_the_deadline() {
    let cache = MemoryCache::default();
    cache.set("k", 1u32, Some(Duration::from_secs(5)));

    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(cache.get::<u32>("k"), None);
    assert_eq!(cache.stats().cache_size, 0);
}

// ============================================================================
// Invalidation
// ============================================================================

#[tokio::test]
async fn delete_pattern_matches_substrings() {
    let cache = MemoryCache::default();
    cache.set("running:ws1:u1", 1u32, None);
    cache.set("running:ws1:u2", 2u32, None);
    cache.set("running:ws2:u1", 3u32, None);
    cache.set("projects:ws1", 4u32, None);

    assert_eq!(cache.delete_pattern("running:ws1:"), 2);
    assert_eq!(cache.get::<u32>("running:ws2:u1"), Some(3));
    assert_eq!(cache.get::<u32>("projects:ws1"), Some(4));
    assert_eq!(cache.delete_pattern("nothing"), 0);
}
