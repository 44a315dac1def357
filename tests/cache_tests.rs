use std::time::Duration;

use file_share::cache::{invalidate_user, user_files_key, user_prefix, Cache, MemoryCache};

#[tokio::test]
async fn test_set_get_delete() {
    let cache = MemoryCache::new();
    cache
        .set("k", "v".to_string(), Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

    cache.delete("k").await.unwrap();
    assert_eq!(cache.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_deleting_missing_keys_is_a_no_op() {
    let cache = MemoryCache::new();
    cache.delete("never-set").await.unwrap();
    cache.delete("never-set").await.unwrap();
    assert_eq!(cache.delete_prefix("user:nobody:").await.unwrap(), 0);
}

#[tokio::test]
async fn test_entries_expire() {
    let cache = MemoryCache::new();
    cache
        .set("short", "v".to_string(), Duration::from_millis(20))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cache.get("short").await.unwrap(), None);
}

#[tokio::test]
async fn test_invalidate_user_only_touches_that_user() {
    let cache = MemoryCache::new();
    let ttl = Duration::from_secs(60);
    cache.set(&user_files_key("U1"), "[]".into(), ttl).await.unwrap();
    cache
        .set(&format!("{}other", user_prefix("U1")), "x".into(), ttl)
        .await
        .unwrap();
    cache.set(&user_files_key("U10"), "[]".into(), ttl).await.unwrap();
    cache.set(&user_files_key("U2"), "[]".into(), ttl).await.unwrap();

    invalidate_user(&cache, "U1").await;

    assert_eq!(cache.get(&user_files_key("U1")).await.unwrap(), None);
    assert!(cache.get(&user_files_key("U10")).await.unwrap().is_some());
    assert!(cache.get(&user_files_key("U2")).await.unwrap().is_some());
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn test_concurrent_writers() {
    let cache = std::sync::Arc::new(MemoryCache::new());
    let mut handles = Vec::new();
    for i in 0..8 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..50 {
                cache
                    .set(&format!("user:{i}:{j}"), "v".into(), Duration::from_secs(60))
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(cache.len(), 400);
    assert_eq!(cache.delete_prefix("user:3:").await.unwrap(), 50);
}
