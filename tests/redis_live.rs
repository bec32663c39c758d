//! Runs the Lua scripts against a real server.
//!
//! ```text
//! REDIS_URL=redis://127.0.0.1:6379/15 cargo test --test redis_live
//! ```
//!
//! Without `REDIS_URL` every test returns early. Each test works on its own
//! keys and deletes them first.

mod common;

use rate_guard_bucket::distributed::script::MAX_SCRIPT_UNITS;
use rate_guard_bucket::{Bucket, RedisStorage, RedisStore, Reservation, Storage};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const MS: Duration = Duration::from_millis(1);

async fn fresh_storage(keys: &[&str]) -> Option<RedisStorage> {
    let url = std::env::var("REDIS_URL").ok()?;
    common::init_tracing();
    let client = redis::Client::open(url.as_str()).unwrap();
    let mut connection = client.get_tokio_connection_manager().await.unwrap();
    for key in keys {
        redis::cmd("DEL")
            .arg(*key)
            .query_async::<_, ()>(&mut connection)
            .await
            .unwrap();
    }
    Some(RedisStorage::new(
        Arc::new(RedisStore::new_with_connection(connection)),
        Duration::from_secs(60),
    ))
}

#[tokio::test]
async fn test_live_acquire_and_available() {
    let Some(storage) = fresh_storage(&["rgb:live:acquire"]).await else {
        return;
    };
    storage.ping().await.unwrap();
    let bucket = storage.create("rgb:live:acquire", 250 * MS, 10).await.unwrap();
    let start = bucket.start_time();

    assert_eq!(bucket.available_at(start).await.unwrap(), 10);
    assert_eq!(bucket.acquire_at(start, 10).await.unwrap(), 10);
    assert_eq!(bucket.acquire_at(start, 1).await.unwrap(), 0);
    assert_eq!(bucket.acquire_at(start + 250 * MS, 2).await.unwrap(), 1);
}

#[tokio::test]
async fn test_live_reservations_stack_and_respect_bound() {
    let Some(storage) = fresh_storage(&["rgb:live:reserve"]).await else {
        return;
    };
    let bucket = storage.create("rgb:live:reserve", 250 * MS, 10).await.unwrap();
    let start = bucket.start_time();
    assert_eq!(bucket.acquire_at(start, 10).await.unwrap(), 10);

    assert_eq!(
        bucket.try_acquire_at(start, 2, Duration::MAX).await.unwrap(),
        Reservation::Granted(500 * MS)
    );
    assert_eq!(
        bucket.try_acquire_at(start, 2, 900 * MS).await.unwrap(),
        Reservation::Denied
    );
    assert_eq!(
        bucket.try_acquire_at(start, 2, Duration::MAX).await.unwrap(),
        Reservation::Granted(1_000 * MS)
    );
    assert_eq!(bucket.available_at(start).await.unwrap(), -4);
}

#[tokio::test]
async fn test_live_two_registries_share_one_bucket() {
    let Some(ours) = fresh_storage(&["rgb:live:shared"]).await else {
        return;
    };
    let Some(theirs) = fresh_storage(&[]).await else {
        return;
    };
    let a = ours.create("rgb:live:shared", 250 * MS, 10).await.unwrap();
    let b = theirs.create("rgb:live:shared", 250 * MS, 10).await.unwrap();
    let start = a.start_time();
    assert_eq!(b.start_time(), start);
    assert_eq!(a.acquire_at(start, 10).await.unwrap(), 10);

    let (first, second) = tokio::join!(
        a.try_acquire_at(start, 2, Duration::MAX),
        b.try_acquire_at(start, 2, Duration::MAX)
    );
    let mut waits = vec![first.unwrap().wait(), second.unwrap().wait()];
    waits.sort();
    assert_eq!(waits, vec![500 * MS, 1_000 * MS]);
}

#[tokio::test]
async fn test_live_unbounded_max_count_is_granted_with_capped_wait() {
    let Some(storage) = fresh_storage(&["rgb:live:huge"]).await else {
        return;
    };
    let bucket = storage.create("rgb:live:huge", 250 * MS, 10).await.unwrap();
    let start = bucket.start_time();
    assert_eq!(bucket.acquire_at(start, 10).await.unwrap(), 10);

    let capped = Duration::from_micros(MAX_SCRIPT_UNITS as u64);
    assert_eq!(
        bucket.try_acquire_at(start, i64::MAX, Duration::MAX).await.unwrap(),
        Reservation::Granted(capped)
    );
    assert_eq!(
        bucket.try_acquire_at(start, i64::MAX, Duration::from_secs(3600)).await.unwrap(),
        Reservation::Denied
    );
}

#[tokio::test]
async fn test_live_create_is_idempotent_and_missing_keys_fail_open() {
    let Some(storage) = fresh_storage(&["rgb:live:idem"]).await else {
        return;
    };
    let first = storage.create("rgb:live:idem", 100 * MS, 5).await.unwrap();
    let second = storage.create_with_quantum("rgb:live:idem", MS, 50, 7).await.unwrap();
    assert_eq!(second.capacity(), 5);
    assert_eq!(second.start_time(), first.start_time());

    let Some(storage) = fresh_storage(&["rgb:live:idem"]).await else {
        return;
    };
    storage.ping().await.unwrap();
    assert_eq!(first.acquire(1).await.unwrap(), 0);
    assert_eq!(first.try_acquire(1).await.unwrap(), Duration::ZERO);
    assert!(first.start_time() <= SystemTime::now());
}
