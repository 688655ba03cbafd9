//! Shared helpers for the Redis-backed limiter tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use redis::aio::ConnectionManager;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Connect to the local test coordinator.
pub(crate) async fn connection() -> ConnectionManager {
    let client = redis::Client::open("redis://127.0.0.1:6379").unwrap();
    ConnectionManager::new(client).await.unwrap()
}

/// A resource name no other test run can collide with.
pub(crate) fn unique_resource(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("floodgate_test:{prefix}:{nanos}:{seq}")
}
