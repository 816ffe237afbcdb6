use camrelay_tokio_hub::PendingRequests;
use camrelay_tokio_hub::error::CorrelationError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn resolve_before_timeout_yields_value() {
    let pending = Arc::new(PendingRequests::<String, Vec<u8>>::new(Duration::from_secs(10)));
    let key = "cam-1/clip.ts".to_string();
    let slot = pending.register(key.clone()).unwrap();

    let resolver = {
        let pending = pending.clone();
        let key = key.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            pending.resolve(&key, b"segment".to_vec())
        })
    };

    let started = Instant::now();
    let value = pending.wait(slot).await.unwrap();

    assert_eq!(value, b"segment");
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(resolver.await.unwrap());
    assert!(!pending.contains(&key));
}

#[tokio::test(start_paused = true)]
async fn unresolved_request_times_out_and_is_removed() {
    let pending = PendingRequests::<String, u32>::new(Duration::from_secs(10));
    let key = "cam-1#7".to_string();
    let slot = pending.register(key.clone()).unwrap();
    assert!(pending.contains(&key));

    let started = Instant::now();
    let result = pending.wait(slot).await;

    assert_eq!(result, Err(CorrelationError::TimedOut));
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(!pending.contains(&key));

    // A response arriving after the timeout is a no-op.
    assert!(!pending.resolve(&key, 1));
    assert!(pending.is_empty());
}

#[tokio::test]
async fn value_resolved_before_waiting_is_kept() {
    let pending = PendingRequests::<String, u32>::default();
    let slot = pending.register("k".to_string()).unwrap();

    assert!(pending.resolve(&"k".to_string(), 42));
    assert_eq!(pending.wait(slot).await, Ok(42));
}

#[tokio::test]
async fn duplicate_in_flight_key_is_rejected() {
    let pending = PendingRequests::<String, u32>::default();
    let key = "cam-1/index.m3u8".to_string();

    let first = pending.register(key.clone()).unwrap();
    assert!(matches!(
        pending.register(key.clone()),
        Err(CorrelationError::DuplicateKey)
    ));
    assert!(pending.created_at(&key).is_some());

    assert!(pending.resolve(&key, 5));
    assert_eq!(pending.wait(first).await, Ok(5));

    // Once the first request is done the key is free again.
    let second = pending.register(key.clone()).unwrap();
    drop(second);
    assert!(!pending.contains(&key));
}

#[tokio::test(start_paused = true)]
async fn timed_out_slot_never_evicts_a_successor() {
    let pending = Arc::new(PendingRequests::<String, u32>::new(Duration::from_secs(1)));
    let key = "cam-1/a.ts".to_string();

    let stale = pending.register(key.clone()).unwrap();
    assert_eq!(pending.wait(stale).await, Err(CorrelationError::TimedOut));

    let fresh = pending.register(key.clone()).unwrap();
    assert!(pending.contains(&key));
    assert_eq!(pending.len(), 1);

    assert!(pending.resolve(&key, 9));
    assert_eq!(pending.wait(fresh).await, Ok(9));
}
