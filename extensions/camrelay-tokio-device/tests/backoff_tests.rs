use camrelay_tokio_device::{ReconnectBackoff, retry_with_backoff};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[test]
fn delays_double_then_cap() {
    let backoff = ReconnectBackoff::default();

    let delays: Vec<u64> = (1..=8)
        .map(|attempt| backoff.delay_for_attempt(attempt).as_secs())
        .collect();

    assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    assert_eq!(backoff.delay_for_attempt(u32::MAX), Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn attempts_follow_the_backoff_schedule() {
    let (_stop_tx, stop_rx) = watch::channel(false);
    let started = Instant::now();
    let mut attempt_times = Vec::new();

    let connected = retry_with_backoff(ReconnectBackoff::default(), stop_rx, |attempt| {
        attempt_times.push(started.elapsed().as_secs());
        async move { attempt == 7 }
    })
    .await;

    assert!(connected);
    // Cumulative delays of 1, 2, 4, 8, 16, 30, 30 seconds.
    assert_eq!(attempt_times, vec![1, 3, 7, 15, 31, 61, 91]);
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_a_pending_sleep() {
    let (stop_tx, stop_rx) = watch::channel(false);
    let attempts = Arc::new(Mutex::new(0u32));

    let counter = attempts.clone();
    let loop_task = tokio::spawn(retry_with_backoff(
        ReconnectBackoff::default(),
        stop_rx,
        move |_| {
            *counter.lock().unwrap() += 1;
            async { false }
        },
    ));

    // Attempts land at 1s and 3s; stop while waiting for the 7s one.
    tokio::time::sleep(Duration::from_secs(5)).await;
    stop_tx.send(true).unwrap();

    assert!(!loop_task.await.unwrap());
    assert_eq!(*attempts.lock().unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn already_stopped_makes_no_attempt() {
    let (_stop_tx, stop_rx) = watch::channel(true);
    let mut attempts = 0;

    let connected = retry_with_backoff(ReconnectBackoff::default(), stop_rx, |_| {
        attempts += 1;
        async { true }
    })
    .await;

    assert!(!connected);
    assert_eq!(attempts, 0);
}
