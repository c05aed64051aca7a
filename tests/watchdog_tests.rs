use killboard::watchdog::HeartbeatWatchdog;

#[test]
fn test_no_heartbeat_is_stale() {
    let watchdog = HeartbeatWatchdog::new(1000, 0, 0);

    assert_eq!(watchdog.last_heartbeat(), None);
    for now in [0, 1, 999, 1_000, 1_000_000, u64::MAX] {
        assert!(watchdog.is_stale(now), "expected stale at {now}");
    }
}

#[test]
fn test_threshold_boundary() {
    let watchdog = HeartbeatWatchdog::new(1000, 0, 0);
    watchdog.record(5_000);

    assert!(!watchdog.is_stale(5_000));
    assert!(!watchdog.is_stale(6_000));
    assert!(watchdog.is_stale(6_001));
}

#[test]
fn test_latest_heartbeat_wins() {
    let watchdog = HeartbeatWatchdog::new(1000, 0, 0);
    watchdog.record(1_000);
    watchdog.record(9_000);

    assert_eq!(watchdog.last_heartbeat(), Some(9_000));
    assert!(!watchdog.is_stale(9_500));
}

#[test]
fn test_heartbeat_from_the_future_is_fresh() {
    // Clock skew between hosts must not underflow.
    let watchdog = HeartbeatWatchdog::new(1000, 0, 0);
    watchdog.record(10_000);
    assert!(!watchdog.is_stale(9_000));
}

#[test]
fn test_startup_grace_period() {
    let watchdog = HeartbeatWatchdog::new(1000, 3_000, 10_000);

    assert!(!watchdog.is_stale(10_000));
    assert!(!watchdog.is_stale(12_999));
    assert!(watchdog.is_stale(13_000));
}

#[test]
fn test_recording_from_other_threads() {
    let watchdog = std::sync::Arc::new(HeartbeatWatchdog::new(1000, 0, 0));

    let handles: Vec<_> = (1..=4u64)
        .map(|i| {
            let watchdog = std::sync::Arc::clone(&watchdog);
            std::thread::spawn(move || watchdog.record(i * 1_000))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let last = watchdog.last_heartbeat().unwrap();
    assert!([1_000, 2_000, 3_000, 4_000].contains(&last));
}
