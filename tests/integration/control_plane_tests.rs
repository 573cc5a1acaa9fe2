//! Scheduler, broadcaster and inbound routing through a running control plane.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, SystemTime};

use pumplink::app::ports::{ConfigError, Ports};
use pumplink::app::service::ControlPlane;
use pumplink::config::ControlPlaneConfig;
use pumplink::engine::{ActivationOutcome, ActivationRequest};
use pumplink::error::Error;
use pumplink::model::{DeviceState, ShutdownReason};
use pumplink::scheduler::ScheduleItem;

use crate::mock_ports::{
    AckMode, AckingBus, FlakyStore, RecordingNotifier, RecordingObserver, harness, test_config,
    wait_until,
};

const WAIT: Duration = Duration::from_secs(5);

fn item(delay: Duration, device_id: u32, duration: Duration) -> ScheduleItem {
    ScheduleItem {
        start_at: SystemTime::now() + delay,
        duration,
        device_id,
        user_id: 7,
    }
}

// ── Scheduler ─────────────────────────────────────────────────

#[test]
fn scheduled_item_activates_device() {
    let h = harness(test_config(), AckMode::Immediate, &[1]);
    h.plane
        .scheduler()
        .add(item(Duration::from_millis(100), 1, Duration::from_millis(50)));

    assert!(wait_until(WAIT, || h.store.logs_for(1).len() == 2));
    let logs = h.store.logs_for(1);
    assert_eq!(logs[0].state, DeviceState::On);
    assert_eq!(logs[0].user_id, 7);
    assert!(h.plane.scheduler().is_empty());
}

#[test]
fn earlier_insert_interrupts_long_sleep() {
    // Poll interval far beyond the test timeout: only the wake signal can
    // get the loop moving in time.
    let config = ControlPlaneConfig {
        scheduler_poll_secs: 3600,
        ..test_config()
    };
    let h = harness(config, AckMode::Immediate, &[1, 2]);
    let scheduler = h.plane.scheduler();

    scheduler.add(item(Duration::from_secs(600), 1, Duration::from_millis(50)));
    std::thread::sleep(Duration::from_millis(50));
    scheduler.add(item(Duration::from_millis(100), 2, Duration::from_millis(50)));

    assert!(wait_until(WAIT, || h.store.logs_for(2).len() == 2));
    assert!(h.store.logs_for(1).is_empty());
    assert_eq!(scheduler.len(), 1);
    assert_eq!(scheduler.upcoming()[0].device_id, 1);
}

#[test]
fn far_future_schedule_leaves_engine_serving() {
    let h = harness(test_config(), AckMode::Immediate, &[1, 2]);
    h.plane.scheduler().add(item(
        Duration::from_secs(20_000_000_000_000),
        2,
        Duration::from_secs(1),
    ));
    std::thread::sleep(Duration::from_millis(300));

    let ticket = h
        .plane
        .engine()
        .enqueue(ActivationRequest {
            user_id: 1,
            device_id: 1,
            duration: Duration::from_millis(50),
        })
        .unwrap();
    assert!(matches!(
        ticket.wait_timeout(WAIT),
        Some(ActivationOutcome::Finished {
            reason: ShutdownReason::Completed,
            ..
        })
    ));
    assert!(!h.plane.engine().is_halted());
    assert_eq!(h.plane.scheduler().len(), 1);
}

#[test]
fn due_items_are_processed_in_start_order() {
    let h = harness(test_config(), AckMode::Immediate, &[1, 2]);
    let scheduler = h.plane.scheduler();
    scheduler.add(item(Duration::from_millis(300), 1, Duration::from_millis(30)));
    scheduler.add(item(Duration::from_millis(100), 2, Duration::from_millis(30)));

    assert!(wait_until(WAIT, || h.store.inner.logs().len() == 4));
    let order: Vec<u32> = h
        .store
        .inner
        .logs()
        .iter()
        .filter(|l| l.state == DeviceState::On)
        .map(|l| l.device_id)
        .collect();
    assert_eq!(order, vec![2, 1]);
}

#[test]
fn rejected_schedule_is_dropped_without_retry() {
    let config = ControlPlaneConfig {
        daily_quota_secs: 1,
        ..test_config()
    };
    let h = harness(config, AckMode::Immediate, &[1]);
    h.plane
        .scheduler()
        .add(item(Duration::ZERO, 1, Duration::from_secs(5)));

    assert!(wait_until(WAIT, || h.plane.scheduler().is_empty()));
    std::thread::sleep(Duration::from_millis(100));
    assert!(h.bus.payloads().is_empty());
    assert_eq!(h.plane.engine().stats().processed, 0);
}

// ── Broadcaster + routing ─────────────────────────────────────

#[test]
fn device_status_is_relayed_verbatim_and_replayed_to_late_joiners() {
    let h = harness(test_config(), AckMode::Immediate, &[1]);
    let early = Arc::new(RecordingObserver::default());
    h.plane.broadcaster().subscribe(early.clone());

    let payload = r#"{"device_id":1,"state":"ON","rssi":-61}"#;
    assert!(h.plane.route_inbound("device/1/status", payload));
    assert_eq!(early.messages(), vec![payload]);

    let late = Arc::new(RecordingObserver::default());
    h.plane.broadcaster().subscribe(late.clone());
    assert_eq!(late.messages(), vec![payload]);
}

#[test]
fn engine_publishes_status_events() {
    let h = harness(test_config(), AckMode::Immediate, &[1]);
    let obs = Arc::new(RecordingObserver::default());
    h.plane.broadcaster().subscribe(obs.clone());

    let ticket = h
        .plane
        .engine()
        .enqueue(ActivationRequest {
            user_id: 1,
            device_id: 1,
            duration: Duration::from_millis(50),
        })
        .unwrap();
    assert!(ticket.wait_timeout(WAIT).is_some());

    let msgs = obs.messages();
    assert_eq!(msgs.len(), 2);
    assert!(msgs[0].contains(r#""state":"ON""#));
    assert!(msgs[1].contains(r#""state":"OFF""#));
    assert!(msgs[1].contains(r#""reason":"completed""#));
    assert!(msgs.iter().all(|m| m.contains(r#""source":"engine""#)));
}

#[test]
fn broken_observer_is_evicted_and_others_keep_receiving() {
    let h = harness(test_config(), AckMode::Immediate, &[1]);
    let good = Arc::new(RecordingObserver::default());
    let bad = Arc::new(RecordingObserver::default());
    h.plane.broadcaster().subscribe(good.clone());
    h.plane.broadcaster().subscribe(bad.clone());
    bad.broken.store(true, Ordering::SeqCst);

    h.plane.route_inbound("device/1/status", "a");
    h.plane.route_inbound("device/1/status", "b");

    assert_eq!(good.messages(), vec!["a", "b"]);
    assert!(bad.messages().is_empty());
    assert_eq!(h.plane.broadcaster().observer_count(), 1);
}

#[test]
fn unknown_topics_and_stray_acks_are_ignored() {
    let h = harness(test_config(), AckMode::Never, &[1]);
    assert!(!h.plane.route_inbound("device/control", "on"));
    assert!(!h.plane.route_inbound("device/x/ack", ""));
    assert!(h.plane.route_inbound("device/1/ack", ""));
    assert_eq!(h.plane.broadcaster().latest(), None);
    assert!(h.store.inner.sessions().is_empty());
}

// ── Metrics ───────────────────────────────────────────────────

#[test]
fn metrics_reflect_live_state() {
    let h = harness(test_config(), AckMode::Immediate, &[1]);
    h.plane
        .scheduler()
        .add(item(Duration::from_secs(600), 1, Duration::from_secs(1)));
    let ticket = h
        .plane
        .engine()
        .enqueue(ActivationRequest {
            user_id: 1,
            device_id: 1,
            duration: Duration::from_secs(30),
        })
        .unwrap();
    assert!(wait_until(WAIT, || h.plane.metrics().active_sessions == 1));

    let m = h.plane.metrics();
    assert_eq!(m.scheduled, 1);
    assert_eq!(m.quota_secs, 3600.0);
    assert!(!m.halted);
    assert!(m.last_crash.is_none());

    assert!(h.plane.engine().force_shutdown(1));
    assert!(ticket.wait_timeout(WAIT).is_some());
    let m = h.plane.metrics();
    assert_eq!(m.active_sessions, 0);
    assert_eq!(m.stats.forced, 1);
    assert!(m.quota_used_secs > 0.0);
}

// ── Startup ───────────────────────────────────────────────────

#[test]
fn out_of_range_config_is_refused_at_start() {
    let config = ControlPlaneConfig {
        quota_window_secs: u64::MAX,
        ..test_config()
    };
    let started = ControlPlane::start(
        &config,
        Ports {
            bus: Arc::new(AckingBus::new(AckMode::Never)),
            store: Arc::new(FlakyStore::with_devices(&[1])),
            notifier: Arc::new(RecordingNotifier::default()),
        },
    );
    assert!(matches!(
        started.err(),
        Some(Error::Config(ConfigError::ValidationFailed(_)))
    ));
}
