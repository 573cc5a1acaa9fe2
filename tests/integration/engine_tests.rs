//! Activation engine behaviour against mock ports and real timers.

use std::sync::atomic::Ordering;
use std::time::Duration;

use pumplink::config::ControlPlaneConfig;
use pumplink::engine::{ActivationOutcome, ActivationRequest, INTAKE_DEPTH};
use pumplink::engine::registry::SessionPhase;
use pumplink::error::{AdmissionError, HandshakeFailure, Rejection};
use pumplink::model::{DeviceState, ShutdownReason};

use crate::mock_ports::{AckMode, harness, test_config, wait_until};

const WAIT: Duration = Duration::from_secs(5);

fn request(device_id: u32, duration: Duration) -> ActivationRequest {
    ActivationRequest {
        user_id: 42,
        device_id,
        duration,
    }
}

// ── Happy path ────────────────────────────────────────────────

#[test]
fn acked_activation_runs_to_completion() {
    let h = harness(test_config(), AckMode::Immediate, &[1]);
    let ticket = h
        .plane
        .engine()
        .enqueue(request(1, Duration::from_millis(150)))
        .unwrap();

    let outcome = ticket.wait_timeout(WAIT).expect("outcome");
    let ActivationOutcome::Finished { reason, actual } = outcome.clone() else {
        panic!("unexpected outcome {outcome:?}");
    };
    assert_eq!(reason, ShutdownReason::Completed);
    assert!(actual >= Duration::from_millis(150), "{actual:?}");

    assert_eq!(h.bus.payloads(), vec!["on", "off"]);
    for (topic, _, qos, retained) in h.bus.messages() {
        assert_eq!(topic, "device/control");
        assert_eq!(qos, 2);
        assert!(retained);
    }

    assert_eq!(h.store.state(1), Some(DeviceState::Off));
    let logs = h.store.logs_for(1);
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].state, DeviceState::On);
    assert_eq!(logs[0].duration, Some(Duration::from_millis(150)));
    assert_eq!(logs[1].state, DeviceState::Off);
    assert_eq!(logs[1].reason, Some(ShutdownReason::Completed));
    assert_eq!(logs[1].duration, Some(actual));

    let sessions = h.store.inner.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].user_id, 42);
    assert_eq!(sessions[0].reason, Some(ShutdownReason::Completed));
    assert_eq!(logs[0].session_id, Some(sessions[0].id));

    assert!(!h.plane.engine().is_active(1));
    assert_eq!(h.plane.engine().quota_used(), actual);
    assert!(wait_until(WAIT, || !h.notifier.bodies().is_empty()));
    assert!(h.notifier.bodies()[0].starts_with("This device is now ON for"));
}

#[test]
fn ack_delivered_through_router_opens_session() {
    let config = ControlPlaneConfig {
        ack_timeout_ms: 10_000,
        ..test_config()
    };
    let h = harness(config, AckMode::Never, &[3]);
    let engine = h.plane.engine();
    let ticket = engine.enqueue(request(3, Duration::from_millis(50))).unwrap();

    assert!(wait_until(WAIT, || engine.pending_acks() == 1));
    assert_eq!(engine.phase(3), Some(SessionPhase::Handshake));
    assert!(h.plane.route_inbound("device/3/ack", "ack"));

    assert!(matches!(
        ticket.wait_timeout(WAIT),
        Some(ActivationOutcome::Finished {
            reason: ShutdownReason::Completed,
            ..
        })
    ));
    assert_eq!(engine.pending_acks(), 0);
}

// ── Admission ─────────────────────────────────────────────────

#[test]
fn active_device_rejects_second_request_and_record_is_untouched() {
    let h = harness(test_config(), AckMode::Immediate, &[1]);
    let engine = h.plane.engine();
    let first = engine.enqueue(request(1, Duration::from_secs(10))).unwrap();
    assert!(wait_until(WAIT, || h.store.state(1) == Some(DeviceState::On)));

    let logs_before = h.store.logs_for(1);
    assert_eq!(
        engine.enqueue(request(1, Duration::from_secs(1))).err(),
        Some(AdmissionError::AlreadyActive(1))
    );
    assert_eq!(h.store.logs_for(1), logs_before);
    assert_eq!(h.store.state(1), Some(DeviceState::On));

    assert!(engine.force_shutdown(1));
    assert!(first.wait_timeout(WAIT).is_some());
}

#[test]
fn full_intake_reports_queue_full() {
    let config = ControlPlaneConfig {
        ack_timeout_ms: 10_000,
        ..test_config()
    };
    let h = harness(config, AckMode::Never, &[1]);
    let engine = h.plane.engine();

    // Park the loop in the handshake for device 1.
    let _parked = engine.enqueue(request(1, Duration::from_secs(1))).unwrap();
    assert!(wait_until(WAIT, || engine.pending_acks() == 1));

    let mut tickets = Vec::new();
    for id in 0..INTAKE_DEPTH as u32 {
        tickets.push(engine.enqueue(request(100 + id, Duration::from_secs(1))).unwrap());
    }
    assert_eq!(engine.queued(), INTAKE_DEPTH);
    assert_eq!(
        engine.enqueue(request(200, Duration::from_secs(1))).err(),
        Some(AdmissionError::QueueFull)
    );

    // Unknown devices drain quickly once the loop is released.
    assert!(engine.force_shutdown(1));
    for t in tickets {
        assert!(matches!(
            t.wait_timeout(WAIT),
            Some(ActivationOutcome::Rejected(Rejection::DeviceNotFound(_)))
        ));
    }
}

#[test]
fn request_larger_than_quota_is_refused_at_admission() {
    let config = ControlPlaneConfig {
        daily_quota_secs: 1,
        ..test_config()
    };
    let h = harness(config, AckMode::Immediate, &[1]);
    let err = h
        .plane
        .engine()
        .enqueue(request(1, Duration::from_secs(2)))
        .err();
    assert!(matches!(err, Some(AdmissionError::QuotaExceeded(_))));
    assert!(h.bus.payloads().is_empty());
}

// ── Quota ─────────────────────────────────────────────────────

#[test]
fn request_beyond_quota_is_dropped_at_dequeue_and_never_turns_on() {
    let config = ControlPlaneConfig {
        daily_quota_secs: 1,
        ..test_config()
    };
    let h = harness(config, AckMode::Immediate, &[1, 2]);
    let engine = h.plane.engine();

    // Both fit individually when admitted; together they overrun the quota.
    let first = engine.enqueue(request(1, Duration::from_millis(600))).unwrap();
    let second = engine.enqueue(request(2, Duration::from_millis(600))).unwrap();

    assert!(matches!(
        first.wait_timeout(WAIT),
        Some(ActivationOutcome::Finished { .. })
    ));
    assert!(matches!(
        second.wait_timeout(WAIT),
        Some(ActivationOutcome::Rejected(Rejection::QuotaExceeded(_)))
    ));

    assert!(h.store.logs_for(2).is_empty());
    assert_eq!(h.store.state(2), Some(DeviceState::Off));
    assert_eq!(h.bus.payloads(), vec!["on", "off"]);
    assert!(engine.quota_used() <= Duration::from_secs(1));
}

#[test]
fn forced_session_charges_only_actual_time() {
    let h = harness(test_config(), AckMode::Immediate, &[1]);
    let engine = h.plane.engine();
    let ticket = engine.enqueue(request(1, Duration::from_secs(30))).unwrap();

    assert!(wait_until(WAIT, || matches!(
        engine.phase(1),
        Some(SessionPhase::Holding { .. })
    )));
    std::thread::sleep(Duration::from_millis(100));
    assert!(engine.force_shutdown(1));

    let Some(ActivationOutcome::Finished { reason, actual }) = ticket.wait_timeout(WAIT) else {
        panic!("activation did not finish");
    };
    assert_eq!(reason, ShutdownReason::Force);
    assert!(actual >= Duration::from_millis(100), "{actual:?}");
    assert!(actual < Duration::from_secs(5), "{actual:?}");
    assert_eq!(engine.quota_used(), actual);

    assert!(!engine.is_active(1));
    assert_eq!(h.store.state(1), Some(DeviceState::Off));
    let off = h.store.logs_for(1).pop().unwrap();
    assert_eq!(off.reason, Some(ShutdownReason::Force));
    assert_eq!(h.bus.payloads(), vec!["on", "off"]);
    assert_eq!(engine.stats().forced, 1);
}

// ── Handshake ─────────────────────────────────────────────────

#[test]
fn ack_timeout_aborts_without_session_and_device_stays_eligible() {
    let h = harness(test_config(), AckMode::Never, &[1]);
    let engine = h.plane.engine();

    let ticket = engine.enqueue(request(1, Duration::from_millis(50))).unwrap();
    assert_eq!(
        ticket.wait_timeout(WAIT),
        Some(ActivationOutcome::HandshakeFailed(HandshakeFailure::AckTimeout))
    );
    assert_eq!(h.bus.payloads(), vec!["on", "off"]);
    assert!(h.store.inner.sessions().is_empty());
    assert!(h.store.logs_for(1).is_empty());
    assert_eq!(h.store.state(1), Some(DeviceState::Off));
    assert_eq!(engine.quota_used(), Duration::ZERO);
    assert!(!engine.is_active(1));
    assert!(wait_until(WAIT, || h
        .notifier
        .bodies()
        .contains(&"This device 1 failed to acknowledge. Activation aborted!".to_owned())));

    h.bus.set_mode(AckMode::Immediate);
    let retry = engine.enqueue(request(1, Duration::from_millis(50))).unwrap();
    assert!(matches!(
        retry.wait_timeout(WAIT),
        Some(ActivationOutcome::Finished { .. })
    ));
}

#[test]
fn late_ack_after_timeout_is_ignored() {
    let h = harness(test_config(), AckMode::Never, &[1]);
    let engine = h.plane.engine();
    let ticket = engine.enqueue(request(1, Duration::from_millis(50))).unwrap();
    assert!(ticket.wait_timeout(WAIT).is_some());

    assert!(!engine.acknowledge(1));
    assert!(h.store.inner.sessions().is_empty());
}

#[test]
fn force_shutdown_during_ack_wait_cancels_handshake() {
    let config = ControlPlaneConfig {
        ack_timeout_ms: 10_000,
        ..test_config()
    };
    let h = harness(config, AckMode::Never, &[1]);
    let engine = h.plane.engine();
    let ticket = engine.enqueue(request(1, Duration::from_secs(5))).unwrap();

    assert!(wait_until(WAIT, || engine.phase(1) == Some(SessionPhase::Handshake)));
    assert!(engine.force_shutdown(1));

    assert_eq!(
        ticket.wait_timeout(Duration::from_secs(2)),
        Some(ActivationOutcome::HandshakeFailed(HandshakeFailure::ForceCancelled))
    );
    assert_eq!(h.bus.payloads(), vec!["on", "off"]);
    assert!(h.store.inner.sessions().is_empty());
    assert!(!engine.force_shutdown(1));
    assert!(wait_until(WAIT, || h
        .notifier
        .bodies()
        .iter()
        .any(|b| b.contains("cancelled by admin during ACK wait"))));
}

// ── ForceShutdown ─────────────────────────────────────────────

#[test]
fn force_shutdown_is_idempotent() {
    let h = harness(test_config(), AckMode::Immediate, &[1]);
    let engine = h.plane.engine();
    assert!(!engine.force_shutdown(1));

    let ticket = engine.enqueue(request(1, Duration::from_secs(30))).unwrap();
    assert!(wait_until(WAIT, || matches!(
        engine.phase(1),
        Some(SessionPhase::Holding { .. })
    )));
    assert!(engine.force_shutdown(1));
    assert!(!engine.force_shutdown(1));
    assert!(ticket.wait_timeout(WAIT).is_some());
    assert!(!engine.force_shutdown(1));

    assert!(wait_until(WAIT, || h
        .notifier
        .bodies()
        .iter()
        .any(|b| b.starts_with("This device has been force shut down at"))));
    let forced = h
        .notifier
        .bodies()
        .iter()
        .filter(|b| b.starts_with("This device has been force shut down"))
        .count();
    assert_eq!(forced, 1);
}

#[test]
fn force_shutdown_result_agrees_with_recorded_reason() {
    let h = harness(test_config(), AckMode::Immediate, &[1]);
    let engine = h.plane.engine().clone();

    for _ in 0..5 {
        let ticket = engine.enqueue(request(1, Duration::from_millis(30))).unwrap();
        assert!(wait_until(WAIT, || engine.is_active(1)));

        // Keep firing until the activation has been torn down.
        let mut accepted = 0;
        while engine.is_active(1) {
            if engine.force_shutdown(1) {
                accepted += 1;
            }
            std::thread::sleep(Duration::from_millis(7));
        }
        let outcome = ticket.wait_timeout(WAIT).expect("outcome");
        let forced = match outcome {
            ActivationOutcome::Finished { reason, .. } => reason == ShutdownReason::Force,
            ActivationOutcome::HandshakeFailed(HandshakeFailure::ForceCancelled) => true,
            other => panic!("unexpected outcome {other:?}"),
        };
        assert!(accepted <= 1);
        assert_eq!(forced, accepted == 1);
    }
}

// ── Dequeue-time rejections ───────────────────────────────────

#[test]
fn unknown_device_is_rejected() {
    let h = harness(test_config(), AckMode::Immediate, &[1]);
    let ticket = h
        .plane
        .engine()
        .enqueue(request(9, Duration::from_secs(1)))
        .unwrap();
    assert_eq!(
        ticket.wait_timeout(WAIT),
        Some(ActivationOutcome::Rejected(Rejection::DeviceNotFound(9)))
    );
    assert!(h.bus.payloads().is_empty());
}

#[test]
fn device_already_on_in_store_is_rejected() {
    let h = harness(test_config(), AckMode::Immediate, &[1]);
    h.store.inner.insert_device(pumplink::model::Device {
        id: 1,
        name: "Pump 1".into(),
        state: DeviceState::On,
    });
    let ticket = h
        .plane
        .engine()
        .enqueue(request(1, Duration::from_secs(1)))
        .unwrap();
    assert_eq!(
        ticket.wait_timeout(WAIT),
        Some(ActivationOutcome::Rejected(Rejection::DeviceAlreadyOn(1)))
    );
    assert!(h.bus.payloads().is_empty());
}

#[test]
fn failed_lookup_is_reported_as_store_rejection() {
    let h = harness(test_config(), AckMode::Immediate, &[1]);
    h.store.fail_lookups.store(true, Ordering::SeqCst);
    let ticket = h
        .plane
        .engine()
        .enqueue(request(1, Duration::from_secs(1)))
        .unwrap();
    assert!(matches!(
        ticket.wait_timeout(WAIT),
        Some(ActivationOutcome::Rejected(Rejection::Store(_)))
    ));
}

// ── Partial failures ──────────────────────────────────────────

#[test]
fn persistence_errors_do_not_abort_activation() {
    let h = harness(test_config(), AckMode::Immediate, &[1]);
    h.store.fail_sessions.store(true, Ordering::SeqCst);
    h.store.fail_state_writes.store(true, Ordering::SeqCst);

    let ticket = h
        .plane
        .engine()
        .enqueue(request(1, Duration::from_millis(50)))
        .unwrap();
    assert!(matches!(
        ticket.wait_timeout(WAIT),
        Some(ActivationOutcome::Finished {
            reason: ShutdownReason::Completed,
            ..
        })
    ));
    assert_eq!(h.bus.payloads(), vec!["on", "off"]);

    let logs = h.store.logs_for(1);
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.session_id.is_none()));
    assert_eq!(h.plane.engine().stats().persistence_errors, 3);
}

#[test]
fn bus_errors_are_logged_and_activation_continues() {
    let h = harness(test_config(), AckMode::Immediate, &[1]);
    h.bus.set_failing(true);
    let ticket = h
        .plane
        .engine()
        .enqueue(request(1, Duration::from_millis(50)))
        .unwrap();
    assert!(matches!(
        ticket.wait_timeout(WAIT),
        Some(ActivationOutcome::Finished { .. })
    ));
    assert_eq!(h.plane.engine().stats().bus_errors, 2);
}

// ── Panic boundary ────────────────────────────────────────────

#[test]
fn panic_in_loop_halts_engine() {
    let h = harness(test_config(), AckMode::Immediate, &[1]);
    let engine = h.plane.engine();
    h.store.panic_on_lookup.store(true, Ordering::SeqCst);

    let _ticket = engine.enqueue(request(1, Duration::from_secs(1))).unwrap();
    assert!(wait_until(WAIT, || engine.is_halted()));
    assert_eq!(
        engine.enqueue(request(1, Duration::from_secs(1))).err(),
        Some(AdmissionError::EngineHalted)
    );
    let crash = engine.last_crash().expect("crash recorded");
    assert_eq!(crash.reason.as_str(), "lookup exploded");
}
