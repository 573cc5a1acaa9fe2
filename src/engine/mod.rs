//! Activation engine.
//!
//! A single consumer drains a bounded intake queue and runs each request
//! to completion before taking the next:
//!
//! ```text
//!  enqueue ──▶ [intake; INTAKE_DEPTH] ──▶ run loop (one at a time)
//!                                            │
//!     quota check ─▶ device lookup ─▶ register(Handshake)
//!                                            │
//!     arm ack slot ─▶ publish "on" ─▶ race { ack | cancel | timeout }
//!                                            │ ack
//!     open session ─▶ state ON ─▶ ON log ─▶ notify ─▶ promote(Holding)
//!                                            │
//!     race { duration elapsed | cancel } ────┘
//!                                            │
//!     finish entry ─▶ charge quota ─▶ publish "off" ─▶ state OFF
//!              ─▶ OFF log ─▶ close session ─▶ notify ─▶ resolve ticket
//! ```
//!
//! The registry entry (and its cancel handle) exists from the start of the
//! handshake until cleanup, so `force_shutdown` interrupts either wait.
//! Store writes are independent: a failed write is logged and the
//! activation carries on.  A panic inside the loop halts the engine for
//! good; later `enqueue` calls return [`AdmissionError::EngineHalted`].

pub mod ack;
pub mod cancel;
pub mod quota;
pub mod registry;
pub mod ticket;

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_time::{Instant, Timer};
use futures_lite::FutureExt;
use futures_lite::future;
use log::{error, info, warn};

use crate::adapters::time::{clock_label, from_embassy, minutes, to_embassy, unix_millis};
use crate::app::events::StatusEvent;
use crate::app::ports::{
    CommandBus, DeviceStore, Notice, Notifier, Ports, SchedulerDelegate,
};
use crate::broadcast::Broadcaster;
use crate::config::ControlPlaneConfig;
use crate::diagnostics::{CrashEntry, EngineStats, StatsSnapshot, panic_message};
use crate::error::{AdmissionError, HandshakeFailure, Rejection};
use crate::model::{
    Device, DeviceId, DeviceLogEntry, DeviceState, NewSession, SessionId, ShutdownReason, UserId,
};
use crate::scheduler::ScheduleItem;
use crate::topics;

use ack::AckWaiter;
use cancel::{CancelToken, cancel_pair};
use quota::QuotaTracker;
use registry::{ActivationRegistry, SessionPhase};
use ticket::{Reporter, ticket_pair};

pub use ticket::{ActivationOutcome, Ticket};

/// Capacity of the intake queue.
pub const INTAKE_DEPTH: usize = 8;

/// A request to run one device for `duration` on behalf of `user_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationRequest {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub duration: Duration,
}

struct Queued {
    request: ActivationRequest,
    reporter: Reporter,
}

/// Outcome of the three-way handshake race.
enum AckWait {
    Acked,
    Cancelled,
    TimedOut,
}

/// Bus settings the engine publishes with.
struct CommandSettings {
    topic: String,
    qos: u8,
    retain: bool,
    ack_timeout: Duration,
}

struct Inner {
    settings: CommandSettings,
    intake: Channel<CriticalSectionRawMutex, Queued, INTAKE_DEPTH>,
    quota: QuotaTracker,
    registry: ActivationRegistry,
    acks: AckWaiter,
    broadcaster: Arc<Broadcaster>,
    bus: Arc<dyn CommandBus>,
    store: Arc<dyn DeviceStore>,
    notifier: Arc<dyn Notifier>,
    stats: EngineStats,
    running: AtomicBool,
    halted: AtomicBool,
    last_crash: Mutex<CriticalSectionRawMutex, RefCell<Option<CrashEntry>>>,
}

/// Cloneable handle to the engine.  All clones share one queue, quota,
/// registry and ack table.
#[derive(Clone)]
pub struct ActivationEngine {
    inner: Arc<Inner>,
}

impl ActivationEngine {
    pub fn new(config: &ControlPlaneConfig, ports: Ports, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings: CommandSettings {
                    topic: config.control_topic.clone(),
                    qos: config.command_qos,
                    retain: config.retain_commands,
                    ack_timeout: config.ack_timeout(),
                },
                intake: Channel::new(),
                quota: QuotaTracker::new(config.daily_quota(), config.quota_window(), Instant::now()),
                registry: ActivationRegistry::new(),
                acks: AckWaiter::new(),
                broadcaster,
                bus: ports.bus,
                store: ports.store,
                notifier: ports.notifier,
                stats: EngineStats::new(),
                running: AtomicBool::new(false),
                halted: AtomicBool::new(false),
                last_crash: Mutex::new(RefCell::new(None)),
            }),
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Caller-facing operations (any thread, never block)
    // ───────────────────────────────────────────────────────────────

    /// Admit a request into the intake queue.
    ///
    /// Rejects a device that already has a live activation, a request that
    /// cannot fit in what is left of the quota window, and anything once
    /// the queue is full.  The quota is checked again, authoritatively,
    /// when the request is dequeued.
    pub fn enqueue(&self, request: ActivationRequest) -> Result<Ticket, AdmissionError> {
        let inner = &self.inner;
        if inner.halted.load(Ordering::Acquire) {
            return Err(AdmissionError::EngineHalted);
        }
        if inner.registry.contains(request.device_id) {
            info!(
                "[Queue] Device {} is already active. Rejecting request.",
                request.device_id
            );
            return Err(AdmissionError::AlreadyActive(request.device_id));
        }
        if let Err(q) = inner.quota.check(request.duration, Instant::now()) {
            warn!("[Quota] Quota exceeded for User {}: {}", request.user_id, q);
            return Err(AdmissionError::QuotaExceeded(q));
        }

        let (ticket, reporter) = ticket_pair();
        match inner.intake.try_send(Queued { request, reporter }) {
            Ok(()) => {
                info!(
                    "[Queue] Request enqueued for User {} | Device {} | Duration {:?}",
                    request.user_id, request.device_id, request.duration
                );
                Ok(ticket)
            }
            Err(TrySendError::Full(_)) => {
                warn!("[Queue] Queue is full. Cannot accept more requests.");
                Err(AdmissionError::QueueFull)
            }
        }
    }

    /// Cancel the device's live activation, whether it is waiting for the
    /// ack or already running.  Returns `false` when there is nothing to
    /// cancel, including a second call for the same activation.
    pub fn force_shutdown(&self, device_id: DeviceId) -> bool {
        let phase = self.inner.registry.phase(device_id);
        if !self.inner.registry.cancel(device_id) {
            info!("[Force] No active session for device {}", device_id);
            return false;
        }
        info!(
            "[Force] Force shutdown requested for device {} ({:?})",
            device_id, phase
        );
        self.notify(
            Notice::new(
                device_id,
                format!(
                    "This device has been force shut down at {} by admin",
                    clock_label()
                ),
            )
            .with("device_id", device_id.to_string())
            .with("action", "off"),
        );
        true
    }

    /// Deliver a device ack.  `false` if no handshake is waiting for it.
    pub fn acknowledge(&self, device_id: DeviceId) -> bool {
        let delivered = self.inner.acks.acknowledge(device_id);
        if !delivered {
            info!("[ACK] Ignoring ACK for device {} (no pending handshake)", device_id);
        }
        delivered
    }

    pub fn is_active(&self, device_id: DeviceId) -> bool {
        self.inner.registry.contains(device_id)
    }

    pub fn phase(&self, device_id: DeviceId) -> Option<SessionPhase> {
        self.inner.registry.phase(device_id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn pending_acks(&self) -> usize {
        self.inner.acks.pending()
    }

    pub fn queued(&self) -> usize {
        self.inner.intake.len()
    }

    /// Usage in the current window; an expired window reads as zero.
    pub fn quota_used(&self) -> Duration {
        self.inner.quota.roll(Instant::now());
        self.inner.quota.used()
    }

    pub fn quota(&self) -> Duration {
        self.inner.quota.quota()
    }

    pub fn is_halted(&self) -> bool {
        self.inner.halted.load(Ordering::Acquire)
    }

    pub fn last_crash(&self) -> Option<CrashEntry> {
        self.inner.last_crash.lock(|c| c.borrow().clone())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    // ───────────────────────────────────────────────────────────────
    // Loop
    // ───────────────────────────────────────────────────────────────

    /// Run the consumer loop.  Only the first call does anything; the loop
    /// never returns unless it panics, in which case the engine is halted.
    pub async fn run(&self) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            warn!("[Queue] activation loop already running");
            return;
        }
        info!("[Queue] Device activator started");

        if let Err(payload) = AssertUnwindSafe(self.serve()).catch_unwind().await {
            let reason = panic_message(&*payload);
            error!("[Panic] Device activator stopped: {}", reason);
            self.halt(reason);
        }
    }

    /// Refuse all further work and keep `reason` as the crash record.
    /// Also used by the control plane when the thread hosting the loop
    /// dies for any other reason.
    pub(crate) fn halt(&self, reason: &str) {
        self.inner
            .last_crash
            .lock(|c| *c.borrow_mut() = Some(CrashEntry::now(reason)));
        self.inner.halted.store(true, Ordering::Release);
    }

    async fn serve(&self) {
        loop {
            let Queued { request, reporter } = self.inner.intake.receive().await;
            let outcome = self.process(request).await;
            reporter.report(outcome);
        }
    }

    async fn process(&self, request: ActivationRequest) -> ActivationOutcome {
        let inner = &self.inner;
        let id = request.device_id;
        inner.stats.record_processed();
        info!(
            "[Queue] Processing request for User {} | Device {} | Duration {:?}",
            request.user_id, id, request.duration
        );

        let device = match self.admit(&request) {
            Ok(device) => device,
            Err(rejection) => {
                warn!("[Queue] Request for device {} rejected: {}", id, rejection);
                inner.stats.record_rejected();
                return ActivationOutcome::Rejected(rejection);
            }
        };

        let (handle, token) = cancel_pair();
        if !inner.registry.register(id, handle) {
            // Only this loop registers devices; an entry here is a stale one.
            inner.stats.record_rejected();
            return ActivationOutcome::Rejected(Rejection::DeviceAlreadyOn(id));
        }

        if let Err(failure) = self.handshake(&device, &token).await {
            inner.registry.unregister(id);
            inner.stats.record_handshake_failure();
            return ActivationOutcome::HandshakeFailed(failure);
        }

        let started = Instant::now();
        inner.registry.promote(id, started);
        let session_id = self.begin_session(&request, &device);

        let held = self.hold(request.duration, &token).await;
        let actual = from_embassy(started.elapsed());
        // A cancel that landed after the timer but before this point still
        // counts; one that comes later finds no entry.
        let reason = if inner.registry.finish(id) {
            ShutdownReason::Force
        } else {
            held
        };

        self.end_session(&request, session_id, reason, actual);
        ActivationOutcome::Finished { reason, actual }
    }

    /// Dequeue-time checks: quota, then the device row.
    fn admit(&self, request: &ActivationRequest) -> Result<Device, Rejection> {
        let inner = &self.inner;
        if let Err(q) = inner.quota.check(request.duration, Instant::now()) {
            warn!(
                "[Quota] Quota exceeded for User {}. Skipping request.",
                request.user_id
            );
            return Err(Rejection::QuotaExceeded(q));
        }

        let device = match inner.store.find_device(request.device_id) {
            Ok(Some(device)) => device,
            Ok(None) => {
                warn!("[DB] Device not found: {}", request.device_id);
                return Err(Rejection::DeviceNotFound(request.device_id));
            }
            Err(e) => {
                error!("[DB] Failed to get device {}: {}", request.device_id, e);
                return Err(Rejection::Store(e));
            }
        };
        if device.state == DeviceState::On {
            info!("[State] Device {} is already ON", device.id);
            return Err(Rejection::DeviceAlreadyOn(device.id));
        }
        Ok(device)
    }

    async fn handshake(&self, device: &Device, token: &CancelToken) -> Result<(), HandshakeFailure> {
        let id = device.id;
        let timeout = self.inner.settings.ack_timeout;

        let slot = self.inner.acks.arm(id);
        self.publish_command(topics::PAYLOAD_ON);
        info!("[ACK] Waiting up to {:?} for ACK from device {}", timeout, id);

        let acked = async {
            slot.acknowledged().await;
            AckWait::Acked
        };
        let cancelled = async {
            token.cancelled().await;
            AckWait::Cancelled
        };
        let timed_out = async {
            Timer::after(to_embassy(timeout)).await;
            AckWait::TimedOut
        };
        let result = future::or(acked, future::or(cancelled, timed_out)).await;
        drop(slot);

        match result {
            AckWait::Acked => {
                info!("[ACK] Received ACK for device {}", id);
                Ok(())
            }
            AckWait::TimedOut => {
                warn!("[ACK] Timeout waiting for ACK from device {}", id);
                self.publish_command(topics::PAYLOAD_OFF);
                self.broadcast(&StatusEvent::aborted(id, ShutdownReason::AckTimeout));
                self.notify(
                    Notice::new(
                        id,
                        format!("This device {} failed to acknowledge. Activation aborted!", id),
                    )
                    .with("device_id", id.to_string())
                    .with("action", "ack-timeout"),
                );
                Err(HandshakeFailure::AckTimeout)
            }
            AckWait::Cancelled => {
                warn!(
                    "[Force] Activation for device {} cancelled by admin during ACK wait",
                    id
                );
                self.publish_command(topics::PAYLOAD_OFF);
                self.broadcast(&StatusEvent::aborted(id, ShutdownReason::Force));
                self.notify(
                    Notice::new(
                        id,
                        format!(
                            "[Force] Activation for device {} cancelled by admin during ACK wait",
                            id
                        ),
                    )
                    .with("device_id", id.to_string())
                    .with("action", "cancelled"),
                );
                Err(HandshakeFailure::ForceCancelled)
            }
        }
    }

    /// Persist the ON transition and tell everyone.  Returns the session id
    /// when the session row was written.
    fn begin_session(&self, request: &ActivationRequest, device: &Device) -> Option<SessionId> {
        let inner = &self.inner;
        let id = device.id;
        let started_at_ms = unix_millis();
        let intended_ms = u64::try_from(request.duration.as_millis()).unwrap_or(u64::MAX);

        let session_id = match inner.store.open_session(NewSession {
            user_id: request.user_id,
            device_id: id,
            intended: request.duration,
            started_at_ms,
            active_until_ms: started_at_ms.saturating_add(intended_ms),
        }) {
            Ok(sid) => Some(sid),
            Err(e) => {
                error!("[DB] Failed to create device session for {}: {}", id, e);
                inner.stats.record_persistence_error();
                None
            }
        };

        match inner.store.set_device_state(id, DeviceState::On) {
            Ok(()) => info!("[State] Device {} turned ON", id),
            Err(e) => {
                error!("[DB] Failed to update device {} state to ON: {}", id, e);
                inner.stats.record_persistence_error();
            }
        }

        self.append_log(DeviceLogEntry {
            device_id: id,
            user_id: request.user_id,
            session_id,
            state: DeviceState::On,
            changed_at_ms: started_at_ms,
            duration: Some(request.duration),
            reason: None,
        });

        self.broadcast(&StatusEvent::on(id, request.duration));
        let mins = minutes(request.duration);
        self.notify(
            Notice::new(id, format!("This device is now ON for {} minutes.", mins))
                .with("device_id", id.to_string())
                .with("action", "on")
                .with("duration", format!("{:.6}", mins)),
        );
        info!(
            "[State] {} will remain ON for {:?}",
            device.display_name(),
            request.duration
        );
        session_id
    }

    async fn hold(&self, duration: Duration, token: &CancelToken) -> ShutdownReason {
        let forced = async {
            token.cancelled().await;
            ShutdownReason::Force
        };
        let elapsed = async {
            Timer::after(to_embassy(duration)).await;
            ShutdownReason::Completed
        };
        future::or(forced, elapsed).await
    }

    fn end_session(
        &self,
        request: &ActivationRequest,
        session_id: Option<SessionId>,
        reason: ShutdownReason,
        actual: Duration,
    ) {
        let inner = &self.inner;
        let id = request.device_id;

        let used = inner.quota.record(actual);
        info!(
            "[Quota] Charged {:?} to User {}; {:?} of {:?} used",
            actual,
            request.user_id,
            used,
            inner.quota.quota()
        );

        self.publish_command(topics::PAYLOAD_OFF);
        let ended_at_ms = unix_millis();

        match inner.store.set_device_state(id, DeviceState::Off) {
            Ok(()) => info!("[State] Device {} turned OFF ({})", id, reason),
            Err(e) => {
                error!("[DB] Failed to update device {} state to OFF: {}", id, e);
                inner.stats.record_persistence_error();
            }
        }

        self.append_log(DeviceLogEntry {
            device_id: id,
            user_id: request.user_id,
            session_id,
            state: DeviceState::Off,
            changed_at_ms: ended_at_ms,
            duration: Some(actual),
            reason: Some(reason),
        });

        if let Some(sid) = session_id {
            if let Err(e) = inner.store.close_session(sid, ended_at_ms, reason) {
                error!("[DB] Failed to update session {}: {}", sid, e);
                inner.stats.record_persistence_error();
            }
        }

        self.broadcast(&StatusEvent::off(id, reason, actual));
        match reason {
            ShutdownReason::Force => inner.stats.record_forced(),
            _ => inner.stats.record_completed(),
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Side effects
    // ───────────────────────────────────────────────────────────────

    fn publish_command(&self, payload: &str) {
        let s = &self.inner.settings;
        if let Err(e) = self.inner.bus.publish(&s.topic, payload, s.qos, s.retain) {
            error!("[Bus] Failed to publish '{}' to {}: {}", payload, s.topic, e);
            self.inner.stats.record_bus_error();
        }
    }

    fn append_log(&self, entry: DeviceLogEntry) {
        let (id, state) = (entry.device_id, entry.state);
        if let Err(e) = self.inner.store.append_log(entry) {
            error!("[DB] Failed to log {} for device {}: {}", state, id, e);
            self.inner.stats.record_persistence_error();
        }
    }

    fn broadcast(&self, event: &StatusEvent) {
        match event.to_json() {
            Ok(json) => {
                self.inner.broadcaster.publish(&json);
            }
            Err(e) => warn!("[Broadcast] Failed to encode status event: {}", e),
        }
    }

    /// Push delivery runs on its own thread; the loop never waits for it.
    fn notify(&self, notice: Notice) {
        let notifier = self.inner.notifier.clone();
        let spawned = std::thread::Builder::new()
            .name("notify".into())
            .spawn(move || {
                if let Err(e) = notifier.notify_all(&notice) {
                    warn!(
                        "[Notify] Failed to send notification for device {}: {}",
                        notice.device_id, e
                    );
                }
            });
        if let Err(e) = spawned {
            warn!("[Notify] Could not spawn notification thread: {}", e);
        }
    }
}

impl SchedulerDelegate for ActivationEngine {
    fn on_schedule_due(&self, item: &ScheduleItem) -> Result<(), AdmissionError> {
        self.enqueue(ActivationRequest {
            user_id: item.user_id,
            device_id: item.device_id,
            duration: item.duration,
        })
        .map(|_ticket| ())
    }
}
