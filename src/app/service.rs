//! Control plane: the hexagonal core wired together.
//!
//! [`ControlPlane`] owns one [`ActivationEngine`], one [`Scheduler`] and
//! one [`Broadcaster`], and runs the engine and scheduler loops on a
//! dedicated thread.  Nothing here is global: tests start as many
//! independent control planes as they like.
//!
//! ```text
//!  CommandBus ◀── ┌──────────────────────────────┐ ──▶ Notifier
//!                 │  thread "activation-engine"  │
//!  DeviceStore ◀──│  LocalExecutor               │
//!                 │   ├─ ActivationEngine::run   │
//!                 │   └─ Scheduler::run          │
//!                 └──────────────────────────────┘
//!  inbound bus ──▶ InboundRouter ──▶ acks / Broadcaster ──▶ Observers
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::JoinHandle;

use edge_executor::LocalExecutor;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use futures_lite::{FutureExt, future};
use log::{debug, error, info, warn};

use crate::broadcast::Broadcaster;
use crate::config::ControlPlaneConfig;
use crate::diagnostics::{RuntimeMetrics, panic_message};
use crate::engine::ActivationEngine;
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::topics::{self, Inbound};

use super::ports::Ports;

type StopSignal = Signal<CriticalSectionRawMutex, ()>;

// ───────────────────────────────────────────────────────────────
// Inbound routing
// ───────────────────────────────────────────────────────────────

/// Routes messages arriving from the bus.  Cheap to clone and safe to use
/// from the bus adapter's own thread.
#[derive(Clone)]
pub struct InboundRouter {
    engine: ActivationEngine,
    broadcaster: Arc<Broadcaster>,
}

impl InboundRouter {
    /// Status payloads go to observers verbatim; acks resolve the
    /// device's pending handshake.  Returns `false` for unknown topics.
    pub fn route(&self, topic: &str, payload: &str) -> bool {
        match topics::parse_inbound(topic) {
            Some(Inbound::Status(id)) => {
                debug!("[Broadcast] status from device {}: {}", id, payload);
                self.broadcaster.publish(payload);
                true
            }
            Some(Inbound::Ack(id)) => {
                self.engine.acknowledge(id);
                true
            }
            None => {
                warn!("Ignoring message on unexpected topic '{}'", topic);
                false
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// ControlPlane
// ───────────────────────────────────────────────────────────────

pub struct ControlPlane {
    engine: ActivationEngine,
    scheduler: Arc<Scheduler>,
    broadcaster: Arc<Broadcaster>,
    stop: Arc<StopSignal>,
    worker: Option<JoinHandle<()>>,
}

impl ControlPlane {
    /// Validate `config`, build the components and start both loops.
    pub fn start(config: &ControlPlaneConfig, ports: Ports) -> Result<Self> {
        config.validate()?;

        let broadcaster = Arc::new(Broadcaster::new());
        let engine = ActivationEngine::new(config, ports, broadcaster.clone());
        let scheduler = Arc::new(Scheduler::new(config.scheduler_poll()));
        let stop = Arc::new(StopSignal::new());

        let worker = std::thread::Builder::new()
            .name("activation-engine".into())
            .spawn({
                let engine = engine.clone();
                let scheduler = scheduler.clone();
                let stop = stop.clone();
                move || run_loops(engine, scheduler, stop)
            })?;

        info!(
            "Control plane started (quota {}s / {}s, ack timeout {}ms, topic '{}')",
            config.daily_quota_secs,
            config.quota_window_secs,
            config.ack_timeout_ms,
            config.control_topic
        );

        Ok(Self {
            engine,
            scheduler,
            broadcaster,
            stop,
            worker: Some(worker),
        })
    }

    pub fn engine(&self) -> &ActivationEngine {
        &self.engine
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn router(&self) -> InboundRouter {
        InboundRouter {
            engine: self.engine.clone(),
            broadcaster: self.broadcaster.clone(),
        }
    }

    /// Shorthand for `router().route(..)`.
    pub fn route_inbound(&self, topic: &str, payload: &str) -> bool {
        self.router().route(topic, payload)
    }

    pub fn metrics(&self) -> RuntimeMetrics {
        let engine = &self.engine;
        RuntimeMetrics {
            queued: engine.queued(),
            active_sessions: engine.active_count(),
            pending_acks: engine.pending_acks(),
            quota_used_secs: engine.quota_used().as_secs_f64(),
            quota_secs: engine.quota().as_secs_f64(),
            scheduled: self.scheduler.len(),
            observers: self.broadcaster.observer_count(),
            halted: engine.is_halted(),
            last_crash: engine.last_crash(),
            stats: engine.stats(),
        }
    }

    /// Stop both loops and join the worker thread.  An activation still in
    /// flight is abandoned without publishing "off".
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let active = self.engine.active_count();
        if active > 0 {
            warn!("Stopping control plane with {} activation(s) in flight", active);
        }
        self.stop.signal(());
        if worker.join().is_err() {
            warn!("activation-engine thread panicked");
        }
        info!("Control plane stopped");
    }
}

impl Drop for ControlPlane {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Body of the `activation-engine` thread.  Whatever unwinds out of the
/// executor halts the engine, so callers see `EngineHalted` instead of
/// tickets that never resolve.
fn run_loops(engine: ActivationEngine, scheduler: Arc<Scheduler>, stop: Arc<StopSignal>) {
    let watchdog = engine.clone();
    let result = std::panic::catch_unwind(AssertUnwindSafe(move || {
        let executor: LocalExecutor<'_, 8> = LocalExecutor::new();

        let activator = engine.clone();
        executor.spawn(async move { activator.run().await }).detach();
        executor
            .spawn(async move {
                if let Err(payload) = AssertUnwindSafe(scheduler.run(engine))
                    .catch_unwind()
                    .await
                {
                    error!("[Panic] Scheduler stopped: {}", panic_message(&*payload));
                }
            })
            .detach();

        future::block_on(executor.run(stop.wait()));
    }));

    if let Err(payload) = result {
        let reason = panic_message(&*payload);
        error!("[Panic] activation-engine thread stopped: {}", reason);
        watchdog.halt(reason);
    }
}
