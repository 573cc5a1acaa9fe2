//! PumpLink console: main entry point.
//!
//! Runs the full control plane in-process against a simulated motor and
//! reads operator commands from stdin.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  SimulatedDevice   InMemoryStore   LogNotifier   LogObserver   │
//! │  (CommandBus)      (DeviceStore)   (Notifier)    (Observer)    │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │   ControlPlane: ActivationEngine · Scheduler ·         │    │
//! │  │                 Broadcaster                            │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  stdin ──▶ AppCommand          Inbox ──▶ InboundRouter         │
//! └────────────────────────────────────────────────────────────────┘
//! ```

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::info;

use pumplink::adapters::log_sink::{LogNotifier, LogObserver};
use pumplink::adapters::memory_store::InMemoryStore;
use pumplink::adapters::sim_device::{Inbox, SimulatedDevice};
use pumplink::app::commands::{AppCommand, HELP};
use pumplink::app::ports::Ports;
use pumplink::app::service::ControlPlane;
use pumplink::config::ControlPlaneConfig;
use pumplink::diagnostics;
use pumplink::engine::ActivationRequest;
use pumplink::model::DeviceId;
use pumplink::scheduler::ScheduleItem;

const SIM_DEVICE: DeviceId = 1;
const SIM_ACK_DELAY: Duration = Duration::from_millis(300);

fn main() -> Result<()> {
    // ── 1. Logging ────────────────────────────────────────────
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    diagnostics::install_panic_handler();

    info!("╔══════════════════════════════════════╗");
    info!("║  PumpLink v{}                        ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Config ─────────────────────────────────────────────
    let config = ControlPlaneConfig::from_env()?;

    // ── 3. Adapters ───────────────────────────────────────────
    let inbox = Arc::new(Inbox::new());
    let store = Arc::new(InMemoryStore::new().with_device(SIM_DEVICE, "Motor"));
    let device = Arc::new(SimulatedDevice::new(
        SIM_DEVICE,
        &config.control_topic,
        SIM_ACK_DELAY,
        inbox.clone(),
    ));

    // ── 4. Control plane ──────────────────────────────────────
    let plane = ControlPlane::start(
        &config,
        Ports {
            bus: device.clone(),
            store: store.clone(),
            notifier: Arc::new(LogNotifier::new()),
        },
    )?;
    plane
        .broadcaster()
        .subscribe(Arc::new(LogObserver::new("console")));

    // ── 5. Inbound bus pump ───────────────────────────────────
    let router = plane.router();
    std::thread::Builder::new()
        .name("bus-inbound".into())
        .spawn(move || {
            loop {
                let msg = futures_lite::future::block_on(inbox.receive());
                router.route(&msg.topic, &msg.payload);
            }
        })
        .context("failed to spawn bus-inbound thread")?;

    // ── 6. Command loop ───────────────────────────────────────
    println!("{}", HELP);
    for line in std::io::stdin().lock().lines() {
        let line = line.context("failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<AppCommand>() {
            Ok(AppCommand::Quit) => break,
            Ok(cmd) => execute(&plane, &device, &store, cmd)?,
            Err(e) => println!("error: {}", e),
        }
    }

    plane.stop();
    Ok(())
}

fn execute(
    plane: &ControlPlane,
    device: &SimulatedDevice,
    store: &InMemoryStore,
    cmd: AppCommand,
) -> Result<()> {
    match cmd {
        AppCommand::Activate {
            device_id,
            duration,
            user_id,
        } => {
            let request = ActivationRequest {
                user_id,
                device_id,
                duration,
            };
            match plane.engine().enqueue(request) {
                Ok(ticket) => {
                    println!("queued device {} for {:?}", device_id, duration);
                    std::thread::Builder::new()
                        .name("ticket".into())
                        .spawn(move || {
                            let outcome = futures_lite::future::block_on(ticket.outcome());
                            info!("Device {} outcome: {:?}", device_id, outcome);
                        })
                        .context("failed to spawn ticket watcher")?;
                }
                Err(e) => println!("rejected: {}", e),
            }
        }
        AppCommand::ForceShutdown(device_id) => {
            if plane.engine().force_shutdown(device_id) {
                println!("shutdown requested for device {}", device_id);
            } else {
                println!("device {} has no active session", device_id);
            }
        }
        AppCommand::Schedule {
            device_id,
            delay,
            duration,
        } => {
            plane
                .scheduler()
                .add(ScheduleItem::after(delay, device_id, duration));
            println!("scheduled device {} in {:?}", device_id, delay);
        }
        AppCommand::Ack(device_id) => {
            let delivered = plane.engine().acknowledge(device_id);
            println!("ack for device {} delivered: {}", device_id, delivered);
        }
        AppCommand::SetResponsive(on) => {
            device.set_responsive(on);
            println!("simulated acks {}", if on { "enabled" } else { "disabled" });
        }
        AppCommand::Status => {
            let metrics = serde_json::to_string_pretty(&plane.metrics())?;
            println!("{}", metrics);
            for d in store.devices() {
                println!("device {} '{}': {}", d.id, d.name, d.state);
            }
        }
        AppCommand::Help => println!("{}", HELP),
        AppCommand::Quit => {}
    }
    Ok(())
}
