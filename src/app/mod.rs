//! Application layer: ports, console commands, status events and the
//! control plane that wires the engine, scheduler and broadcaster
//! together.
//!
//! The domain modules never touch I/O directly; everything flows through
//! the **port traits** in [`ports`], so the whole control plane runs
//! against mock adapters in tests.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
