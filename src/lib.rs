//! PumpLink control plane library.
//!
//! Quota-gated, ack-confirmed activation of remote motors over a message
//! bus, plus deferred scheduling and live status fan-out.  Exposes every
//! module for integration testing; the console binary in `main.rs` is a
//! thin shell over [`app::service::ControlPlane`].

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod broadcast;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod model;
pub mod scheduler;
pub mod topics;
