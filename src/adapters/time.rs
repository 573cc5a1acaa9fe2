//! Time helpers.
//!
//! Two clocks are in play:
//!
//! - **Monotonic** (`embassy_time::Instant`) drives timers, quota windows
//!   and measured on-time.  Conversions between `core::time::Duration` and
//!   `embassy_time::Duration` live here.
//! - **Wall clock** (`chrono`) stamps persisted rows and the time-of-day
//!   shown in notifications.

use core::time::Duration;

use chrono::{Local, Utc};

/// Milliseconds since the Unix epoch.  Clamped to 0 for clocks set
/// before 1970.
pub fn unix_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Local time of day, e.g. `03:04 PM`.
pub fn clock_label() -> String {
    Local::now().format("%I:%M %p").to_string()
}

/// Longest duration handed to embassy-time, in microseconds.  Tick
/// conversion rounds up by adding before it divides, and timers add the
/// duration to `Instant::now()`, so half the range leaves room for both.
pub const MAX_EMBASSY_MICROS: u64 = u64::MAX / 2;

/// Saturates at [`MAX_EMBASSY_MICROS`].
pub fn to_embassy(d: Duration) -> embassy_time::Duration {
    let micros = u64::try_from(d.as_micros()).unwrap_or(u64::MAX);
    embassy_time::Duration::from_micros(micros.min(MAX_EMBASSY_MICROS))
}

pub fn from_embassy(d: embassy_time::Duration) -> Duration {
    Duration::from_micros(d.as_micros())
}

/// `d` expressed in whole-or-fractional minutes, as used in user-facing text.
pub fn minutes(d: Duration) -> f64 {
    d.as_secs_f64() / 60.0
}
