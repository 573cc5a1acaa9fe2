//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter        | Implements         | Connects to                  |
//! |----------------|--------------------|------------------------------|
//! | `log_sink`     | Notifier, Observer | `log` facade                 |
//! | `memory_store` | DeviceStore        | In-process tables            |
//! | `sim_device`   | CommandBus         | Simulated motor + inbox      |
//! | `time`         | n/a                | Monotonic + wall clock       |

pub mod log_sink;
pub mod memory_store;
pub mod sim_device;
pub mod time;
