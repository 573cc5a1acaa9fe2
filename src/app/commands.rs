//! Console commands.
//!
//! One command per line, whitespace-separated:
//!
//! ```text
//!   activate <device> <secs> [user]
//!   shutdown <device>
//!   schedule <device> <delay_secs> <secs>
//!   ack <device>
//!   mute | unmute
//!   status
//!   help
//!   quit
//! ```

use core::fmt;
use core::str::FromStr;
use core::time::Duration;

use crate::model::{DeviceId, UserId};

/// Commands the console can send into the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppCommand {
    Activate {
        device_id: DeviceId,
        duration: Duration,
        user_id: UserId,
    },
    ForceShutdown(DeviceId),
    Schedule {
        device_id: DeviceId,
        delay: Duration,
        duration: Duration,
    },
    /// Inject a device ack by hand.
    Ack(DeviceId),
    /// Stop / resume the simulated device's automatic acks.
    SetResponsive(bool),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    Empty,
    UnknownCommand(String),
    MissingArgument(&'static str),
    InvalidNumber { arg: &'static str, value: String },
    ZeroDuration,
    TrailingInput(String),
}

impl fmt::Display for CommandParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty command"),
            Self::UnknownCommand(c) => write!(f, "unknown command '{}' (try 'help')", c),
            Self::MissingArgument(arg) => write!(f, "missing <{}>", arg),
            Self::InvalidNumber { arg, value } => write!(f, "<{}> is not a number: '{}'", arg, value),
            Self::ZeroDuration => write!(f, "duration must be at least one second"),
            Self::TrailingInput(rest) => write!(f, "unexpected input '{}'", rest),
        }
    }
}

impl std::error::Error for CommandParseError {}

pub const HELP: &str = "\
activate <device> <secs> [user]   run a device for <secs>
shutdown <device>                 force a device off
schedule <device> <delay> <secs>  run a device <delay> seconds from now
ack <device>                      deliver a device ack by hand
mute | unmute                     stop/resume automatic simulated acks
status                            print runtime metrics
quit                              exit";

impl FromStr for AppCommand {
    type Err = CommandParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut args = line.split_whitespace();
        let verb = args.next().ok_or(CommandParseError::Empty)?;

        let cmd = match verb.to_ascii_lowercase().as_str() {
            "activate" | "on" => {
                let device_id = number(args.next(), "device")?;
                let duration = seconds(args.next(), "secs")?;
                let user_id = match args.next() {
                    Some(raw) => number(Some(raw), "user")?,
                    None => 0,
                };
                Self::Activate {
                    device_id,
                    duration,
                    user_id,
                }
            }
            "shutdown" | "off" => Self::ForceShutdown(number(args.next(), "device")?),
            "schedule" => {
                let device_id = number(args.next(), "device")?;
                let delay = Duration::from_secs(number(args.next(), "delay")?);
                let duration = seconds(args.next(), "secs")?;
                Self::Schedule {
                    device_id,
                    delay,
                    duration,
                }
            }
            "ack" => Self::Ack(number(args.next(), "device")?),
            "mute" => Self::SetResponsive(false),
            "unmute" => Self::SetResponsive(true),
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(CommandParseError::UnknownCommand(other.to_owned())),
        };

        let rest: Vec<&str> = args.collect();
        if !rest.is_empty() {
            return Err(CommandParseError::TrailingInput(rest.join(" ")));
        }
        Ok(cmd)
    }
}

fn number<T: FromStr>(raw: Option<&str>, arg: &'static str) -> Result<T, CommandParseError> {
    let raw = raw.ok_or(CommandParseError::MissingArgument(arg))?;
    raw.parse().map_err(|_| CommandParseError::InvalidNumber {
        arg,
        value: raw.to_owned(),
    })
}

fn seconds(raw: Option<&str>, arg: &'static str) -> Result<Duration, CommandParseError> {
    match number::<u64>(raw, arg)? {
        0 => Err(CommandParseError::ZeroDuration),
        secs => Ok(Duration::from_secs(secs)),
    }
}
