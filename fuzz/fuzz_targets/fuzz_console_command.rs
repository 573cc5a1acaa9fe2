//! Fuzz target: `AppCommand::from_str`
//!
//! Feeds arbitrary UTF-8 lines into the console parser and asserts that it
//! never panics and never yields a zero-length activation.
//!
//! cargo fuzz run fuzz_console_command

#![no_main]

use libfuzzer_sys::fuzz_target;
use pumplink::app::commands::AppCommand;

fuzz_target!(|data: &[u8]| {
    let Ok(line) = core::str::from_utf8(data) else {
        return;
    };
    match line.parse::<AppCommand>() {
        Ok(AppCommand::Activate { duration, .. }) | Ok(AppCommand::Schedule { duration, .. }) => {
            assert!(!duration.is_zero(), "parser accepted a zero duration");
        }
        Ok(_) => {}
        Err(e) => {
            // Error text must always render.
            let _ = e.to_string();
        }
    }
});
