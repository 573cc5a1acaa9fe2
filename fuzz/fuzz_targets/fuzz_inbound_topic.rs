//! Fuzz target: `topics::parse_inbound`
//!
//! Any topic the parser accepts must rebuild to exactly the same string
//! through `status_topic` / `ack_topic`.
//!
//! cargo fuzz run fuzz_inbound_topic

#![no_main]

use libfuzzer_sys::fuzz_target;
use pumplink::topics::{self, Inbound};

fuzz_target!(|data: &[u8]| {
    let Ok(topic) = core::str::from_utf8(data) else {
        return;
    };
    match topics::parse_inbound(topic) {
        Some(Inbound::Status(id)) => assert_eq!(topics::status_topic(id).as_str(), topic),
        Some(Inbound::Ack(id)) => assert_eq!(topics::ack_topic(id).as_str(), topic),
        None => {}
    }
});
