//! Per-request outcome tickets.
//!
//! `enqueue` stays non-blocking; the caller gets a [`Ticket`] it may await,
//! poll, or simply drop.  The engine resolves it exactly once.

use core::time::Duration;
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::adapters::time::to_embassy;
use crate::error::{HandshakeFailure, Rejection};
use crate::model::ShutdownReason;

/// Terminal result of one accepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// Dropped at dequeue; the device was never commanded.
    Rejected(Rejection),
    /// "on" was published but no session was created.
    HandshakeFailed(HandshakeFailure),
    /// The session ran and was shut down.
    Finished {
        reason: ShutdownReason,
        actual: Duration,
    },
}

type OutcomeSignal = Signal<CriticalSectionRawMutex, ActivationOutcome>;

pub struct Ticket {
    signal: Arc<OutcomeSignal>,
}

pub(crate) struct Reporter {
    signal: Arc<OutcomeSignal>,
}

pub(crate) fn ticket_pair() -> (Ticket, Reporter) {
    let signal = Arc::new(OutcomeSignal::new());
    (
        Ticket {
            signal: signal.clone(),
        },
        Reporter { signal },
    )
}

impl Ticket {
    /// Resolves once the engine is done with the request.
    pub async fn outcome(&self) -> ActivationOutcome {
        self.signal.wait().await
    }

    /// Non-blocking poll; consumes the outcome if it is ready.
    pub fn try_outcome(&self) -> Option<ActivationOutcome> {
        self.signal.try_take()
    }

    /// Block the calling thread for at most `limit`.  Must not be called
    /// from the engine's own executor.
    pub fn wait_timeout(&self, limit: Duration) -> Option<ActivationOutcome> {
        futures_lite::future::block_on(embassy_time::with_timeout(
            to_embassy(limit),
            self.outcome(),
        ))
        .ok()
    }
}

impl Reporter {
    pub(crate) fn report(self, outcome: ActivationOutcome) {
        self.signal.signal(outcome);
    }
}
