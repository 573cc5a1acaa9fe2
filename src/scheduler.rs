//! Deferred activations.
//!
//! A min-heap of [`ScheduleItem`]s ordered by wall-clock start time.  The
//! scheduler loop sleeps until the earliest item is due, then hands it to
//! a [`SchedulerDelegate`] (the activation engine), which runs it through
//! normal admission.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │   add(item) ──▶ heap ──┬── wake signal                       │
//! │                        │                                     │
//! │                        ▼                                     │
//! │   run loop:  empty?     ─▶ sleep(poll)         ┐             │
//! │              not due?   ─▶ sleep(start-now)    ├─ or wake    │
//! │                            (at most poll)      ┘             │
//! │              due        ─▶ pop ─▶ SchedulerDelegate          │
//! │                                   (ActivationEngine.enqueue) │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every insertion fires the wake signal, so an item earlier than the one
//! the loop is sleeping on is never delayed.  No single sleep is longer
//! than the poll interval; a far-future item is re-checked each poll.  A delegate error is logged
//! and the item is dropped; there is no retry.

use core::cell::RefCell;
use core::cmp::{Ordering, Reverse};
use core::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use core::time::Duration;
use std::collections::BinaryHeap;
use std::time::SystemTime;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::Timer;
use futures_lite::future;
use log::{info, warn};

use crate::adapters::time::to_embassy;
use crate::app::ports::SchedulerDelegate;
use crate::model::{DeviceId, UserId};

// ═══════════════════════════════════════════════════════════════
//  Schedule types
// ═══════════════════════════════════════════════════════════════

/// One deferred activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleItem {
    pub start_at: SystemTime,
    pub duration: Duration,
    pub device_id: DeviceId,
    /// Attributed user; `0` for system schedules.
    pub user_id: UserId,
}

impl ScheduleItem {
    /// A system-owned item starting `delay` from now.
    pub fn after(delay: Duration, device_id: DeviceId, duration: Duration) -> Self {
        Self {
            start_at: SystemTime::now() + delay,
            duration,
            device_id,
            user_id: 0,
        }
    }
}

/// Heap entry; `seq` keeps equal start times in insertion order.
#[derive(Debug, Clone, Copy)]
struct Entry {
    item: ScheduleItem,
    seq: u64,
}

impl Entry {
    fn key(&self) -> (SystemTime, u64) {
        (self.item.start_at, self.seq)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

#[derive(Default)]
struct Queue {
    heap: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
}

/// What the loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Due(ScheduleItem),
    Sleep(Duration),
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler
// ═══════════════════════════════════════════════════════════════

pub struct Scheduler {
    queue: Mutex<CriticalSectionRawMutex, RefCell<Queue>>,
    wake: Signal<CriticalSectionRawMutex, ()>,
    /// Sleep used while the heap is empty.
    poll_interval: Duration,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            queue: Mutex::new(RefCell::new(Queue::default())),
            wake: Signal::new(),
            poll_interval,
            running: AtomicBool::new(false),
        }
    }

    /// Insert an item and wake the loop.  Items in the past run on the
    /// next loop turn.
    pub fn add(&self, item: ScheduleItem) {
        self.queue.lock(|q| {
            let mut q = q.borrow_mut();
            let seq = q.next_seq;
            q.next_seq += 1;
            q.heap.push(Reverse(Entry { item, seq }));
        });
        info!(
            "[Schedule] Added device {} for {:?} (user {})",
            item.device_id, item.duration, item.user_id
        );
        self.wake.signal(());
    }

    pub fn len(&self) -> usize {
        self.queue.lock(|q| q.borrow().heap.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pending items, earliest first.
    pub fn upcoming(&self) -> Vec<ScheduleItem> {
        let mut entries: Vec<Entry> =
            self.queue.lock(|q| q.borrow().heap.iter().map(|r| r.0).collect());
        entries.sort();
        entries.into_iter().map(|e| e.item).collect()
    }

    /// Pop the earliest item if it is due at `now`, otherwise say how long
    /// to sleep.
    pub fn step(&self, now: SystemTime) -> Step {
        self.queue.lock(|q| {
            let mut q = q.borrow_mut();
            let Some(Reverse(head)) = q.heap.peek() else {
                return Step::Sleep(self.poll_interval);
            };
            match head.item.start_at.duration_since(now) {
                Ok(wait) if !wait.is_zero() => Step::Sleep(wait),
                _ => {
                    let item = head.item;
                    q.heap.pop();
                    Step::Due(item)
                }
            }
        })
    }

    /// The scheduler loop.  Only the first caller runs; later calls return
    /// immediately.
    pub async fn run<D: SchedulerDelegate>(&self, delegate: D) {
        if self.running.swap(true, AtomicOrdering::AcqRel) {
            warn!("[Schedule] scheduler loop already running");
            return;
        }
        info!("[Schedule] Scheduler started");

        loop {
            // Inserts after this point are seen by `step` or wake the sleep.
            self.wake.reset();
            match self.step(SystemTime::now()) {
                Step::Due(item) => {
                    info!(
                        "[Schedule] Processing schedule for device {} ({:?})",
                        item.device_id, item.duration
                    );
                    if let Err(e) = delegate.on_schedule_due(&item) {
                        warn!("[Schedule] Error enqueuing device activation: {}", e);
                    }
                }
                Step::Sleep(wait) => {
                    let nap = wait.min(self.poll_interval);
                    future::or(Timer::after(to_embassy(nap)), self.wake.wait()).await;
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
