//! Request correlation / slot table (C5): a fixed-size, power-of-two table
//! of awaiters indexed by `id & (TABLE_SIZE - 1)`, allocated and completed
//! entirely with atomic compare-and-swap — no locks anywhere on the hot
//! path. The reader task, the timeout sweeper, and shutdown all race to
//! complete the same slot; exactly one of them wins per id (spec §4.3, §4.5,
//! §9 "awaiter completion under races").

use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicU8, Ordering};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

const VACANT: u8 = 0;
const ALLOCATING: u8 = 1;
const PENDING: u8 = 2;
const COMPLETING: u8 = 3;

/// Outcome delivered to a waiting caller.
pub type Outcome = Result<Value>;

struct Slot {
    state: AtomicU8,
    /// The request id currently (or most recently) occupying this slot;
    /// disambiguates a stale completion arriving after the id space has
    /// wrapped and reused the slot for a different in-flight request.
    owner_id: AtomicU64,
    /// Monotonic deadline in nanoseconds since the table's epoch; `u64::MAX`
    /// means "no deadline".
    deadline_nanos: AtomicU64,
    awaiter: AtomicPtr<oneshot::Sender<Outcome>>,
}

impl Slot {
    const fn new() -> Self {
        Self {
            state: AtomicU8::new(VACANT),
            owner_id: AtomicU64::new(0),
            deadline_nanos: AtomicU64::new(u64::MAX),
            awaiter: AtomicPtr::new(std::ptr::null_mut()),
        }
    }
}

/// Result of an allocation attempt.
pub enum Allocation {
    Ok(oneshot::Receiver<Outcome>),
    Backpressure,
}

/// Result of a completion attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum CompleteResult {
    Completed,
    AlreadyCompleted,
    UnknownId,
}

pub struct SlotTable {
    slots: Box<[Slot]>,
    mask: u64,
    next_id: AtomicU64,
    epoch: std::time::Instant,
}

impl SlotTable {
    /// `capacity` must be a power of two (the spec's default is 65,536).
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "slot table capacity must be a power of two");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::new);
        Self {
            slots: slots.into_boxed_slice(),
            mask: (capacity - 1) as u64,
            next_id: AtomicU64::new(1),
            epoch: std::time::Instant::now(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Fetch-and-increment the 63-bit id generator.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) & 0x7fff_ffff_ffff_ffff
    }

    fn index_of(&self, id: u64) -> usize {
        (id & self.mask) as usize
    }

    fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Allocate the slot for `id`, with an optional deadline (relative
    /// `Duration` from now). Fails synchronously with `Backpressure` if the
    /// slot is already occupied by another in-flight request.
    pub fn allocate(&self, id: u64, deadline: Option<std::time::Duration>) -> Allocation {
        let slot = &self.slots[self.index_of(id)];

        // Claim the slot first. If it's occupied, bail out without touching
        // owner_id/deadline/awaiter at all; an in-flight occupant's payload
        // must never be overwritten, even transiently.
        if slot.state.compare_exchange(VACANT, ALLOCATING, Ordering::Acquire, Ordering::Acquire).is_err() {
            return Allocation::Backpressure;
        }

        let (tx, rx) = oneshot::channel();
        let boxed = Box::into_raw(Box::new(tx));
        let deadline_nanos = deadline.map(|d| self.now_nanos().saturating_add(d.as_nanos() as u64)).unwrap_or(u64::MAX);

        slot.owner_id.store(id, Ordering::Relaxed);
        slot.deadline_nanos.store(deadline_nanos, Ordering::Relaxed);
        slot.awaiter.store(boxed, Ordering::Relaxed);

        // Publish last: only after this Release store does a thread that
        // observes PENDING via Acquire see a consistent owner_id/deadline/
        // awaiter triple. Nobody else can be looking at this slot in the
        // ALLOCATING state, so there is no reader to race before this point.
        slot.state.store(PENDING, Ordering::Release);
        Allocation::Ok(rx)
    }

    /// Complete the slot believed to hold `id` with `outcome`. Winner-takes-
    /// all: exactly one caller (dispatcher, sweeper, or shutdown) observes
    /// `Completed` for a given occupancy of the slot.
    pub fn complete(&self, id: u64, outcome: Outcome) -> CompleteResult {
        let slot = &self.slots[self.index_of(id)];

        if slot.state.load(Ordering::Acquire) != PENDING {
            return CompleteResult::AlreadyCompleted;
        }
        if slot.owner_id.load(Ordering::Relaxed) != id {
            return CompleteResult::UnknownId;
        }

        match slot.state.compare_exchange(PENDING, COMPLETING, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                // Re-check ownership: another id could have raced us between
                // the load above and this CAS only if the slot had already
                // gone vacant and been reallocated, which is impossible
                // without first passing through this same COMPLETING state
                // transition. Safe to proceed.
                let ptr = slot.awaiter.swap(std::ptr::null_mut(), Ordering::AcqRel);
                if !ptr.is_null() {
                    let tx = unsafe { Box::from_raw(ptr) };
                    let _ = tx.send(outcome);
                }
                slot.deadline_nanos.store(u64::MAX, Ordering::Relaxed);
                slot.state.store(VACANT, Ordering::Release);
                CompleteResult::Completed
            }
            Err(_) => CompleteResult::AlreadyCompleted,
        }
    }

    /// Drain every pending slot, completing each with a clone of `cause`.
    /// Used on shutdown and on an unrecoverable reconnect failure.
    pub fn fail_all(&self, cause: impl Fn() -> Error) {
        for slot in self.slots.iter() {
            if slot.state.load(Ordering::Acquire) != PENDING {
                continue;
            }
            if slot
                .state
                .compare_exchange(PENDING, COMPLETING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let ptr = slot.awaiter.swap(std::ptr::null_mut(), Ordering::AcqRel);
                if !ptr.is_null() {
                    let tx = unsafe { Box::from_raw(ptr) };
                    let _ = tx.send(Err(cause()));
                }
                slot.deadline_nanos.store(u64::MAX, Ordering::Relaxed);
                slot.state.store(VACANT, Ordering::Release);
            }
        }
    }

    /// Sweep pending slots whose deadline has passed, completing them with
    /// `Error::Timeout`. Returns the number of slots timed out.
    pub fn sweep_timeouts(&self) -> usize {
        let now = self.now_nanos();
        let mut timed_out = 0;
        for slot in self.slots.iter() {
            if slot.state.load(Ordering::Acquire) != PENDING {
                continue;
            }
            let deadline = slot.deadline_nanos.load(Ordering::Relaxed);
            if deadline == u64::MAX || now < deadline {
                continue;
            }
            let id = slot.owner_id.load(Ordering::Relaxed);
            let overshoot = std::time::Duration::from_nanos(now.saturating_sub(deadline));
            if self.complete(id, Err(Error::Timeout(overshoot))) == CompleteResult::Completed {
                timed_out += 1;
            }
        }
        timed_out
    }
}

/// Whether this table's occupancy is at or above 90% (a saturation signal
/// the WS client reports through the metrics sink; not a hard failure).
pub fn is_saturated(occupied: usize, capacity: usize) -> bool {
    occupied * 10 >= capacity * 9
}

/// Lightweight occupancy counter kept alongside the table so callers don't
/// have to scan every slot to decide whether to emit a saturation signal.
#[derive(Default)]
pub struct Occupancy(AtomicU64);

impl Occupancy {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
    pub fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocate_complete_roundtrip() {
        let table = SlotTable::new(16);
        let id = table.next_id();
        let rx = match table.allocate(id, None) {
            Allocation::Ok(rx) => rx,
            Allocation::Backpressure => panic!("unexpected backpressure"),
        };
        assert_eq!(table.complete(id, Ok(Value::String("0x1".into()))), CompleteResult::Completed);
        let got = rx.await.unwrap().unwrap();
        assert_eq!(got, Value::String("0x1".into()));
    }

    #[test]
    fn second_allocate_on_occupied_slot_is_backpressure() {
        let table = SlotTable::new(2); // mask = 1, ids alias mod 2
        let id_a = 0u64;
        let id_b = 2u64; // same slot index as id_a
        let _rx_a = match table.allocate(id_a, None) {
            Allocation::Ok(rx) => rx,
            Allocation::Backpressure => panic!("first allocate should succeed"),
        };
        match table.allocate(id_b, None) {
            Allocation::Backpressure => {}
            Allocation::Ok(_) => panic!("expected backpressure on occupied slot"),
        }
    }

    #[tokio::test]
    async fn complete_is_exactly_once() {
        let table = SlotTable::new(16);
        let id = table.next_id();
        let _rx = match table.allocate(id, None) {
            Allocation::Ok(rx) => rx,
            Allocation::Backpressure => panic!(),
        };
        assert_eq!(table.complete(id, Ok(Value::Null)), CompleteResult::Completed);
        assert_eq!(table.complete(id, Ok(Value::Null)), CompleteResult::AlreadyCompleted);
    }

    #[test]
    fn complete_unknown_id_after_reuse_is_rejected() {
        let table = SlotTable::new(2);
        let id_a = 0u64;
        let _rx_a = match table.allocate(id_a, None) {
            Allocation::Ok(rx) => rx,
            Allocation::Backpressure => panic!(),
        };
        assert_eq!(table.complete(id_a, Ok(Value::Null)), CompleteResult::Completed);
        let id_b = 2u64; // reuses the same slot index
        let _rx_b = match table.allocate(id_b, None) {
            Allocation::Ok(rx) => rx,
            Allocation::Backpressure => panic!(),
        };
        // A stale completion for id_a must not disturb id_b's occupancy.
        assert_eq!(table.complete(id_a, Ok(Value::Null)), CompleteResult::UnknownId);
        assert_eq!(table.complete(id_b, Ok(Value::Null)), CompleteResult::Completed);
    }

    #[test]
    fn fail_all_drains_pending() {
        let table = SlotTable::new(16);
        let id1 = table.next_id();
        let id2 = table.next_id();
        let rx1 = match table.allocate(id1, None) {
            Allocation::Ok(rx) => rx,
            Allocation::Backpressure => panic!(),
        };
        let rx2 = match table.allocate(id2, None) {
            Allocation::Ok(rx) => rx,
            Allocation::Backpressure => panic!(),
        };
        table.fail_all(|| Error::TransportClosed);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn saturation_threshold() {
        assert!(!is_saturated(89, 100));
        assert!(is_saturated(90, 100));
        assert!(is_saturated(100, 100));
    }
}
