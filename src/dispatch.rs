//! The two slot-protocol operations: claiming a pending input and
//! publishing a finished output.
//!
//! Both hold a semaphore only for the duration of an inspect-and-copy,
//! never across a decode call or a sleep, so critical sections stay
//! bounded by the slot size regardless of decoder latency.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tracing::{debug, trace};

use crate::layout::{InputSlot, OutputSlot, IN_SLOT_COUNT, MAX_WORKERS, POLL_INTERVAL, STATUS_EMPTY};
use crate::sem::NamedSemaphore;
use crate::shm::Arena;

/// Claim at most one input slot still pending for `worker`.
///
/// Slots are scanned in fixed ascending order, so low indices are
/// structurally favored. On a hit the whole slot is copied out, the
/// worker's pending bit is cleared in place, and the scan stops. Returns
/// `None` when no slot is currently pending for this worker.
pub fn claim_pending_input(
    arena: &Arena,
    input_sems: &[NamedSemaphore],
    worker: u32,
) -> io::Result<Option<InputSlot>> {
    debug_assert_eq!(input_sems.len(), IN_SLOT_COUNT);
    debug_assert!(worker < MAX_WORKERS);

    for (index, sem) in input_sems.iter().enumerate() {
        let _guard = sem.lock()?;

        // SAFETY: the slot semaphore is held for the whole read-modify-write.
        unsafe {
            let slot = arena.input_slot(index);
            if !(*slot).is_pending_for(worker) {
                trace!(slot = index, "input slot already processed");
                continue;
            }

            let claimed = *slot;
            (*slot).clear_pending(worker);
            return Ok(Some(claimed));
        }
    }

    Ok(None)
}

/// Publish one finished bundle into output slot 0, retrying under a fixed
/// backoff while the slot is occupied.
///
/// Returns `Ok(true)` once the bundle is written, or `Ok(false)` if
/// `shutdown` became set first; in that case the bundle is dropped by the
/// caller. Only index 0 is exercised even though the segment carries an
/// output slot array.
pub fn publish_output(
    arena: &Arena,
    output_sem: &NamedSemaphore,
    bundle: &OutputSlot,
    shutdown: &AtomicBool,
) -> io::Result<bool> {
    while !shutdown.load(Ordering::Relaxed) {
        thread::sleep(POLL_INTERVAL);

        let _guard = output_sem.lock()?;

        // SAFETY: the output semaphore is held for the status check and copy.
        unsafe {
            let slot = arena.output_slot(0);
            if (*slot).status != STATUS_EMPTY {
                debug!(slot = 0, "output slot occupied, retrying");
                continue;
            }

            // The bundle carries its own occupied status, so one copy both
            // writes the result and flips the slot.
            *slot = *bundle;
        }

        return Ok(true);
    }

    debug!("shutdown observed before publish, dropping bundle");
    Ok(false)
}
