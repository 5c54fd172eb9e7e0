//! Shared-segment contract between the orchestrator and every worker.
//!
//! Slot counts, slot sizes, offsets, and semaphore names are compile-time
//! constants. The orchestrator creates the segment and semaphores with the
//! same constants; workers only attach. All structs stored in shared memory
//! are `#[repr(C)]` to guarantee a stable layout across processes.

use std::mem::size_of;

/// Number of worker identities a fan-out mask can address.
/// One bit of `InputSlot::workers` per identity.
pub const MAX_WORKERS: u32 = 32;

/// Number of input slots in the segment.
pub const IN_SLOT_COUNT: usize = 8;

/// Number of addressable output slots. Only index 0 is exercised by the
/// dispatch protocol; the array exists in the segment contract.
pub const OUT_SLOT_COUNT: usize = 4;

/// Capacity of one candidate input payload.
pub const INPUT_MAX: usize = 32;

/// Capacity of one decode-result payload.
pub const RESULT_MAX: usize = 216;

/// Well-known name of the shared segment, created by the orchestrator.
pub const SHM_NAME: &str = "/decfan_arena";

/// Well-known name of the output-region semaphore.
pub const OUT_SEM_NAME: &str = "/decfan_out";

/// Name of the semaphore guarding input slot `index`.
pub fn input_sem_name(index: usize) -> String {
    format!("/decfan_in_{index}")
}

/// Fixed backoff used both for idle input polling and for output-publish
/// retries. The orchestrator's drain cadence assumes bounded polling, not
/// wait/notify.
pub const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

/// Output slot holds no result.
pub const STATUS_EMPTY: u32 = 0;
/// Output slot holds a result the orchestrator has not yet drained.
pub const STATUS_OCCUPIED: u32 = 1;

/// One candidate decode input plus the fan-out mask of workers that still
/// owe it processing.
///
/// Bit `w` of `workers` is set iff worker `w` has not yet consumed the
/// slot's current content. The orchestrator sets bits when it (re)writes
/// the slot; each worker clears only its own bit, at claim time.
#[repr(C, align(64))]
#[derive(Clone, Copy)]
pub struct InputSlot {
    pub workers: u32,
    pub len: u32,
    pub payload: [u8; INPUT_MAX],
}

impl InputSlot {
    /// True if `worker` still owes this slot processing.
    ///
    /// `worker` must be below [`MAX_WORKERS`]; the mask has exactly one
    /// bit per identity.
    #[inline]
    pub fn is_pending_for(&self, worker: u32) -> bool {
        debug_assert!(worker < MAX_WORKERS);
        self.workers & (1 << worker) != 0
    }

    /// Clear `worker`'s pending bit. Idempotent; the caller holds the
    /// slot's semaphore. `worker` must be below [`MAX_WORKERS`].
    #[inline]
    pub fn clear_pending(&mut self, worker: u32) {
        debug_assert!(worker < MAX_WORKERS);
        self.workers &= !(1 << worker);
    }

    /// The candidate bytes, length clamped to the slot capacity.
    pub fn payload(&self) -> &[u8] {
        let len = (self.len as usize).min(INPUT_MAX);
        &self.payload[..len]
    }
}

/// Opaque decode result produced by a plugin. The dispatch core never
/// interprets `outcome` or `data`; it only copies them.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DecodeResult {
    pub outcome: u32,
    pub len: u32,
    pub data: [u8; RESULT_MAX],
}

impl DecodeResult {
    /// All-zero result, used when a plugin declines to produce one.
    pub fn none() -> Self {
        Self {
            outcome: 0,
            len: 0,
            data: [0; RESULT_MAX],
        }
    }
}

/// One published result: the decode output plus a verbatim copy of the
/// input slot that produced it, so runs can be traced end to end.
#[repr(C, align(64))]
#[derive(Clone, Copy)]
pub struct OutputSlot {
    pub status: u32,
    pub worker: u32,
    pub input: InputSlot,
    pub result: DecodeResult,
}

/// Byte offset of input slot `index` from the segment base.
pub const fn input_slot_offset(index: usize) -> usize {
    index * size_of::<InputSlot>()
}

/// Byte offset of output slot `index` from the segment base. Output slots
/// follow the input slot table.
pub const fn output_slot_offset(index: usize) -> usize {
    IN_SLOT_COUNT * size_of::<InputSlot>() + index * size_of::<OutputSlot>()
}

/// Total size of the shared segment.
pub const ARENA_SIZE: usize = output_slot_offset(OUT_SLOT_COUNT);
