//! Shared-memory fan-out dispatch for a pool of decoder worker processes.
//!
//! An orchestrator process owns a fixed-size shared segment of input and
//! output slots plus one named semaphore per input slot and one for the
//! output region. It writes candidate bytes into input slots and sets, per
//! slot, one pending bit per worker identity. Each worker process attaches
//! to the segment, repeatedly claims the first slot still pending for it
//! (clearing its bit under the slot's semaphore), runs its decoder plugin,
//! and publishes the result bundled with a verbatim copy of the consumed
//! input into the single contended output slot.
//!
//! Workers are single-threaded; all cross-process synchronization is
//! per-slot mutual exclusion. There is no fairness guarantee and no
//! ordering beyond at-most-one-claim-per-worker-per-input.

pub mod dispatch;
pub mod layout;
pub mod plugin;
pub mod sem;
pub mod shm;
pub mod worker;

pub use dispatch::{claim_pending_input, publish_output};
pub use layout::{DecodeResult, InputSlot, OutputSlot};
pub use plugin::{DecoderPlugin, PluginError};
pub use sem::NamedSemaphore;
pub use shm::Arena;
pub use worker::{Worker, WorkerError, WorkerState};
