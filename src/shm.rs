//! Attach-only view over the orchestrator's shared segment.

use std::ffi::CString;
use std::io;
use std::ptr::NonNull;

use tracing::debug;

use crate::layout::{
    input_slot_offset, output_slot_offset, InputSlot, OutputSlot, ARENA_SIZE, IN_SLOT_COUNT,
    OUT_SLOT_COUNT, SHM_NAME,
};

/// Mapping of the shared segment into this process.
///
/// The segment is created, sized, and eventually destroyed by the
/// orchestrator; the worker only maps and unmaps it. Slot addresses are
/// fixed offset arithmetic over the base pointer.
#[derive(Debug)]
pub struct Arena {
    base: NonNull<u8>,
    len: usize,
}

// All slot access through the mapping is guarded by the per-slot
// semaphores, so concurrent holders of a reference stay exclusive.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Attach read/write to the pre-existing segment. Fails if the segment
    /// does not exist or cannot be mapped.
    pub fn attach() -> io::Result<Self> {
        let c_name = CString::new(SHM_NAME).expect("segment name is a valid C string");

        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0o644) };
        if fd < 0 {
            let err = io::Error::last_os_error();
            return Err(io::Error::new(
                err.kind(),
                format!("shm_open {SHM_NAME}: {err}"),
            ));
        }

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                ARENA_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(io::Error::new(
                err.kind(),
                format!("mmap {SHM_NAME} ({ARENA_SIZE} bytes): {err}"),
            ));
        }

        // The mapping keeps the segment reachable; the descriptor is not
        // needed past this point.
        unsafe { libc::close(fd) };

        debug!(name = SHM_NAME, len = ARENA_SIZE, "attached shared segment");

        Ok(Self {
            base: NonNull::new(ptr as *mut u8).expect("mmap returned non-null"),
            len: ARENA_SIZE,
        })
    }

    /// Pointer to input slot `index`.
    ///
    /// # Safety
    /// The caller must hold the slot's semaphore for any read or write
    /// through the pointer, and `index` must be below [`IN_SLOT_COUNT`].
    pub unsafe fn input_slot(&self, index: usize) -> *mut InputSlot {
        debug_assert!(index < IN_SLOT_COUNT);
        self.base.as_ptr().add(input_slot_offset(index)) as *mut InputSlot
    }

    /// Pointer to output slot `index`.
    ///
    /// # Safety
    /// The caller must hold the output semaphore for any read or write
    /// through the pointer, and `index` must be below [`OUT_SLOT_COUNT`].
    pub unsafe fn output_slot(&self, index: usize) -> *mut OutputSlot {
        debug_assert!(index < OUT_SLOT_COUNT);
        self.base.as_ptr().add(output_slot_offset(index)) as *mut OutputSlot
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // Detach only; the orchestrator unlinks the segment.
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}
