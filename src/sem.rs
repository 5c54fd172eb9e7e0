//! Named POSIX semaphores, opened from an orchestrator-owned namespace.
//!
//! Workers never create or unlink semaphores; they open existing ones and
//! close them on drop. Acquisition hands out a guard that posts on drop, so
//! a critical section cannot leak the semaphore on any exit path.

use std::ffi::CString;
use std::io;

/// Handle to a pre-existing named semaphore.
#[derive(Debug)]
pub struct NamedSemaphore {
    raw: *mut libc::sem_t,
    name: String,
}

// The handle is only ever used from the worker's single thread, but the
// integration tests drive claims from multiple threads over one open set.
// sem_wait/sem_post are thread-safe on the same sem_t.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Open an existing named semaphore read/write. Fails if the
    /// orchestrator has not created it.
    pub fn open(name: &str) -> io::Result<Self> {
        let c_name = CString::new(name).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "semaphore name contains NUL")
        })?;

        let raw = unsafe { libc::sem_open(c_name.as_ptr(), libc::O_RDWR) };
        if raw == libc::SEM_FAILED {
            let err = io::Error::last_os_error();
            return Err(io::Error::new(
                err.kind(),
                format!("sem_open {name}: {err}"),
            ));
        }

        Ok(Self {
            raw,
            name: name.to_owned(),
        })
    }

    /// Acquire the semaphore, retrying on EINTR. The returned guard
    /// releases it when dropped.
    pub fn lock(&self) -> io::Result<SemGuard<'_>> {
        loop {
            if unsafe { libc::sem_wait(self.raw) } == 0 {
                return Ok(SemGuard { sem: self });
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(io::Error::new(
                err.kind(),
                format!("sem_wait {}: {err}", self.name),
            ));
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // Close our handle only; the orchestrator owns the semaphore.
        unsafe {
            libc::sem_close(self.raw);
        }
    }
}

/// Scoped ownership of an acquired semaphore.
pub struct SemGuard<'a> {
    sem: &'a NamedSemaphore,
}

impl Drop for SemGuard<'_> {
    fn drop(&mut self) {
        unsafe {
            libc::sem_post(self.sem.raw);
        }
    }
}
