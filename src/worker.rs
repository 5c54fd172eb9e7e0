//! Worker process lifecycle: startup, the poll/decode/publish loop, and
//! shutdown.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use thiserror::Error;
use tracing::{debug, info};

use crate::dispatch::{claim_pending_input, publish_output};
use crate::layout::{
    input_sem_name, OutputSlot, IN_SLOT_COUNT, MAX_WORKERS, OUT_SEM_NAME, POLL_INTERVAL,
    STATUS_OCCUPIED,
};
use crate::plugin::{DecoderPlugin, PluginError};
use crate::sem::NamedSemaphore;
use crate::shm::Arena;

/// Process-wide shutdown flag. Written only by the signal handler; read at
/// loop-top and inside the publish retry.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_signo: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

/// Route interrupt, terminate, and abort to the shutdown flag.
fn install_signal_handlers() -> io::Result<()> {
    for signo in [libc::SIGINT, libc::SIGTERM, libc::SIGABRT] {
        let prev = unsafe { libc::signal(signo, request_shutdown as libc::sighandler_t) };
        if prev == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Fatal startup errors. Anything past startup is either a steady-state
/// condition or an accepted shutdown data-loss point, not an error.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("usage: decfan-worker <worker-id> <decoder-path>")]
    Usage,

    #[error("worker id must be an integer in [0, {MAX_WORKERS}): {0}")]
    BadWorkerId(String),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("attach: {0}")]
    Attach(#[from] io::Error),

    #[error("dispatch: {0}")]
    Dispatch(#[source] io::Error),
}

/// Lifecycle states, in order. Transitions are one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// One worker process: a decoder plugin wired to the shared slot protocol.
///
/// Resources are released by `Drop` exactly once on any exit path: plugin
/// teardown first, then the segment unmaps, then the semaphores close. A
/// partially completed startup cleans up only what was acquired, since
/// each field cleans up only itself.
#[derive(Debug)]
pub struct Worker {
    id: u32,
    plugin: DecoderPlugin,
    arena: Arena,
    input_sems: Vec<NamedSemaphore>,
    output_sem: NamedSemaphore,
    state: WorkerState,
}

impl Worker {
    /// Validate identity, load the decoder, attach to the orchestrator's
    /// resources, and install signal handlers. Any failure is fatal.
    pub fn start(id: u32, decoder_path: &Path) -> Result<Self, WorkerError> {
        if id >= MAX_WORKERS {
            return Err(WorkerError::BadWorkerId(id.to_string()));
        }

        info!(worker = id, pid = std::process::id(), "worker starting");

        let plugin = DecoderPlugin::load(decoder_path)?;
        info!(worker = id, decoder = plugin.name(), "decoder loaded");
        plugin.setup();

        let input_sems = (0..IN_SLOT_COUNT)
            .map(|i| NamedSemaphore::open(&input_sem_name(i)))
            .collect::<io::Result<Vec<_>>>()?;
        let output_sem = NamedSemaphore::open(OUT_SEM_NAME)?;
        let arena = Arena::attach()?;

        install_signal_handlers()?;

        Ok(Self {
            id,
            plugin,
            arena,
            input_sems,
            output_sem,
            state: WorkerState::Starting,
        })
    }

    /// Poll for pending inputs, decode, and publish until a termination
    /// signal is observed. An in-flight decode is never interrupted; the
    /// flag is checked only at loop-top and inside the publish retry.
    pub fn run(&mut self) -> io::Result<()> {
        self.state = WorkerState::Running;
        info!(worker = self.id, decoder = self.plugin.name(), "running");

        loop {
            if SHUTDOWN.load(Ordering::Relaxed) {
                self.state = WorkerState::Draining;
                info!(worker = self.id, "shutdown observed, no new claims");
                break;
            }

            thread::sleep(POLL_INTERVAL);

            let Some(input) = claim_pending_input(&self.arena, &self.input_sems, self.id)? else {
                continue;
            };
            debug!(worker = self.id, len = input.len, "claimed input");

            let result = self.plugin.decode(input.payload());

            // Carry the consumed input verbatim so the orchestrator can
            // attribute the result to its originating run.
            let bundle = OutputSlot {
                status: STATUS_OCCUPIED,
                worker: self.id,
                input,
                result,
            };

            if !publish_output(&self.arena, &self.output_sem, &bundle, &SHUTDOWN)? {
                self.state = WorkerState::Draining;
                info!(worker = self.id, "shutdown observed during publish, result dropped");
                break;
            }
        }

        self.state = WorkerState::Stopped;
        info!(worker = self.id, "stopped");
        Ok(())
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }
}
