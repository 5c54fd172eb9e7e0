// Integration tests for the slot protocol against real POSIX shared
// memory and named semaphores. The harness below plays the orchestrator:
// it creates the segment and semaphores, seeds input slots, and drains
// the output slot. Tests share the global /dev/shm namespace, so they
// are serialized.

#![cfg(unix)]

use std::ffi::CString;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use serial_test::serial;

use decfan::layout::{
    input_sem_name, DecodeResult, InputSlot, OutputSlot, ARENA_SIZE, INPUT_MAX, IN_SLOT_COUNT,
    OUT_SEM_NAME, SHM_NAME, STATUS_EMPTY, STATUS_OCCUPIED,
};
use decfan::{claim_pending_input, publish_output, Arena, NamedSemaphore};

fn create_sem(name: &str) {
    let c_name = CString::new(name).unwrap();
    unsafe {
        libc::sem_unlink(c_name.as_ptr());
        let sem = libc::sem_open(
            c_name.as_ptr(),
            libc::O_CREAT | libc::O_EXCL,
            0o644 as libc::c_uint,
            1 as libc::c_uint,
        );
        assert_ne!(
            sem,
            libc::SEM_FAILED,
            "sem_open {name}: {}",
            io::Error::last_os_error()
        );
        libc::sem_close(sem);
    }
}

/// Stand-in for the orchestrator: owns the segment and semaphores the
/// worker-side code attaches to.
struct Orchestrator {
    arena: Arena,
    input_sems: Vec<NamedSemaphore>,
    output_sem: NamedSemaphore,
}

impl Orchestrator {
    fn create() -> Self {
        let c_name = CString::new(SHM_NAME).unwrap();
        unsafe {
            libc::shm_unlink(c_name.as_ptr());
            let fd = libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o644,
            );
            assert!(fd >= 0, "shm_open: {}", io::Error::last_os_error());
            assert_eq!(libc::ftruncate(fd, ARENA_SIZE as libc::off_t), 0);
            libc::close(fd);
        }

        for i in 0..IN_SLOT_COUNT {
            create_sem(&input_sem_name(i));
        }
        create_sem(OUT_SEM_NAME);

        let arena = Arena::attach().expect("attach freshly created segment");
        let input_sems = (0..IN_SLOT_COUNT)
            .map(|i| NamedSemaphore::open(&input_sem_name(i)).unwrap())
            .collect();
        let output_sem = NamedSemaphore::open(OUT_SEM_NAME).unwrap();

        Self {
            arena,
            input_sems,
            output_sem,
        }
    }

    fn seed_input(&self, index: usize, workers: u32, payload: &[u8]) {
        assert!(payload.len() <= INPUT_MAX);
        let _guard = self.input_sems[index].lock().unwrap();
        unsafe {
            let slot = self.arena.input_slot(index);
            (*slot).workers = workers;
            (*slot).len = payload.len() as u32;
            (*slot).payload = [0; INPUT_MAX];
            (&mut (*slot).payload)[..payload.len()].copy_from_slice(payload);
        }
    }

    fn input_mask(&self, index: usize) -> u32 {
        let _guard = self.input_sems[index].lock().unwrap();
        unsafe { (*self.arena.input_slot(index)).workers }
    }

    fn occupy_output(&self) {
        let _guard = self.output_sem.lock().unwrap();
        unsafe {
            (*self.arena.output_slot(0)).status = STATUS_OCCUPIED;
        }
    }

    fn output_status(&self) -> u32 {
        let _guard = self.output_sem.lock().unwrap();
        unsafe { (*self.arena.output_slot(0)).status }
    }

    fn drain_output(&self) -> Option<OutputSlot> {
        let _guard = self.output_sem.lock().unwrap();
        unsafe {
            let slot = self.arena.output_slot(0);
            if (*slot).status == STATUS_EMPTY {
                return None;
            }
            let drained = *slot;
            (*slot).status = STATUS_EMPTY;
            Some(drained)
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        let c_name = CString::new(SHM_NAME).unwrap();
        unsafe {
            libc::shm_unlink(c_name.as_ptr());
        }
        for i in 0..IN_SLOT_COUNT {
            let c_name = CString::new(input_sem_name(i)).unwrap();
            unsafe {
                libc::sem_unlink(c_name.as_ptr());
            }
        }
        let c_name = CString::new(OUT_SEM_NAME).unwrap();
        unsafe {
            libc::sem_unlink(c_name.as_ptr());
        }
    }
}

fn bundle_for(worker: u32, input: InputSlot) -> OutputSlot {
    let mut result = DecodeResult::none();
    result.outcome = 1;
    result.len = 2;
    result.data[..2].copy_from_slice(&[0xDE, 0xAD]);
    OutputSlot {
        status: STATUS_OCCUPIED,
        worker,
        input,
        result,
    }
}

#[test]
#[serial]
fn fan_out_mask_drains_once_per_worker() {
    let orch = Orchestrator::create();

    // Workers 0 and 1 pending on slot 3.
    orch.seed_input(3, 0b011, b"\x0f\x05");

    let claimed = claim_pending_input(&orch.arena, &orch.input_sems, 0)
        .unwrap()
        .expect("worker 0 claims slot 3");
    assert_eq!(claimed.payload(), b"\x0f\x05");
    assert_eq!(orch.input_mask(3), 0b010);

    let claimed = claim_pending_input(&orch.arena, &orch.input_sems, 1)
        .unwrap()
        .expect("worker 1 claims slot 3");
    assert_eq!(claimed.payload(), b"\x0f\x05");
    assert_eq!(orch.input_mask(3), 0b000);

    // Exhausted until the orchestrator rewrites the slot.
    assert!(claim_pending_input(&orch.arena, &orch.input_sems, 0)
        .unwrap()
        .is_none());
    assert!(claim_pending_input(&orch.arena, &orch.input_sems, 1)
        .unwrap()
        .is_none());
}

#[test]
#[serial]
fn claims_scan_ascending_one_per_call() {
    let orch = Orchestrator::create();

    orch.seed_input(5, 0b1, b"later");
    orch.seed_input(1, 0b1, b"first");

    let first = claim_pending_input(&orch.arena, &orch.input_sems, 0)
        .unwrap()
        .unwrap();
    assert_eq!(first.payload(), b"first");
    // Slot 5 is untouched by the first call.
    assert_eq!(orch.input_mask(5), 0b1);

    let second = claim_pending_input(&orch.arena, &orch.input_sems, 0)
        .unwrap()
        .unwrap();
    assert_eq!(second.payload(), b"later");

    assert!(claim_pending_input(&orch.arena, &orch.input_sems, 0)
        .unwrap()
        .is_none());
}

#[test]
#[serial]
fn concurrent_claims_never_tear_the_mask() {
    let orch = Orchestrator::create();

    for round in 0..20 {
        let mut payload = [0u8; 8];
        for b in payload.iter_mut() {
            *b = fastrand::u8(..);
        }
        orch.seed_input(0, 0b11, &payload);

        thread::scope(|s| {
            let claims: Vec<_> = [0u32, 1u32]
                .iter()
                .map(|&worker| {
                    let arena = &orch.arena;
                    let sems = &orch.input_sems;
                    s.spawn(move || claim_pending_input(arena, sems, worker).unwrap())
                })
                .collect();

            for handle in claims {
                let claimed = handle.join().unwrap();
                let claimed = claimed.expect("each worker wins its own bit exactly once");
                assert_eq!(claimed.payload(), &payload[..], "round {round}");
            }
        });

        assert_eq!(orch.input_mask(0), 0, "round {round}");
    }
}

#[test]
#[serial]
fn publish_fills_empty_slot_and_flips_status() {
    let orch = Orchestrator::create();
    let shutdown = AtomicBool::new(false);

    orch.seed_input(2, 0b1, b"abc");
    let input = claim_pending_input(&orch.arena, &orch.input_sems, 0)
        .unwrap()
        .unwrap();

    let bundle = bundle_for(0, input);
    let published = publish_output(&orch.arena, &orch.output_sem, &bundle, &shutdown).unwrap();
    assert!(published);
    assert_eq!(orch.output_status(), STATUS_OCCUPIED);

    let drained = orch.drain_output().expect("slot holds the bundle");
    assert_eq!(drained.worker, 0);
    assert_eq!(drained.input.payload(), b"abc");
    assert_eq!(drained.result.outcome, 1);
    assert_eq!(&drained.result.data[..2], &[0xDE, 0xAD]);
    assert_eq!(orch.output_status(), STATUS_EMPTY);
}

#[test]
#[serial]
fn publish_retries_until_drained() {
    let orch = Orchestrator::create();
    let shutdown = AtomicBool::new(false);

    orch.occupy_output();

    thread::scope(|s| {
        s.spawn(|| {
            // Let the publisher observe the occupied slot at least once.
            thread::sleep(Duration::from_millis(350));
            orch.drain_output();
        });

        let input = InputSlot {
            workers: 0,
            len: 1,
            payload: [0x90; INPUT_MAX],
        };
        let published =
            publish_output(&orch.arena, &orch.output_sem, &bundle_for(3, input), &shutdown)
                .unwrap();
        assert!(published);
    });

    let drained = orch.drain_output().expect("retried publish landed");
    assert_eq!(drained.worker, 3);
}

#[test]
#[serial]
fn shutdown_wins_over_contended_publish() {
    let orch = Orchestrator::create();
    let shutdown = AtomicBool::new(true);

    orch.occupy_output();

    let input = InputSlot {
        workers: 0,
        len: 0,
        payload: [0; INPUT_MAX],
    };
    let published =
        publish_output(&orch.arena, &orch.output_sem, &bundle_for(1, input), &shutdown).unwrap();
    assert!(!published, "bundle is discarded once shutdown is observed");

    // The previously occupied slot was never overwritten.
    let drained = orch.drain_output().unwrap();
    assert_ne!(drained.worker, 1);
}

#[test]
#[serial]
fn exhausted_segment_yields_no_claims() {
    let orch = Orchestrator::create();

    for worker in 0..4 {
        assert!(claim_pending_input(&orch.arena, &orch.input_sems, worker)
            .unwrap()
            .is_none());
    }
}
