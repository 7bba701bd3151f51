// Fault Probes
//
// Purpose: observe protection faults without taking down the caller.
// Each probe body runs in a forked child; the parent classifies the wait
// status. A write into frozen memory must end the child with SIGSEGV or SIGBUS.

use crate::config::types::{FreezeError, Result};
use crate::{freeze_deep, freeze_sequence, Map, Ptr, Seq};
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use serde::Serialize;
use std::hint::black_box;
use std::panic::{self, AssertUnwindSafe};

/// Exit code a child uses to report a panic in the probe body
const PANIC_EXIT_CODE: i32 = 101;

/// How a probe child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// Killed by a signal
    Faulted { signal: i32 },
    /// Exited normally
    Completed { code: i32 },
    /// The probe body panicked
    Panicked,
}

impl ProbeOutcome {
    /// True when the child died of a memory protection fault.
    pub fn is_fault(&self) -> bool {
        match self {
            ProbeOutcome::Faulted { signal } => {
                *signal == Signal::SIGSEGV as i32 || *signal == Signal::SIGBUS as i32
            }
            _ => false,
        }
    }

    pub fn is_clean_exit(&self) -> bool {
        matches!(self, ProbeOutcome::Completed { code: 0 })
    }
}

fn to_probe_error(prefix: &str, err: impl std::fmt::Display) -> FreezeError {
    FreezeError::Probe(format!("{prefix}: {err}"))
}

/// Run `body` in a forked child and report how the child ended.
pub fn run_in_child<F: FnOnce()>(body: F) -> Result<ProbeOutcome> {
    // SAFETY: the child only runs `body` and then `_exit`s; it never returns
    // into the caller's stack.
    match unsafe { fork() }.map_err(|e| to_probe_error("fork(probe)", e))? {
        ForkResult::Child => {
            reset_fault_handlers();
            disable_core_dumps();
            let code = match panic::catch_unwind(AssertUnwindSafe(body)) {
                Ok(()) => 0,
                Err(_) => PANIC_EXIT_CODE,
            };
            // SAFETY: `_exit` skips atexit handlers and destructors inherited
            // from the parent.
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => wait_for(child),
    }
}

fn wait_for(child: Pid) -> Result<ProbeOutcome> {
    loop {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, PANIC_EXIT_CODE)) => return Ok(ProbeOutcome::Panicked),
            Ok(WaitStatus::Exited(_, code)) => return Ok(ProbeOutcome::Completed { code }),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                return Ok(ProbeOutcome::Faulted {
                    signal: signal as i32,
                })
            }
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(to_probe_error("waitpid(probe)", e)),
        }
    }
}

/// Restore default dispositions so a fault terminates the child directly.
fn reset_fault_handlers() {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for sig in [Signal::SIGSEGV, Signal::SIGBUS] {
        // SAFETY: installing SIG_DFL has no handler to race with.
        if let Err(e) = unsafe { signal::sigaction(sig, &default) } {
            log::warn!("Failed to reset {} in probe child: {}", sig, e);
        }
    }
}

/// Expected faults should not leave core files behind.
fn disable_core_dumps() {
    let limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: plain syscall on a stack value.
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &limit) };
    if rc != 0 {
        log::warn!(
            "Failed to disable core dumps in probe child: {}",
            std::io::Error::last_os_error()
        );
    }
}

/// A named property checked in a child process
#[derive(Debug, Clone, Copy)]
pub struct Probe {
    pub name: &'static str,
    pub expect_fault: bool,
    pub body: fn(),
}

/// Result of one probe
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub name: &'static str,
    pub expect_fault: bool,
    pub outcome: ProbeOutcome,
    pub passed: bool,
}

impl Probe {
    pub fn run(&self) -> Result<ProbeReport> {
        let outcome = run_in_child(self.body)?;
        let passed = if self.expect_fault {
            outcome.is_fault()
        } else {
            outcome.is_clean_exit()
        };
        Ok(ProbeReport {
            name: self.name,
            expect_fault: self.expect_fault,
            outcome,
            passed,
        })
    }
}

struct Holder {
    shared: Ptr<i64>,
    internal: Ptr<i64>,
}

crate::reflect_record!(Holder {
    exported shared,
    private internal,
});

fn frozen_holder() -> Ptr<Holder> {
    let holder = Ptr::new(Holder {
        shared: Ptr::new(1),
        internal: Ptr::new(2),
    });
    freeze_deep(holder).unwrap_or_else(|e| panic!("{}", e))
}

fn frozen_map() -> Map<u32, u32> {
    let map: Map<u32, u32> = (0..8).map(|i| (i, i * 10)).collect();
    map.freeze()
}

fn probe_scalar_read() {
    let p = Ptr::new(41u64).freeze();
    assert_eq!(**black_box(&p), 41);
}

fn probe_scalar_write() {
    let mut p = Ptr::new(41u64).freeze();
    *p = 42;
    black_box(&p);
}

fn probe_sequence_append_spare_capacity() {
    let mut xs: Seq<u32> = Seq::with_capacity(8);
    xs.push(1);
    let mut xs = xs.freeze();
    xs.push(2);
    black_box(&xs);
}

fn probe_sequence_append_full_capacity() {
    let mut xs: Seq<u32> = vec![1, 2, 3].into();
    xs.shrink_to_fit();
    let mut xs = xs.freeze();
    xs.push(4);
    assert_eq!(black_box(&xs).len(), 4);
}

fn probe_map_read() {
    let map = frozen_map();
    assert_eq!(map.get(&3), Some(&30));
    assert_eq!(map.len(), 8);
    assert_eq!(map.iter().count(), 8);
}

fn probe_map_insert() {
    let mut map = frozen_map();
    map.insert(100, 1);
    black_box(&map);
}

fn probe_map_overwrite_same_value() {
    let mut map = frozen_map();
    map.insert(3, 30);
    black_box(&map);
}

fn probe_map_remove() {
    let mut map = frozen_map();
    map.remove(&3);
    black_box(&map);
}

fn probe_record_exported_pointee() {
    let mut holder = frozen_holder();
    // The record lives in frozen pages; reach the pointee through a raw pointer.
    let target = holder.shared.as_ptr() as *mut i64;
    // SAFETY: valid, aligned, and mapped; only its protection is in question.
    unsafe { target.write_volatile(5) };
    black_box(&mut holder);
}

fn probe_record_private_pointee() {
    let holder = frozen_holder();
    let target = holder.internal.as_ptr() as *mut i64;
    // SAFETY: the private pointee was never moved out of its heap allocation.
    unsafe { target.write_volatile(5) };
    assert_eq!(*black_box(&holder).internal, 5);
}

fn probe_deep_freeze_twice() {
    let array = Ptr::new([Ptr::new(true), Ptr::new(false), Ptr::new(true)]);
    let array = freeze_deep(array).unwrap_or_else(|e| panic!("{}", e));
    let again = freeze_deep(array);
    black_box(&again);
}

fn probe_deep_freeze_scalar_twice() {
    let p = freeze_deep(Ptr::new(5u64)).unwrap_or_else(|e| panic!("{}", e));
    let again = freeze_deep(p);
    black_box(&again);
}

fn probe_deep_freeze_map_twice() {
    let map: Map<u8, u8> = Map::from_iter([(1, 1)]);
    let map = freeze_deep(map).unwrap_or_else(|e| panic!("{}", e));
    let again = freeze_deep(map);
    black_box(&again);
}

fn probe_shallow_sequence_elements() {
    let xs: Seq<Ptr<bool>> = vec![Ptr::new(false), Ptr::new(false)].into();
    let xs = freeze_sequence(xs).unwrap_or_else(|e| panic!("{}", e));
    let target = xs[1].as_ptr() as *mut bool;
    // SAFETY: a shallow freeze leaves element pointees in their heap allocations.
    unsafe { target.write_volatile(true) };
    assert!(*black_box(&xs)[1]);
}

/// Properties every host with page protection should satisfy
pub fn standard_probes() -> Vec<Probe> {
    vec![
        Probe { name: "scalar_read", expect_fault: false, body: probe_scalar_read },
        Probe { name: "scalar_write", expect_fault: true, body: probe_scalar_write },
        Probe {
            name: "sequence_append_spare_capacity",
            expect_fault: true,
            body: probe_sequence_append_spare_capacity,
        },
        Probe {
            name: "sequence_append_full_capacity",
            expect_fault: false,
            body: probe_sequence_append_full_capacity,
        },
        Probe { name: "map_read", expect_fault: false, body: probe_map_read },
        Probe { name: "map_insert", expect_fault: true, body: probe_map_insert },
        Probe {
            name: "map_overwrite_same_value",
            expect_fault: true,
            body: probe_map_overwrite_same_value,
        },
        Probe { name: "map_remove", expect_fault: true, body: probe_map_remove },
        Probe {
            name: "record_exported_pointee",
            expect_fault: true,
            body: probe_record_exported_pointee,
        },
        Probe {
            name: "record_private_pointee",
            expect_fault: false,
            body: probe_record_private_pointee,
        },
        Probe { name: "deep_freeze_twice", expect_fault: true, body: probe_deep_freeze_twice },
        Probe {
            name: "deep_freeze_scalar_twice",
            expect_fault: true,
            body: probe_deep_freeze_scalar_twice,
        },
        Probe {
            name: "deep_freeze_map_twice",
            expect_fault: true,
            body: probe_deep_freeze_map_twice,
        },
        Probe {
            name: "shallow_sequence_elements",
            expect_fault: false,
            body: probe_shallow_sequence_elements,
        },
    ]
}

/// Run every standard probe in its own child.
pub fn run_probes() -> Result<Vec<ProbeReport>> {
    standard_probes().iter().map(Probe::run).collect()
}
