//! Process-wide runtime state, scoped to one target-process lifetime:
//! the settings snapshot, the call-site table, the heap-tracking table,
//! the re-entrancy guard, and the last-attributed-site slot.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use faultline_protocol::heap::{self, HeapRecord};
use faultline_protocol::ops::{Op, OpSet};
use faultline_protocol::settings::{Mode, Settings};
use faultline_protocol::table::CallSiteTable;
use once_cell::sync::{Lazy, OnceCell};

use crate::attr::{self, Attribution};
use crate::signal;

/// Nesting counter for the bookkeeping paths. While it is non-zero,
/// every interposer passes straight through to the real implementation,
/// so the bookkeeping's own allocations and I/O cannot be re-intercepted.
/// Atomic only because Rust statics demand it; the counter is process-
/// wide and the single-logical-thread model from the crate docs applies.
static GUARD: AtomicU32 = AtomicU32::new(0);

/// The call site attributed by the most recent intercepted call, failed
/// or not. The crash handler reads it as the hypothesized fault cause.
static LAST_SITE: AtomicU64 = AtomicU64::new(0);

/// Target image path, duplicated out of the runtime so the signal
/// handler can attribute frames without taking the runtime lock.
static TARGET: OnceCell<CString> = OnceCell::new();

static RUNTIME: Lazy<Mutex<Runtime>> = Lazy::new(|| {
    let _guard = GuardScope::enter();
    Mutex::new(Runtime::load())
});

/// RAII hold on the re-entrancy guard.
pub struct GuardScope;

impl GuardScope {
    pub fn enter() -> GuardScope {
        GUARD.fetch_add(1, Ordering::Relaxed);
        GuardScope
    }
}

impl Drop for GuardScope {
    fn drop(&mut self) {
        GUARD.fetch_sub(1, Ordering::Relaxed);
    }
}

pub fn intercept_blocked() -> bool {
    GUARD.load(Ordering::Relaxed) != 0
}

pub fn last_site() -> u64 {
    LAST_SITE.load(Ordering::Relaxed)
}

pub fn target() -> Option<&'static CStr> {
    TARGET.get().map(|path| path.as_c_str())
}

/// What an interposer should do with the current call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Return the operation's canonical failure value without calling
    /// the real implementation.
    Fail,
    /// Call the real implementation on the target's behalf; the call was
    /// attributed and counts for heap tracking.
    Delegate,
    /// Call the real implementation untouched (guard held, operation
    /// disabled, non-attributable, or running under the wrapper).
    Passthrough,
}

/// One call's dispatch outcome plus the context the interposer needs
/// afterwards.
#[derive(Clone, Copy, Debug)]
pub struct Decision {
    pub action: Action,
    /// Attributed call site, 0 when non-attributable.
    pub site: u64,
    pub heap_trace: bool,
}

impl Decision {
    fn passthrough() -> Decision {
        Decision {
            action: Action::Passthrough,
            site: 0,
            heap_trace: false,
        }
    }
}

struct Runtime {
    settings: Settings,
    table: CallSiteTable,
    heap: HashMap<u64, HeapRecord>,
}

impl Runtime {
    /// One-time setup on the first intercepted call: snapshot the
    /// settings record, load the call-site table when injecting, and
    /// install the crash handlers. A missing or garbled settings file
    /// leaves interception disabled for the process lifetime instead of
    /// failing the target.
    fn load() -> Runtime {
        let dir = Path::new(".");
        let settings = match Settings::load(dir) {
            Ok(settings) => settings,
            Err(err) => {
                eprintln!("[fault_inject] no usable settings record ({err}), interception disabled");
                let mut settings = Settings::new("");
                settings.operations = OpSet::EMPTY;
                settings
            }
        };

        let table = if settings.mode == Mode::Inject {
            match CallSiteTable::load(dir) {
                Ok(table) => table,
                Err(err) => {
                    eprintln!("[fault_inject] cannot load call-site table ({err})");
                    CallSiteTable::new()
                }
            }
        } else {
            CallSiteTable::new()
        };

        let _ = TARGET.set(CString::new(settings.target_path.clone()).unwrap_or_default());
        signal::install_handlers();

        Runtime {
            settings,
            table,
            heap: HashMap::new(),
        }
    }
}

fn lock_runtime() -> std::sync::MutexGuard<'static, Runtime> {
    RUNTIME.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Attributes the current call and decides its fate per the settings
/// record. Called from every interposer after the real symbol resolved.
pub fn dispatch(op: Op) -> Decision {
    if intercept_blocked() {
        return Decision::passthrough();
    }
    let _guard = GuardScope::enter();
    let mut runtime = lock_runtime();
    if !runtime.settings.operations.contains(op) {
        return Decision::passthrough();
    }
    let Some(target) = target() else {
        return Decision::passthrough();
    };

    let site = match attr::attribute(target) {
        Attribution::UnderWrapper => return Decision::passthrough(),
        Attribution::External => {
            LAST_SITE.store(0, Ordering::Relaxed);
            return Decision::passthrough();
        }
        Attribution::Site(site) => site,
    };
    LAST_SITE.store(site, Ordering::Relaxed);

    let heap_trace = runtime.settings.trace_heap;
    let action = match runtime.settings.mode {
        Mode::Profile => {
            runtime.table.record(site, op);
            if let Err(err) = runtime.table.save(Path::new(".")) {
                eprintln!("[fault_inject] cannot persist call-site table: {err}");
            }
            Action::Delegate
        }
        Mode::Inject => {
            if !runtime.table.contains(site) {
                eprintln!("[fault_inject] call site {site:#x} was not profiled");
                Action::Delegate
            } else if runtime.table.is_selected(site, runtime.settings.limit) {
                Action::Fail
            } else {
                Action::Delegate
            }
        }
    };

    Decision {
        action,
        site,
        heap_trace,
    }
}

/// Whether heap tracing is enabled for this process. Forces runtime
/// initialization, mirroring the allocation interposers.
pub fn heap_trace_active() -> bool {
    if intercept_blocked() {
        return false;
    }
    let _guard = GuardScope::enter();
    lock_runtime().settings.trace_heap
}

pub fn heap_alloc(block: u64, site: u64, size: u64) {
    if block == 0 {
        return;
    }
    let _guard = GuardScope::enter();
    let mut runtime = lock_runtime();
    runtime.heap.insert(block, HeapRecord { site, size });
    persist_heap(&runtime);
}

pub fn heap_realloc(old_block: u64, new_block: u64, site: u64, size: u64) {
    let _guard = GuardScope::enter();
    let mut runtime = lock_runtime();
    runtime.heap.remove(&old_block);
    if new_block != 0 {
        runtime.heap.insert(new_block, HeapRecord { site, size });
    }
    persist_heap(&runtime);
}

pub fn heap_free(block: u64) {
    if block == 0 {
        return;
    }
    let _guard = GuardScope::enter();
    let mut runtime = lock_runtime();
    if runtime.heap.remove(&block).is_some() {
        persist_heap(&runtime);
    }
}

/// Rewrites the heap file with the current live set; the exit
/// interposers call this so leaks are visible even when the target never
/// frees anything after its last allocation.
pub fn heap_flush() {
    let _guard = GuardScope::enter();
    let runtime = lock_runtime();
    persist_heap(&runtime);
}

fn persist_heap(runtime: &Runtime) {
    let records: Vec<HeapRecord> = runtime.heap.values().copied().collect();
    if let Err(err) = heap::save(&records, Path::new(".")) {
        eprintln!("[fault_inject] cannot persist heap table: {err}");
    }
}
