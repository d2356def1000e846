//! The exported interposers. Each replaces one standard entry point in
//! the target process and has the uniform shape: resolve the real
//! implementation, dispatch against the settings record, then fail,
//! delegate, or pass through.

use std::ffi::{c_char, c_int, c_void};
use std::mem;
use std::ptr;

use faultline_protocol::ops::Op;
use libc::{FILE, size_t, ssize_t};

use crate::cxa;
use crate::real::{self, Sym};
use crate::signal;
use crate::state::{self, Action, GuardScope};

type MallocFn = unsafe extern "C" fn(size_t) -> *mut c_void;
type ReallocFn = unsafe extern "C" fn(*mut c_void, size_t) -> *mut c_void;
type CallocFn = unsafe extern "C" fn(size_t, size_t) -> *mut c_void;
type FreeFn = unsafe extern "C" fn(*mut c_void);
type FopenFn = unsafe extern "C" fn(*const c_char, *const c_char) -> *mut FILE;
type GetlineFn = unsafe extern "C" fn(*mut *mut c_char, *mut size_t, *mut FILE) -> ssize_t;
type FgetsFn = unsafe extern "C" fn(*mut c_char, c_int, *mut FILE) -> *mut c_char;
type FreadFn = unsafe extern "C" fn(*mut c_void, size_t, size_t, *mut FILE) -> size_t;
type FwriteFn = unsafe extern "C" fn(*const c_void, size_t, size_t, *mut FILE) -> size_t;
type ExitFn = unsafe extern "C" fn(c_int);

unsafe fn fetch<F: Copy>(sym: &Sym) -> Option<F> {
    sym.get()
        .map(|ptr| unsafe { mem::transmute_copy::<*mut c_void, F>(&ptr) })
}

unsafe fn fetch_resolved<F: Copy>(sym: &Sym) -> Option<F> {
    sym.get_if_resolved()
        .map(|ptr| unsafe { mem::transmute_copy::<*mut c_void, F>(&ptr) })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc(size: size_t) -> *mut c_void {
    let Some(real) = (unsafe { fetch::<MallocFn>(&real::MALLOC) }) else {
        return ptr::null_mut();
    };
    let decision = state::dispatch(Op::Malloc);
    match decision.action {
        Action::Fail => ptr::null_mut(),
        Action::Passthrough => unsafe { real(size) },
        Action::Delegate => {
            let _guard = GuardScope::enter();
            let block = unsafe { real(size) };
            if decision.heap_trace && decision.site != 0 {
                state::heap_alloc(block as u64, decision.site, size as u64);
            }
            block
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn realloc(old_block: *mut c_void, size: size_t) -> *mut c_void {
    let Some(real) = (unsafe { fetch::<ReallocFn>(&real::REALLOC) }) else {
        return ptr::null_mut();
    };
    let decision = state::dispatch(Op::Realloc);
    match decision.action {
        Action::Fail => ptr::null_mut(),
        Action::Passthrough => unsafe { real(old_block, size) },
        Action::Delegate => {
            let _guard = GuardScope::enter();
            let block = unsafe { real(old_block, size) };
            if decision.heap_trace && decision.site != 0 {
                state::heap_realloc(old_block as u64, block as u64, decision.site, size as u64);
            }
            block
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn calloc(count: size_t, size: size_t) -> *mut c_void {
    // dlsym allocates through calloc while we are inside resolve(); the
    // guard is held there, and glibc copes with a null from this one
    // bootstrap allocation.
    let real = match unsafe { fetch_resolved::<CallocFn>(&real::CALLOC) } {
        Some(real) => real,
        None if state::intercept_blocked() => return ptr::null_mut(),
        None => match unsafe { fetch::<CallocFn>(&real::CALLOC) } {
            Some(real) => real,
            None => return ptr::null_mut(),
        },
    };
    let decision = state::dispatch(Op::Calloc);
    match decision.action {
        Action::Fail => ptr::null_mut(),
        Action::Passthrough => unsafe { real(count, size) },
        Action::Delegate => {
            let _guard = GuardScope::enter();
            let block = unsafe { real(count, size) };
            if decision.heap_trace && decision.site != 0 {
                state::heap_alloc(block as u64, decision.site, (count * size) as u64);
            }
            block
        }
    }
}

/// Itanium-ABI `operator new(unsigned long)`. Forced failure raises the
/// C++ out-of-memory condition; allocation itself is the real `malloc`,
/// as in libstdc++.
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub unsafe extern "C-unwind" fn _Znwm(size: size_t) -> *mut c_void {
    let Some(real) = (unsafe { fetch::<MallocFn>(&real::MALLOC) }) else {
        return ptr::null_mut();
    };
    let decision = state::dispatch(Op::New);
    match decision.action {
        Action::Fail => {
            cxa::throw_bad_alloc();
            ptr::null_mut()
        }
        Action::Passthrough => unsafe { real(size) },
        Action::Delegate => {
            let _guard = GuardScope::enter();
            let block = unsafe { real(size) };
            if decision.heap_trace && decision.site != 0 {
                state::heap_alloc(block as u64, decision.site, size as u64);
            }
            block
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn free(block: *mut c_void) {
    unsafe { release(block) }
}

/// Itanium-ABI `operator delete(void*)`.
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub unsafe extern "C" fn _ZdlPv(block: *mut c_void) {
    unsafe { release(block) }
}

unsafe fn release(block: *mut c_void) {
    let Some(real) = (unsafe { fetch::<FreeFn>(&real::FREE) }) else {
        return;
    };
    if !state::intercept_blocked() && state::heap_trace_active() {
        state::heap_free(block as u64);
    }
    let _guard = GuardScope::enter();
    unsafe { real(block) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fopen(path: *const c_char, mode: *const c_char) -> *mut FILE {
    let Some(real) = (unsafe { fetch::<FopenFn>(&real::FOPEN) }) else {
        return ptr::null_mut();
    };
    match state::dispatch(Op::Fopen).action {
        Action::Fail => ptr::null_mut(),
        Action::Passthrough => unsafe { real(path, mode) },
        Action::Delegate => {
            let _guard = GuardScope::enter();
            unsafe { real(path, mode) }
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn getline(
    line: *mut *mut c_char,
    capacity: *mut size_t,
    stream: *mut FILE,
) -> ssize_t {
    let Some(real) = (unsafe { fetch::<GetlineFn>(&real::GETLINE) }) else {
        return -1;
    };
    match state::dispatch(Op::Getline).action {
        Action::Fail => -1,
        Action::Passthrough => unsafe { real(line, capacity, stream) },
        Action::Delegate => {
            let _guard = GuardScope::enter();
            unsafe { real(line, capacity, stream) }
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fgets(buffer: *mut c_char, size: c_int, stream: *mut FILE) -> *mut c_char {
    let Some(real) = (unsafe { fetch::<FgetsFn>(&real::FGETS) }) else {
        return ptr::null_mut();
    };
    match state::dispatch(Op::Fgets).action {
        Action::Fail => ptr::null_mut(),
        Action::Passthrough => unsafe { real(buffer, size, stream) },
        Action::Delegate => {
            let _guard = GuardScope::enter();
            unsafe { real(buffer, size, stream) }
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fread(
    buffer: *mut c_void,
    size: size_t,
    count: size_t,
    stream: *mut FILE,
) -> size_t {
    let Some(real) = (unsafe { fetch::<FreadFn>(&real::FREAD) }) else {
        return 0;
    };
    match state::dispatch(Op::Fread).action {
        Action::Fail => 0,
        Action::Passthrough => unsafe { real(buffer, size, count, stream) },
        Action::Delegate => {
            let _guard = GuardScope::enter();
            unsafe { real(buffer, size, count, stream) }
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fwrite(
    buffer: *const c_void,
    size: size_t,
    count: size_t,
    stream: *mut FILE,
) -> size_t {
    let Some(real) = (unsafe { fetch::<FwriteFn>(&real::FWRITE) }) else {
        return 0;
    };
    match state::dispatch(Op::Fwrite).action {
        Action::Fail => 0,
        Action::Passthrough => unsafe { real(buffer, size, count, stream) },
        Action::Delegate => {
            let _guard = GuardScope::enter();
            unsafe { real(buffer, size, count, stream) }
        }
    }
}

/// Intercepted so the heap table reaches disk before the process image
/// disappears; heap tracing has no other end-of-life hook.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn exit(status: c_int) -> ! {
    if !state::intercept_blocked() && state::heap_trace_active() {
        state::heap_flush();
    }
    if let Some(real) = (unsafe { fetch::<ExitFn>(&real::EXIT) }) {
        unsafe { real(status) };
    }
    signal::terminate(status)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn _exit(status: c_int) -> ! {
    if !state::intercept_blocked() && state::heap_trace_active() {
        state::heap_flush();
    }
    if let Some(real) = (unsafe { fetch::<ExitFn>(&real::EXIT_) }) {
        unsafe { real(status) };
    }
    signal::terminate(status)
}
