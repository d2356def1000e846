//! Lazy resolution of the real implementations behind the intercepted
//! entry points.

use std::ffi::c_void;
use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

use libc::c_char;

use crate::state::GuardScope;

const UNRESOLVED: u8 = 0;
const RESOLVED: u8 = 1;
const UNAVAILABLE: u8 = 2;

/// One dynamically resolved symbol. Resolution happens at most twice:
/// a successful lookup is cached forever, and a failed lookup marks the
/// symbol permanently unavailable so the operation degrades
/// deterministically instead of re-probing on every call.
pub struct Sym {
    name: &'static [u8],
    ptr: AtomicPtr<c_void>,
    status: AtomicU8,
}

impl Sym {
    const fn new(name: &'static [u8]) -> Sym {
        Sym {
            name,
            ptr: AtomicPtr::new(std::ptr::null_mut()),
            status: AtomicU8::new(UNRESOLVED),
        }
    }

    /// The next implementation of this symbol after our own library, or
    /// `None` if the dynamic linker cannot find one.
    pub fn get(&self) -> Option<*mut c_void> {
        match self.status.load(Ordering::Acquire) {
            RESOLVED => Some(self.ptr.load(Ordering::Acquire)),
            UNAVAILABLE => None,
            _ => self.resolve(),
        }
    }

    /// Like [`Sym::get`], but never calls into the dynamic linker.
    /// Needed where `dlsym` itself may re-enter the interposer being
    /// resolved.
    pub fn get_if_resolved(&self) -> Option<*mut c_void> {
        (self.status.load(Ordering::Acquire) == RESOLVED)
            .then(|| self.ptr.load(Ordering::Acquire))
    }

    fn resolve(&self) -> Option<*mut c_void> {
        let _guard = GuardScope::enter();
        let ptr = unsafe { libc::dlsym(libc::RTLD_NEXT, self.name.as_ptr() as *const c_char) };
        if ptr.is_null() {
            self.status.store(UNAVAILABLE, Ordering::Release);
            let name = String::from_utf8_lossy(&self.name[..self.name.len() - 1]).into_owned();
            eprintln!("[fault_inject] cannot resolve '{name}', operation degraded");
            return None;
        }
        self.ptr.store(ptr, Ordering::Release);
        self.status.store(RESOLVED, Ordering::Release);
        Some(ptr)
    }
}

pub static MALLOC: Sym = Sym::new(b"malloc\0");
pub static REALLOC: Sym = Sym::new(b"realloc\0");
pub static CALLOC: Sym = Sym::new(b"calloc\0");
pub static FREE: Sym = Sym::new(b"free\0");
pub static FOPEN: Sym = Sym::new(b"fopen\0");
pub static GETLINE: Sym = Sym::new(b"getline\0");
pub static FGETS: Sym = Sym::new(b"fgets\0");
pub static FREAD: Sym = Sym::new(b"fread\0");
pub static FWRITE: Sym = Sym::new(b"fwrite\0");
pub static EXIT: Sym = Sym::new(b"exit\0");
pub static EXIT_: Sym = Sym::new(b"_exit\0");
