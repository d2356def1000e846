//! Raising the C++ out-of-memory condition for a failed `operator new`.
//!
//! A C++ target expects a failed `operator new` to throw
//! `std::bad_alloc`, not to return null — that is what a real exhaustion
//! would look like to it. The Itanium-ABI machinery for this lives in
//! libstdc++ and is reached through the dynamic linker; when the target
//! is not a C++ program none of the symbols exist and the caller falls
//! back to a null return.

use std::ffi::{CStr, c_void};
use std::mem;

use once_cell::sync::Lazy;

use crate::state::GuardScope;

type AllocateException = unsafe extern "C" fn(usize) -> *mut c_void;
// "C-unwind": the raised exception unwinds back through our frames into
// the target's catch clause.
type Throw = unsafe extern "C-unwind" fn(*mut c_void, *mut c_void, Option<Destructor>) -> !;
type Destructor = unsafe extern "C" fn(*mut c_void);

struct BadAllocMachinery {
    allocate: AllocateException,
    throw: Throw,
    typeinfo: *mut c_void,
    vtable: *mut c_void,
    destructor: Option<Destructor>,
}

// Raw pointers into libstdc++'s immutable runtime structures.
unsafe impl Send for BadAllocMachinery {}
unsafe impl Sync for BadAllocMachinery {}

static MACHINERY: Lazy<Option<BadAllocMachinery>> = Lazy::new(|| {
    let _guard = GuardScope::enter();
    resolve_machinery()
});

fn resolve_machinery() -> Option<BadAllocMachinery> {
    let allocate = global_sym(c"__cxa_allocate_exception")?;
    let throw = global_sym(c"__cxa_throw")?;
    let typeinfo = global_sym(c"_ZTISt9bad_alloc")?;
    let vtable = global_sym(c"_ZTVSt9bad_alloc")?;
    let destructor = global_sym(c"_ZNSt9bad_allocD1Ev");
    unsafe {
        Some(BadAllocMachinery {
            allocate: mem::transmute::<*mut c_void, AllocateException>(allocate),
            throw: mem::transmute::<*mut c_void, Throw>(throw),
            typeinfo,
            vtable,
            destructor: destructor.map(|ptr| mem::transmute::<*mut c_void, Destructor>(ptr)),
        })
    }
}

fn global_sym(name: &CStr) -> Option<*mut c_void> {
    let ptr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr()) };
    (!ptr.is_null()).then_some(ptr)
}

/// Throws `std::bad_alloc` into the target. Returns only when the C++
/// runtime machinery is unavailable.
pub fn throw_bad_alloc() {
    if let Some(machinery) = MACHINERY.as_ref() {
        unsafe {
            let exception = (machinery.allocate)(mem::size_of::<usize>());
            // A std::bad_alloc object is a lone vptr; the callable slots
            // start after the vtable's offset and typeinfo words.
            (exception as *mut usize).write(machinery.vtable as usize + 2 * mem::size_of::<usize>());
            (machinery.throw)(exception, machinery.typeinfo, machinery.destructor);
        }
    }
}
