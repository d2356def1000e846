//! The interception runtime: a `cdylib` mapped into the target process
//! via the dynamic linker's preload mechanism, ahead of its standard
//! library.
//!
//! The library exports replacements for a fixed set of allocation and
//! file-I/O entry points. Each replacement lazily resolves the real
//! implementation with `dlsym(RTLD_NEXT, ...)`, attributes the call to a
//! call site inside the target image by walking the stack, and then —
//! depending on the persisted [`Settings`](faultline_protocol::settings)
//! record — either records the site (profile mode), forces the call to
//! fail (inject mode, selected site), or delegates to the real
//! implementation. A signal handler converts fatal signals into a
//! persisted crash record plus a deterministic `128 + signal` exit
//! status.
//!
//! Known limitation: the re-entrancy guard and the attribution slot are
//! process-wide, not per-thread. A target with more than one logical
//! thread of control can race on them and corrupt the persisted tables;
//! supporting such targets would need per-thread attribution state or a
//! real lock around the whole dispatch path.

// With the interposers cfg'd out of test builds, their support layer
// below is idle there.
#![cfg_attr(test, allow(dead_code))]

mod attr;
mod signal;
mod state;

// The interposers (and the resolution machinery only they use) are kept
// out of the unit-test harness: a test binary that exported its own
// `malloc` and `exit` would intercept itself.
#[cfg(not(test))]
mod cxa;
#[cfg(not(test))]
mod hooks;
#[cfg(not(test))]
mod real;

pub use attr::Attribution;
pub use state::{Action, Decision};
