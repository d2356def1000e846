//! Call-site attribution: walking the current call stack outward and
//! picking the first return address that belongs to the target image.

use std::ffi::{CStr, c_void};
use std::mem;

/// Outcome of attributing one intercepted call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attribution {
    /// First frame inside the target image.
    Site(u64),
    /// No frame of the walk belongs to the target — the call originated
    /// from a shared library or startup code and must pass through
    /// untouched.
    External,
    /// A memory-checking wrapper's frame was seen before any target
    /// frame; its own calls are exempt from interception.
    UnderWrapper,
}

/// Where a single stack frame's image falls in the attribution filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    Target,
    Wrapper,
    Other,
}

const WRAPPER_MARKERS: [&[u8]; 2] = [b"valgrind", b"vgpreload"];

/// Classifies one frame by the path of the image its instruction
/// pointer maps into. Frames of this library itself, libc, and any other
/// shared object fall under `Other` and are skipped by the walk.
pub fn classify_image(image: &[u8], target: &[u8]) -> FrameKind {
    if image == target {
        FrameKind::Target
    } else if WRAPPER_MARKERS.iter().any(|marker| contains(image, marker)) {
        FrameKind::Wrapper
    } else {
        FrameKind::Other
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}

/// Walks the current call stack and attributes it against `target`.
///
/// The caller must hold the re-entrancy guard. The unsynchronized walk
/// is deliberate: this runs from interposers and from the signal
/// handler, where taking the backtrace lock could deadlock.
pub fn attribute(target: &CStr) -> Attribution {
    let mut result = Attribution::External;
    let walk = |frame: &backtrace::Frame| {
        let ip = frame.ip();
        if ip.is_null() {
            return true;
        }
        let mut info: libc::Dl_info = unsafe { mem::zeroed() };
        if unsafe { libc::dladdr(ip as *const c_void, &mut info) } == 0 || info.dli_fname.is_null()
        {
            return true;
        }
        let image = unsafe { CStr::from_ptr(info.dli_fname) };
        match classify_image(image.to_bytes(), target.to_bytes()) {
            FrameKind::Target => {
                result = Attribution::Site(ip as u64);
                false
            }
            FrameKind::Wrapper => {
                result = Attribution::UnderWrapper;
                false
            }
            FrameKind::Other => true,
        }
    };
    unsafe { backtrace::trace_unsynchronized(walk) };
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_exact_target_path_matches() {
        let target = b"/home/u/victim".as_slice();
        assert_eq!(classify_image(b"/home/u/victim", target), FrameKind::Target);
        assert_eq!(classify_image(b"/home/u/victim2", target), FrameKind::Other);
        assert_eq!(classify_image(b"/lib/libc.so.6", target), FrameKind::Other);
        assert_eq!(
            classify_image(b"./libfault_inject.so", target),
            FrameKind::Other
        );
    }

    #[test]
    fn wrapper_images_are_recognized() {
        let target = b"./victim".as_slice();
        assert_eq!(
            classify_image(b"/usr/bin/valgrind", target),
            FrameKind::Wrapper
        );
        assert_eq!(
            classify_image(b"/usr/libexec/valgrind/vgpreload_memcheck-amd64-linux.so", target),
            FrameKind::Wrapper
        );
    }
}
