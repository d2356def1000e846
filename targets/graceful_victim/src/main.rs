//! A victim that checks the result of every allocation and recovers.
//! A full campaign against it produces zero crashes.

use std::ffi::c_void;
use std::mem::size_of;

fn checked_alloc(count: usize) -> Option<*mut i32> {
    let block = unsafe { libc::malloc(count * size_of::<i32>()) } as *mut i32;
    if block.is_null() {
        println!("allocation of {count} ints failed, carrying on");
        return None;
    }
    Some(block)
}

fn main() {
    for round in 1..=8usize {
        let Some(block) = checked_alloc(round * 16) else {
            continue;
        };
        unsafe {
            *block = round as i32;
            let grown =
                libc::realloc(block as *mut c_void, round * 32 * size_of::<i32>()) as *mut i32;
            if grown.is_null() {
                println!("realloc in round {round} failed, releasing the original");
                libc::free(block as *mut c_void);
                continue;
            }
            *grown = -(round as i32);
            libc::free(grown as *mut c_void);
        }
    }
    println!("graceful_victim survived");
}
