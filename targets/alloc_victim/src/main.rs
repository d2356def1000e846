//! A victim that dereferences its allocations without checking them.
//! Whenever an injection run forces one of its three allocation sites to
//! fail, the dereference hits null and the run crashes.

use std::ffi::c_void;
use std::mem::size_of;

fn helper(size: usize) -> *mut i32 {
    let block = unsafe { libc::malloc(size * size_of::<i32>()) } as *mut i32;
    if block.is_null() {
        println!("malloc (helper) failed");
    }
    let zeroed = unsafe { libc::calloc(size, size_of::<i32>()) } as *mut i32;
    unsafe {
        // unchecked: null here is a crash
        *zeroed.add(1) = 3;
        libc::free(zeroed as *mut c_void);
    }
    block
}

fn do_mem(size: usize) -> *mut i32 {
    for round in 0..size {
        let block = helper(size);
        unsafe {
            *block = 3;
            let grown =
                libc::realloc(block as *mut c_void, (1024 + round) * size_of::<i32>()) as *mut i32;
            *grown = 4;
            libc::free(grown as *mut c_void);
        }
    }
    helper(size)
}

fn main() {
    let block = do_mem(10);
    unsafe {
        *block = 1;
        libc::free(block as *mut c_void);
    }
    println!("alloc_victim done");
}
