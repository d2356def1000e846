//! A victim that frees all but one of its blocks. With heap tracing
//! enabled, the campaign reports exactly one leaked block of 4096 bytes.

fn main() {
    unsafe {
        let kept = libc::malloc(4096);
        let released = libc::malloc(128);
        if kept.is_null() || released.is_null() {
            println!("allocation failed, nothing to leak");
            libc::free(kept);
            libc::free(released);
            return;
        }
        (kept as *mut u8).write(1);
        libc::free(released);
    }
    println!("leaky_victim exiting with one live block");
}
