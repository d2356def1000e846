//! A victim exercising the intercepted file-I/O entry points. It reads
//! from its own image and writes a scratch file, checking every result,
//! so file-I/O injection runs end cleanly.

use std::env;
use std::ffi::{CString, c_void};

fn main() {
    let own_path = env::args().next().unwrap_or_else(|| "file_victim".to_owned());
    let own_path = CString::new(own_path).expect("argv[0] contains a NUL byte");

    unsafe {
        let input = libc::fopen(own_path.as_ptr(), c"rb".as_ptr());
        if input.is_null() {
            println!("could not open own image");
            return;
        }

        let mut buffer = [0u8; 64];
        let got = libc::fread(buffer.as_mut_ptr() as *mut c_void, 1, buffer.len(), input);
        if got == 0 {
            println!("read nothing from own image");
        } else {
            println!("read {got} byte(s)");
        }
        libc::fclose(input);

        let scratch = libc::fopen(c"file_victim.scratch".as_ptr(), c"wb".as_ptr());
        if scratch.is_null() {
            println!("could not open the scratch file");
            return;
        }
        let wrote = libc::fwrite(buffer.as_ptr() as *const c_void, 1, got, scratch);
        if wrote != got {
            println!("short write to the scratch file");
        }
        libc::fclose(scratch);
        libc::remove(c"file_victim.scratch".as_ptr());
    }
    println!("file_victim done");
}
