//! wowbridge payload DLL
//!
//! Loaded into the 32-bit client by an external loader. Attach brings the
//! bridge up (frame hook + named-pipe server); detach tears it down. All
//! diagnostics go to the debugger via `OutputDebugStringA` — the bridge
//! writes no files.

#![cfg(all(windows, target_arch = "x86"))]
#![allow(non_snake_case)]

use std::ffi::c_void;
use std::io;

use tracing::info;
use windows::core::PCSTR;
use windows::Win32::Foundation::HMODULE;
use windows::Win32::System::Diagnostics::Debug::OutputDebugStringA;
use windows::Win32::System::LibraryLoader::DisableThreadLibraryCalls;
use windows::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};

/// `io::Write` sink that forwards each formatted log line to the debugger.
struct DebugSink;

impl io::Write for DebugSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut line = Vec::with_capacity(buf.len() + 1);
        line.extend_from_slice(buf);
        line.push(0);
        unsafe { OutputDebugStringA(PCSTR(line.as_ptr())) };
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn init_logging() {
    // No files, no env vars: fixed level, plain text, debugger sink.
    let _ = tracing_subscriber::fmt()
        .with_ansi(false)
        .without_time()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(|| DebugSink)
        .try_init();
}

fn attach() {
    // Heavy setup must not run under the loader lock; hand it to a thread.
    std::thread::spawn(|| {
        init_logging();
        info!("payload attached, starting bridge");
        wowbridge_host::init();
    });
}

#[no_mangle]
pub extern "system" fn DllMain(
    module: *mut c_void,
    call_reason: u32,
    _reserved: *mut c_void,
) -> bool {
    match call_reason {
        DLL_PROCESS_ATTACH => {
            unsafe {
                let _ = DisableThreadLibraryCalls(HMODULE(module));
            }
            attach();
        }
        DLL_PROCESS_DETACH => {
            wowbridge_host::shutdown();
        }
        _ => {}
    }
    true
}
