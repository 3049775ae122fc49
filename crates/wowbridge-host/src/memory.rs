//! Guarded reads of host-process memory.
//!
//! Anchors can go stale (loading screens, logout) — every read checks the
//! page is committed and readable first so a bad anchor degrades to a
//! [`MemoryError`] instead of faulting the render thread.

use std::ffi::c_void;
use std::mem;

use windows::Win32::System::Memory::{
    VirtualQuery, MEMORY_BASIC_INFORMATION, MEM_COMMIT, PAGE_EXECUTE_READ,
    PAGE_EXECUTE_READWRITE, PAGE_EXECUTE_WRITECOPY, PAGE_GUARD, PAGE_NOACCESS, PAGE_READONLY,
    PAGE_READWRITE, PAGE_WRITECOPY,
};
use wowbridge_core::MemoryError;

/// Point-in-time read of a `Copy` value at an absolute address.
pub fn read<T: Copy>(addr: usize) -> Result<T, MemoryError> {
    if addr == 0 || !is_readable(addr, mem::size_of::<T>()) {
        return Err(MemoryError(addr));
    }
    // The page check above is the only guard the host gives us; the value
    // itself is whatever the game currently holds there.
    Ok(unsafe { (addr as *const T).read_unaligned() })
}

/// Whether `[addr, addr + len)` lies in committed, readable pages. Also the
/// pre-call probe for pointers about to be handed to native code.
pub(crate) fn is_readable(addr: usize, len: usize) -> bool {
    let mut info = MEMORY_BASIC_INFORMATION::default();
    let queried = unsafe {
        VirtualQuery(
            Some(addr as *const c_void),
            &mut info,
            mem::size_of::<MEMORY_BASIC_INFORMATION>(),
        )
    };
    if queried == 0 || info.State != MEM_COMMIT {
        return false;
    }
    let protect = info.Protect.0;
    if protect & (PAGE_NOACCESS.0 | PAGE_GUARD.0) != 0 {
        return false;
    }
    let readable = PAGE_READONLY.0
        | PAGE_READWRITE.0
        | PAGE_WRITECOPY.0
        | PAGE_EXECUTE_READ.0
        | PAGE_EXECUTE_READWRITE.0
        | PAGE_EXECUTE_WRITECOPY.0;
    if protect & readable == 0 {
        return false;
    }
    // The probed span must not run off the end of the region.
    let region_base = info.BaseAddress as usize;
    addr + len <= region_base + info.RegionSize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_live_data() {
        static VALUE: u64 = 0x1122_3344_5566_7788;
        let addr = &VALUE as *const u64 as usize;
        assert_eq!(read::<u64>(addr), Ok(0x1122_3344_5566_7788));
    }

    #[test]
    fn rejects_null_and_unmapped() {
        assert!(read::<u8>(0).is_err());
        // Page zero neighborhood is never mapped in a Win32 process.
        assert!(read::<u32>(0x10).is_err());
    }
}
