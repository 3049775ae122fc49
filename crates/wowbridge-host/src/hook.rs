//! Per-frame execution vehicle: the EndScene hook.
//!
//! The device's method table is reached by walking two pointer indirections
//! from a static anchor; the present slot is then patched in place with
//! `VirtualProtect`. Patching a data slot (rather than detouring code) makes
//! install and uninstall a single aligned pointer write each way.
//!
//! The replacement function runs on the host's render thread. It drains the
//! request queue, dispatches each request, queues the responses, then chains
//! to the original function. Nothing may unwind past it into the host.

use std::ffi::c_void;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, error, trace, warn};
use windows::Win32::System::Memory::{VirtualProtect, PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS};
use wowbridge_core::{dispatch, BridgeQueues};

use crate::game::GameHost;
use crate::memory;
use crate::offsets::OffsetsTable;

/// EndScene: `HRESULT (__stdcall*)(IDirect3DDevice9*)`.
type PresentFn = unsafe extern "system" fn(device: *mut c_void) -> i32;

/// Everything the replacement present function needs. Set once at install;
/// the render thread only ever reads it.
struct HookShared {
    queues: Arc<BridgeQueues>,
    host: GameHost,
    shutdown: Arc<AtomicBool>,
}

static SHARED: OnceCell<HookShared> = OnceCell::new();
static ORIGINAL_PRESENT: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("device anchor is null")]
    NullAnchor,
    #[error("device pointer is null")]
    NullDevice,
    #[error("device vtable is null")]
    NullVtable,
    #[error("present slot is null")]
    NullSlot,
    #[error("unreadable pointer at {0:#x} during vtable walk")]
    Unreadable(usize),
    #[error("vtable protection change failed: {0}")]
    Protect(#[from] windows::core::Error),
    #[error("hook already installed")]
    AlreadyInstalled,
}

/// An installed frame hook. Dropping it does NOT unhook; call
/// [`FrameHook::uninstall`] during teardown, before the queues go away.
pub struct FrameHook {
    slot_addr: usize,
    original: usize,
}

impl FrameHook {
    /// Walk the device chain and patch the present slot.
    ///
    /// On failure the host is left untouched; the bridge then runs without a
    /// render-thread pump, which the IPC side surfaces as response timeouts.
    pub fn install(
        offsets: &OffsetsTable,
        queues: Arc<BridgeQueues>,
        host: GameHost,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, HookError> {
        let anchor: usize =
            memory::read(offsets.d3d_device_anchor).map_err(|e| HookError::Unreadable(e.0))?;
        if anchor == 0 {
            return Err(HookError::NullAnchor);
        }
        let device: usize = memory::read(anchor + offsets.d3d_device_offset)
            .map_err(|e| HookError::Unreadable(e.0))?;
        if device == 0 {
            return Err(HookError::NullDevice);
        }
        let vtable: usize = memory::read(device).map_err(|e| HookError::Unreadable(e.0))?;
        if vtable == 0 {
            return Err(HookError::NullVtable);
        }
        let slot_addr = vtable + offsets.endscene_vtable_offset;
        let original: usize = memory::read(slot_addr).map_err(|e| HookError::Unreadable(e.0))?;
        if original == 0 {
            return Err(HookError::NullSlot);
        }

        SHARED
            .set(HookShared { queues, host, shutdown })
            .map_err(|_| HookError::AlreadyInstalled)?;
        ORIGINAL_PRESENT.store(original, Ordering::Release);

        unsafe { patch_slot(slot_addr, hooked_present as usize)? };
        debug!(
            slot_addr = %format_args!("{slot_addr:#x}"),
            original = %format_args!("{original:#x}"),
            "present hook installed"
        );
        Ok(Self { slot_addr, original })
    }

    /// Write the original pointer back. A single aligned store, so the
    /// render thread sees either function, never a torn value.
    pub fn uninstall(self) {
        match unsafe { patch_slot(self.slot_addr, self.original) } {
            Ok(()) => debug!("present hook removed"),
            Err(e) => error!("failed to restore present slot: {e}"),
        }
    }
}

/// Swap one pointer-sized vtable entry, preserving page protection.
unsafe fn patch_slot(slot_addr: usize, value: usize) -> windows::core::Result<()> {
    let mut old = PAGE_PROTECTION_FLAGS::default();
    VirtualProtect(
        slot_addr as *const c_void,
        mem::size_of::<usize>(),
        PAGE_EXECUTE_READWRITE,
        &mut old,
    )?;
    (slot_addr as *mut usize).write_volatile(value);
    let mut scratch = PAGE_PROTECTION_FLAGS::default();
    if let Err(e) = VirtualProtect(slot_addr as *const c_void, mem::size_of::<usize>(), old, &mut scratch) {
        // The write already landed; a protection restore failure is not
        // worth failing the install over.
        warn!("could not restore vtable protection: {e}");
    }
    Ok(())
}

/// The replacement present function.
unsafe extern "system" fn hooked_present(device: *mut c_void) -> i32 {
    if let Some(shared) = SHARED.get() {
        if !shared.shutdown.load(Ordering::Acquire) {
            // dispatch() has its own per-request panic boundary; this outer
            // one covers the queue plumbing itself.
            if panic::catch_unwind(AssertUnwindSafe(|| pump(shared))).is_err() {
                error!("frame pump panicked");
            }
        }
    }
    let original = ORIGINAL_PRESENT.load(Ordering::Acquire);
    let original: PresentFn = mem::transmute(original);
    original(device)
}

/// One frame tick: drain everything queued, answer in order.
fn pump(shared: &HookShared) {
    let requests = shared.queues.drain_requests();
    if requests.is_empty() {
        return;
    }
    trace!(count = requests.len(), "frame pump");
    shared
        .queues
        .extend_responses(requests.iter().map(|req| dispatch(&shared.host, req)));
}
