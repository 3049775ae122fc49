//! # wowbridge-host
//!
//! Windows/x86 backend for the wowbridge automation bridge: the offsets
//! table, the scripting adapter over the client's embedded FrameScript API,
//! the EndScene frame hook, and the named-pipe RPC server.
//!
//! The crate compiles to nothing on other targets so the workspace (and the
//! portable test suite in `wowbridge-core`) builds everywhere; the payload
//! only links the real contents when built for the 32-bit Windows host.

#![cfg(all(windows, target_arch = "x86"))]

pub mod game;
pub mod hook;
pub mod lua;
pub mod memory;
pub mod offsets;
pub mod pipe;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{error, info, warn};
use wowbridge_core::BridgeQueues;

use crate::game::GameHost;
use crate::hook::FrameHook;
use crate::lua::ScriptingAdapter;
use crate::offsets::OffsetsTable;
use crate::pipe::IpcServer;

/// The process-wide bridge. One per host process, explicit init and
/// shutdown, torn down in reverse construction order.
struct Bridge {
    queues: Arc<BridgeQueues>,
    shutdown: Arc<AtomicBool>,
    hook: Mutex<Option<FrameHook>>,
    ipc: Mutex<Option<IpcServer>>,
}

static BRIDGE: OnceCell<Bridge> = OnceCell::new();

/// Bring the bridge up: offsets, scripting adapter, frame hook, IPC server,
/// in that order. Idempotent; a second call is a no-op.
pub fn init() {
    if BRIDGE.get().is_some() {
        warn!("bridge init called twice");
        return;
    }

    let offsets = OffsetsTable::wow_12340();
    let adapter = ScriptingAdapter::new(&offsets);
    if adapter.state().is_none() {
        // Not fatal: requests that need scripting answer with tagged errors
        // until the client finishes logging in.
        warn!("scripting state is null at init");
    }
    let host = GameHost::new(&offsets, adapter);

    let queues = Arc::new(BridgeQueues::new());
    let shutdown = Arc::new(AtomicBool::new(false));

    let hook = match FrameHook::install(
        &offsets,
        Arc::clone(&queues),
        host,
        Arc::clone(&shutdown),
    ) {
        Ok(hook) => Some(hook),
        Err(e) => {
            // Deliberate degraded mode: queues fill, responses time out,
            // and the controller sees it. Better than crashing the host.
            error!("frame hook install failed, running without a pump: {e}");
            None
        }
    };

    let ipc = IpcServer::start(Arc::clone(&queues), Arc::clone(&shutdown));

    let bridge = Bridge {
        queues,
        shutdown,
        hook: Mutex::new(hook),
        ipc: Mutex::new(Some(ipc)),
    };
    if BRIDGE.set(bridge).is_err() {
        warn!("bridge init raced; keeping the first instance");
        return;
    }
    info!("bridge initialized");
}

/// Tear the bridge down in reverse order: IPC server, frame hook, queues.
/// Safe to call without a prior `init` and safe to call twice.
pub fn shutdown() {
    let Some(bridge) = BRIDGE.get() else {
        return;
    };
    bridge.shutdown.store(true, Ordering::Release);

    if let Some(ipc) = bridge.ipc.lock().take() {
        ipc.stop();
    }
    if let Some(hook) = bridge.hook.lock().take() {
        hook.uninstall();
    }
    bridge.queues.clear();
    info!("bridge shut down");
}
