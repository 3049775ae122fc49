//! Named-pipe RPC server.
//!
//! One thread, one pipe instance, message-framed duplex, blocking I/O. The
//! server reads a command, queues it for the render thread, then blocks on
//! the response queue (bounded poll) before reading the next command — which
//! is what makes responses line up with requests on a connection without any
//! correlation ids on the wire.

use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};
use windows::core::w;
use windows::Win32::Foundation::{
    CloseHandle, GENERIC_WRITE, ERROR_BROKEN_PIPE, ERROR_FILE_NOT_FOUND, ERROR_PIPE_BUSY,
    ERROR_PIPE_CONNECTED, HANDLE, INVALID_HANDLE_VALUE,
};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FlushFileBuffers, ReadFile, WriteFile, FILE_FLAGS_AND_ATTRIBUTES,
    FILE_SHARE_MODE, OPEN_EXISTING, PIPE_ACCESS_DUPLEX,
};
use windows::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, DisconnectNamedPipe, PIPE_READMODE_MESSAGE,
    PIPE_TYPE_MESSAGE, PIPE_WAIT,
};
use wowbridge_core::{parse_command, BridgeQueues, Request};

const PIPE_NAME_W: windows::core::PCWSTR = w!(r"\\.\pipe\WowInjectPipe");
const PIPE_BUFFER_SIZE: u32 = 4096;

/// Soft response timeout: the render thread normally answers within one or
/// two frames; past this the client is told nothing and must retry.
const RESPONSE_POLL_INTERVAL: Duration = Duration::from_millis(10);
const RESPONSE_POLL_ATTEMPTS: u32 = 10;

/// The running IPC server. `stop()` unblocks the thread and joins it.
pub struct IpcServer {
    thread: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    /// Raw pipe handle shared with the thread so `stop()` can abort a
    /// blocked accept/read. 0 = not created, -1 = taken.
    pipe_cell: Arc<AtomicIsize>,
}

impl IpcServer {
    pub fn start(queues: Arc<BridgeQueues>, shutdown: Arc<AtomicBool>) -> Self {
        let pipe_cell = Arc::new(AtomicIsize::new(0));
        let thread_cell = Arc::clone(&pipe_cell);
        let thread_shutdown = Arc::clone(&shutdown);
        let thread = thread::Builder::new()
            .name("wowbridge-ipc".into())
            .spawn(move || serve(queues, thread_shutdown, thread_cell))
            .expect("spawning the IPC thread cannot fail this early");
        Self { thread: Some(thread), shutdown, pipe_cell }
    }

    /// Signal shutdown, unblock the server thread, and join it.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::Release);

        // A blocked accept only returns once something connects; oblige it.
        nudge_accept();

        // A blocked read is torn down with the instance handle itself.
        let raw = self.pipe_cell.swap(-1, Ordering::AcqRel);
        if raw > 0 {
            let handle = HANDLE(raw as *mut _);
            unsafe {
                let _ = DisconnectNamedPipe(handle);
                let _ = CloseHandle(handle);
            }
        }

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("IPC thread terminated by panic");
            }
        }
        info!("IPC server stopped");
    }
}

/// Dummy client connect; releases a `ConnectNamedPipe` wait during shutdown.
fn nudge_accept() {
    let connected = unsafe {
        CreateFileW(
            PIPE_NAME_W,
            GENERIC_WRITE.0,
            FILE_SHARE_MODE(0),
            None,
            OPEN_EXISTING,
            FILE_FLAGS_AND_ATTRIBUTES(0),
            None,
        )
    };
    match connected {
        Ok(handle) => unsafe {
            let _ = CloseHandle(handle);
        },
        Err(e) => {
            // Busy / already-gone are the normal cases when no accept is
            // pending; anything else is worth a line.
            let benign = [ERROR_PIPE_BUSY.to_hresult(), ERROR_FILE_NOT_FOUND.to_hresult()];
            if !benign.contains(&e.code()) {
                warn!("shutdown nudge connect failed: {e}");
            }
        }
    }
}

fn serve(queues: Arc<BridgeQueues>, shutdown: Arc<AtomicBool>, pipe_cell: Arc<AtomicIsize>) {
    let pipe = unsafe {
        CreateNamedPipeW(
            PIPE_NAME_W,
            PIPE_ACCESS_DUPLEX,
            PIPE_TYPE_MESSAGE | PIPE_READMODE_MESSAGE | PIPE_WAIT,
            1,
            PIPE_BUFFER_SIZE,
            PIPE_BUFFER_SIZE,
            0,
            None,
        )
    };
    if pipe == INVALID_HANDLE_VALUE {
        error!("failed to create named pipe: {}", windows::core::Error::from_win32());
        return;
    }
    // Hand the raw handle to stop(); if stop() already ran, close and bail.
    if pipe_cell
        .compare_exchange(0, pipe.0 as isize, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        unsafe {
            let _ = CloseHandle(pipe);
        }
        return;
    }
    info!("pipe created, waiting for controller");

    while !shutdown.load(Ordering::Acquire) {
        let connected = unsafe { ConnectNamedPipe(pipe, None) };
        if let Err(e) = connected {
            if e.code() == ERROR_PIPE_CONNECTED.to_hresult() {
                // Client raced in between create and connect; that's a
                // connection.
            } else if shutdown.load(Ordering::Acquire) {
                break;
            } else {
                warn!("accept failed: {e}");
                thread::sleep(Duration::from_millis(100));
                continue;
            }
        }
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        debug!("controller connected");

        session(pipe, &queues, &shutdown);

        debug!("controller disconnected");
        unsafe {
            let _ = DisconnectNamedPipe(pipe);
        }
    }

    // stop() may have taken the handle already; only close what we still own.
    let raw = pipe_cell.swap(-1, Ordering::AcqRel);
    if raw > 0 {
        unsafe {
            let _ = DisconnectNamedPipe(pipe);
            let _ = CloseHandle(pipe);
        }
    }
    info!("IPC thread exiting");
}

/// One connected controller: read command, enqueue, await response, write.
fn session(pipe: HANDLE, queues: &BridgeQueues, shutdown: &AtomicBool) {
    let mut buffer = [0u8; PIPE_BUFFER_SIZE as usize];
    while !shutdown.load(Ordering::Acquire) {
        let mut bytes_read = 0u32;
        let read = unsafe { ReadFile(pipe, Some(&mut buffer), Some(&mut bytes_read), None) };
        if let Err(e) = read {
            if e.code() == ERROR_BROKEN_PIPE.to_hresult() {
                debug!("client hung up");
            } else if !shutdown.load(Ordering::Acquire) {
                warn!("pipe read failed: {e}");
            }
            return;
        }
        if bytes_read == 0 {
            return;
        }

        let message = &buffer[..bytes_read as usize];
        let request = parse_command(message);
        debug!(?request, "command received");

        match request {
            // Liveness must not depend on the host rendering frames.
            Request::Ping => queues.push_response("PONG".to_owned()),
            other => {
                if !queues.push_request(other) {
                    warn!("request queue full, rejecting command");
                    queues.push_response("ERROR:Overloaded".to_owned());
                }
            }
        }

        // Single outstanding request per connection: block (bounded) on the
        // answer before reading the next command.
        let mut response = None;
        for attempt in 0..RESPONSE_POLL_ATTEMPTS {
            if shutdown.load(Ordering::Acquire) {
                return;
            }
            if let Some(r) = queues.pop_response() {
                response = Some(r);
                break;
            }
            if attempt + 1 < RESPONSE_POLL_ATTEMPTS {
                thread::sleep(RESPONSE_POLL_INTERVAL);
            }
        }

        match response {
            Some(response) => {
                if let Err(e) = write_message(pipe, &response) {
                    warn!("response write failed: {e}");
                    return;
                }
            }
            None => {
                // The request still completes in a later frame; its response
                // stays queued for whoever reads next. The client owns its
                // own timeout.
                warn!("no response within soft timeout, writing nothing");
            }
        }
    }
}

/// One response, one pipe message, NUL included, flushed.
fn write_message(pipe: HANDLE, response: &str) -> windows::core::Result<()> {
    let mut framed = Vec::with_capacity(response.len() + 1);
    framed.extend_from_slice(response.as_bytes());
    framed.push(0);

    let mut written = 0u32;
    unsafe { WriteFile(pipe, Some(&framed), Some(&mut written), None)? };
    if written as usize != framed.len() {
        warn!(written, expected = framed.len(), "short pipe write");
    }
    unsafe { FlushFileBuffers(pipe)? };
    debug!(bytes = written, "response sent");
    Ok(())
}
