//! # wowbridge-core
//!
//! Backend-agnostic half of the wowbridge automation bridge: the pipe
//! command grammar, the typed request model, the command dispatcher and the
//! cross-thread queue pair. Pair with `wowbridge-host` (the Windows/x86
//! backend) inside the injected payload to get a running bridge.
//!
//! Everything in this crate is plain data and logic — no raw pointers, no
//! Win32. The host side is reached exclusively through the [`Host`] trait,
//! which keeps the dispatcher testable off-target.

pub mod dispatch;
pub mod host;
pub mod protocol;
pub mod queue;
pub mod value;

// ─── re-exports ──────────────────────────────────────────────────────────────
pub use dispatch::dispatch;
pub use host::{FacingChecks, Host, HostCallError, MemoryError, PositionError, ScriptError, SpellInfo};
pub use protocol::{parse_command, Request, PIPE_NAME};
pub use queue::{BridgeQueues, REQUEST_QUEUE_LIMIT};
pub use value::ScriptValue;
