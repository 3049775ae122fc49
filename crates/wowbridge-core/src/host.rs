//! The seam between the dispatcher and the live game process.
//!
//! Everything the dispatcher needs from the host — protected script
//! execution, the native spell-info and cast entry points, the two static
//! reads and the positional check chain — goes through [`Host`]. The real
//! implementation lives in `wowbridge-host`; tests substitute a scripted
//! mock. Raw addresses never cross this boundary in either direction.
//!
//! The `Display` text of each error enum is exactly what goes on the wire
//! after the command-specific tag, so the variants here enumerate the tagged
//! error strings of the protocol contract.

use crate::value::ScriptValue;

/// Error from a protected script execution.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    /// Chunk failed to compile; message comes from the engine.
    #[error("load failed:{0}")]
    Load(String),
    /// Chunk raised a runtime error; message comes from the engine.
    #[error("pcall failed:{0}")]
    Call(String),
    /// The scripting state pointer read as zero.
    #[error("not initialized")]
    StateNull,
    /// The state pointer failed its pre-call readability probe, or the call
    /// path panicked; the stack was restored to its snapshot either way.
    #[error("crash")]
    Fault,
}

/// Error from a direct host-native function invocation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HostCallError {
    #[error("func null")]
    FunctionNull,
    /// The call target or scripting state failed its pre-call readability
    /// probe, or the call path panicked.
    #[error("crash")]
    Crash,
}

/// A static memory read could not be satisfied.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unreadable address {0:#x}")]
pub struct MemoryError(pub usize);

/// Failure along the positional-check pointer chain. Variant order follows
/// the chain itself: connection, manager, own guid, the two lookups, then
/// the hemisphere calls.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum PositionError {
    #[error("CC null")]
    ClientConnectionNull,
    #[error("OM null")]
    ObjectManagerNull,
    #[error("PlayerGUID 0")]
    PlayerGuidZero,
    #[error("PlayerLookup fail")]
    PlayerLookupFailed,
    #[error("TargetLookup fail")]
    TargetLookupFailed,
    /// A resolved unit object failed the readability probe run before the
    /// hemisphere call dereferences it.
    #[error("AV checking position")]
    AccessViolation,
}

/// Structured result of the host's native spell-info call. Fields the host
/// did not provide (or provided with the wrong type) hold sentinels.
#[derive(Debug, Clone, PartialEq)]
pub struct SpellInfo {
    pub name: String,
    pub rank: String,
    pub icon: String,
    pub cost: f64,
    pub power_type: i32,
    pub cast_time_ms: f64,
    pub min_range: f64,
    pub max_range: f64,
}

impl SpellInfo {
    pub const MISSING_TEXT: &'static str = "N/A";

    /// True when the host resolved no usable name for the spell.
    pub fn name_missing(&self) -> bool {
        self.name.is_empty() || self.name == Self::MISSING_TEXT
    }
}

impl Default for SpellInfo {
    fn default() -> Self {
        Self {
            name: Self::MISSING_TEXT.to_owned(),
            rank: Self::MISSING_TEXT.to_owned(),
            icon: Self::MISSING_TEXT.to_owned(),
            cost: -1.0,
            power_type: -1,
            cast_time_ms: -1.0,
            min_range: -1.0,
            max_range: -1.0,
        }
    }
}

/// Raw outputs of the two hemisphere calls, observer order fixed:
/// first the target observing the player, then the player observing the
/// target. The dispatcher combines them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FacingChecks {
    pub target_sees_player: bool,
    pub player_sees_target: bool,
}

/// Host-process operations the dispatcher is allowed to perform. All calls
/// happen on the render thread; implementations own the stack discipline.
pub trait Host {
    /// Whether the scripting state pointer currently reads non-null.
    fn scripting_ready(&self) -> bool;

    /// Load and pcall a chunk with zero arguments and all results, returning
    /// the result slots in stack order. Must leave the stack depth exactly
    /// as found on every path.
    fn run_script(&self, code: &[u8]) -> Result<Vec<ScriptValue>, ScriptError>;

    /// Invoke the host's native spell-info function directly.
    fn spell_info(&self, spell_id: i32) -> Result<SpellInfo, HostCallError>;

    /// Invoke the host's internal cast entry; returns its raw result byte.
    fn cast_spell(&self, spell_id: i32, target_guid: u64) -> Result<u8, HostCallError>;

    /// Point-in-time read of the current-target GUID static.
    fn read_target_guid(&self) -> Result<u64, MemoryError>;

    /// Point-in-time read of the combo-point byte static.
    fn read_combo_points(&self) -> Result<u8, MemoryError>;

    /// Resolve both units and run the hemisphere check in both observer
    /// directions.
    fn facing_checks(&self, target_guid: u64) -> Result<FacingChecks, PositionError>;

    /// Force the script stack back to empty. Only called after a dispatch
    /// panic, when the normal restore paths cannot be trusted.
    fn reset_script_stack(&self);
}
