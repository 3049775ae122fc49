//! The live-game [`Host`] implementation: native entry points and static
//! reads, layered over the scripting adapter.

use std::ffi::c_void;
use std::mem;

use tracing::{debug, warn};
use wowbridge_core::{
    FacingChecks, Host, HostCallError, MemoryError, PositionError, ScriptError, ScriptValue,
    SpellInfo,
};

use crate::lua::ScriptingAdapter;
use crate::memory;
use crate::offsets::OffsetsTable;

/// CastLocalPlayerSpell(spellId, 0, targetGuid, 0) → raw result byte.
type CastSpellFn = unsafe extern "cdecl" fn(spell_id: i32, unk1: i32, target_guid: u64, unk2: u8) -> u8;
/// Object_RawGetByGuid(guid, flags) → object pointer or null.
type FindObjectFn = unsafe extern "cdecl" fn(guid: u64, flags: i32) -> *mut c_void;
/// CGUnit hemisphere test: is `observed` within the front hemisphere of
/// `observer`?
type InFrontFn = unsafe extern "thiscall" fn(observer: *mut c_void, observed: *mut c_void) -> u8;

/// Flags value `FindObjectFn` expects for unit lookups.
const OBJECT_LOOKUP_FLAGS: i32 = 1;

/// Span probed on a unit object before it goes to the hemisphere call,
/// covering through the position/facing block that call reads.
const OBJECT_PROBE_LEN: usize = 0x9C8;

pub struct GameHost {
    lua: ScriptingAdapter,
    cast_spell: Option<CastSpellFn>,
    find_object: FindObjectFn,
    in_front: InFrontFn,
    client_connection: usize,
    object_manager_offset: usize,
    local_guid_offset: usize,
    target_guid_addr: usize,
    combo_points_addr: usize,
}

impl GameHost {
    pub fn new(offsets: &OffsetsTable, lua: ScriptingAdapter) -> Self {
        // The cast entry keeps its null guard because the wire contract has
        // an error shape for it; the lookup entries are plain table contract.
        let cast_spell = (offsets.cast_local_player_spell != 0)
            .then(|| unsafe { mem::transmute::<usize, CastSpellFn>(offsets.cast_local_player_spell) });
        Self {
            lua,
            cast_spell,
            find_object: unsafe {
                mem::transmute::<usize, FindObjectFn>(offsets.find_object_by_guid)
            },
            in_front: unsafe {
                mem::transmute::<usize, InFrontFn>(offsets.unit_in_front_hemisphere)
            },
            client_connection: offsets.client_connection,
            object_manager_offset: offsets.object_manager_offset,
            local_guid_offset: offsets.local_guid_offset,
            target_guid_addr: offsets.current_target_guid,
            combo_points_addr: offsets.combo_points,
        }
    }

    /// Walk connection → object manager → local GUID and resolve the player
    /// object. Shared head of the positional check.
    fn resolve_player(&self) -> Result<*mut c_void, PositionError> {
        let connection: usize = memory::read(self.client_connection)
            .map_err(|_| PositionError::ClientConnectionNull)?;
        if connection == 0 {
            return Err(PositionError::ClientConnectionNull);
        }
        let manager: usize = memory::read(connection + self.object_manager_offset)
            .map_err(|_| PositionError::ObjectManagerNull)?;
        if manager == 0 {
            return Err(PositionError::ObjectManagerNull);
        }
        let player_guid: u64 = memory::read(manager + self.local_guid_offset)
            .map_err(|_| PositionError::PlayerGuidZero)?;
        if player_guid == 0 {
            return Err(PositionError::PlayerGuidZero);
        }
        let player = unsafe { (self.find_object)(player_guid, OBJECT_LOOKUP_FLAGS) };
        if player.is_null() {
            warn!(player_guid = %format_args!("{player_guid:#x}"), "player object lookup failed");
            return Err(PositionError::PlayerLookupFailed);
        }
        Ok(player)
    }
}

impl Host for GameHost {
    fn scripting_ready(&self) -> bool {
        self.lua.state().is_some()
    }

    fn run_script(&self, code: &[u8]) -> Result<Vec<ScriptValue>, ScriptError> {
        self.lua.run_chunk(code)
    }

    fn spell_info(&self, spell_id: i32) -> Result<SpellInfo, HostCallError> {
        self.lua.spell_info(spell_id)
    }

    fn cast_spell(&self, spell_id: i32, target_guid: u64) -> Result<u8, HostCallError> {
        let cast = self.cast_spell.ok_or(HostCallError::FunctionNull)?;
        // Probe the entry point before jumping to it; a table retargeted at
        // the wrong client build becomes a crash response, not a fault on
        // the render thread.
        if !memory::is_readable(cast as usize, 1) {
            warn!(addr = %format_args!("{:#x}", cast as usize), "cast entry unmapped");
            return Err(HostCallError::Crash);
        }
        let result = unsafe { cast(spell_id, 0, target_guid, 0) };
        debug!(spell_id, result, "cast dispatched to client");
        Ok(result)
    }

    fn read_target_guid(&self) -> Result<u64, MemoryError> {
        memory::read(self.target_guid_addr)
    }

    fn read_combo_points(&self) -> Result<u8, MemoryError> {
        memory::read(self.combo_points_addr)
    }

    fn facing_checks(&self, target_guid: u64) -> Result<FacingChecks, PositionError> {
        let player = self.resolve_player()?;
        let target = unsafe { (self.find_object)(target_guid, OBJECT_LOOKUP_FLAGS) };
        if target.is_null() {
            return Err(PositionError::TargetLookupFailed);
        }
        // The manager can hand back a unit that is already being torn down;
        // probe both objects before the hemisphere call dereferences them.
        if !memory::is_readable(player as usize, OBJECT_PROBE_LEN)
            || !memory::is_readable(target as usize, OBJECT_PROBE_LEN)
        {
            warn!("unit object unmapped, skipping hemisphere check");
            return Err(PositionError::AccessViolation);
        }
        // Both observer directions; the dispatcher combines them.
        let target_sees_player = unsafe { (self.in_front)(target, player) } != 0;
        let player_sees_target = unsafe { (self.in_front)(player, target) } != 0;
        Ok(FacingChecks { target_sees_player, player_sees_target })
    }

    fn reset_script_stack(&self) {
        self.lua.reset_stack();
    }
}
