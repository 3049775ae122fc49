//! WoW 3.3.5a (build 12340) — addresses and structure offsets.
//!
//! This table IS the interop contract with the closed host binary: nothing
//! here is validated at runtime, because there is nothing meaningful to
//! validate it against. Retargeting the bridge to another client build means
//! replacing these constants and nothing else.

/// Embedded FrameScript (Lua 5.1) C API, mapped to the client's
/// implementations. All `__cdecl`.
pub mod lua_api {
    /// Address holding the `lua_State*` the client threads through FrameScript.
    pub const STATE_PTR: usize = 0x00D3F78C;
    /// FrameScript_Execute(code, source, 0) — fire and forget.
    pub const EXECUTE: usize = 0x0081_9210;
    /// FrameScript_PCall.
    pub const PCALL: usize = 0x0084_EC50;
    /// FrameScript_Load (luaL_loadbuffer).
    pub const LOADBUFFER: usize = 0x0084_F860;
    pub const GETTOP: usize = 0x0084_DBD0;
    pub const SETTOP: usize = 0x0084_DBF0;
    pub const TYPE: usize = 0x0084_DEB0;
    pub const ISNUMBER: usize = 0x0084_DF20;
    pub const ISSTRING: usize = 0x0084_DF60;
    pub const TONUMBER: usize = 0x0084_E030;
    pub const TOINTEGER: usize = 0x0084_E070;
    pub const TOBOOLEAN: usize = 0x0084_E0B0;
    pub const TOLSTRING: usize = 0x0084_E0E0;
    pub const PUSHNIL: usize = 0x0084_E280;
    pub const PUSHINTEGER: usize = 0x0084_E2D0;
    pub const PUSHSTRING: usize = 0x0084_E350;
    pub const GETFIELD: usize = 0x0084_E590;
}

/// Internal client functions invoked directly by address.
pub mod game {
    /// lua_GetSpellInfo — the C function behind the script-visible
    /// `GetSpellInfo`, callable with an id pushed on the stack.
    pub const GET_SPELL_INFO: usize = 0x0054_0A30;
    /// CastLocalPlayerSpell(spellId, 0, targetGuid, 0).
    pub const CAST_LOCAL_PLAYER_SPELL: usize = 0x0080_DA40;
    /// CGWorldFrame::Object_RawGetByGuid(guid, flags).
    pub const FIND_OBJECT_BY_GUID: usize = 0x004D_4DB0;
    /// CGUnit vector-difference-within-hemisphere check (`__thiscall`).
    pub const UNIT_IN_FRONT_HEMISPHERE: usize = 0x0071_BC50;
}

/// Static data the bridge reads point-in-time.
pub mod statics {
    /// Pointer to the ClientConnection object.
    pub const CLIENT_CONNECTION: usize = 0x00C7_9CE0;
    /// ClientConnection → object-manager pointer.
    pub const OBJECT_MANAGER_OFFSET: usize = 0x2ED0;
    /// Object manager → local player GUID.
    pub const LOCAL_GUID_OFFSET: usize = 0xC0;
    /// Current target GUID (u64).
    pub const CURRENT_TARGET_GUID: usize = 0x00BD_07A0;
    /// Player combo points (u8).
    pub const COMBO_POINTS: usize = 0x00BD_084D;
}

/// Direct3D 9 device walk used to reach the per-frame present slot.
pub mod d3d {
    /// Pointer to the client's D3D wrapper object.
    pub const DEVICE_ANCHOR: usize = 0x00C5_DF88;
    /// Wrapper → IDirect3DDevice9 pointer.
    pub const DEVICE_OFFSET: usize = 0x397C;
    /// Byte offset of EndScene in the device vtable (slot 42 × 4).
    pub const ENDSCENE_VTABLE_OFFSET: usize = 0xA8;
}

/// Immutable snapshot of the address book, taken once at bridge init.
/// Components hold a reference to this rather than reaching into the
/// constant modules, so a future load-time table drops in unchanged.
#[derive(Debug, Clone, Copy)]
pub struct OffsetsTable {
    pub state_ptr: usize,
    pub execute: usize,
    pub pcall: usize,
    pub loadbuffer: usize,
    pub gettop: usize,
    pub settop: usize,
    pub value_type: usize,
    pub isnumber: usize,
    pub isstring: usize,
    pub tonumber: usize,
    pub tointeger: usize,
    pub toboolean: usize,
    pub tolstring: usize,
    pub pushnil: usize,
    pub pushinteger: usize,
    pub pushstring: usize,
    pub getfield: usize,

    pub get_spell_info: usize,
    pub cast_local_player_spell: usize,
    pub find_object_by_guid: usize,
    pub unit_in_front_hemisphere: usize,

    pub client_connection: usize,
    pub object_manager_offset: usize,
    pub local_guid_offset: usize,
    pub current_target_guid: usize,
    pub combo_points: usize,

    pub d3d_device_anchor: usize,
    pub d3d_device_offset: usize,
    pub endscene_vtable_offset: usize,

    initialized: bool,
}

impl OffsetsTable {
    /// The compiled-in build 12340 table.
    pub fn wow_12340() -> Self {
        Self {
            state_ptr: lua_api::STATE_PTR,
            execute: lua_api::EXECUTE,
            pcall: lua_api::PCALL,
            loadbuffer: lua_api::LOADBUFFER,
            gettop: lua_api::GETTOP,
            settop: lua_api::SETTOP,
            value_type: lua_api::TYPE,
            isnumber: lua_api::ISNUMBER,
            isstring: lua_api::ISSTRING,
            tonumber: lua_api::TONUMBER,
            tointeger: lua_api::TOINTEGER,
            toboolean: lua_api::TOBOOLEAN,
            tolstring: lua_api::TOLSTRING,
            pushnil: lua_api::PUSHNIL,
            pushinteger: lua_api::PUSHINTEGER,
            pushstring: lua_api::PUSHSTRING,
            getfield: lua_api::GETFIELD,

            get_spell_info: game::GET_SPELL_INFO,
            cast_local_player_spell: game::CAST_LOCAL_PLAYER_SPELL,
            find_object_by_guid: game::FIND_OBJECT_BY_GUID,
            unit_in_front_hemisphere: game::UNIT_IN_FRONT_HEMISPHERE,

            client_connection: statics::CLIENT_CONNECTION,
            object_manager_offset: statics::OBJECT_MANAGER_OFFSET,
            local_guid_offset: statics::LOCAL_GUID_OFFSET,
            current_target_guid: statics::CURRENT_TARGET_GUID,
            combo_points: statics::COMBO_POINTS,

            d3d_device_anchor: d3d::DEVICE_ANCHOR,
            d3d_device_offset: d3d::DEVICE_OFFSET,
            endscene_vtable_offset: d3d::ENDSCENE_VTABLE_OFFSET,

            initialized: true,
        }
    }

    /// Readiness flag the other components assert before first use.
    #[inline]
    pub fn initialized(&self) -> bool {
        self.initialized
    }
}
