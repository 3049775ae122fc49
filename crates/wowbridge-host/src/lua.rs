//! Adapter over the host's embedded FrameScript (Lua 5.1) C API.
//!
//! The adapter is a bundle of typed function pointers transmuted once from
//! the offsets table, plus the stack discipline: every public entry point
//! restores the stack depth it found, on success and on every failure path,
//! so the host's script engine can never be left asymmetric. Raw addresses
//! and raw state pointers stay inside this module — callers see
//! [`LuaStateHandle`] and typed values only.
//!
//! Everything here must run on the render thread; the adapter owns no
//! threads and no locks.

use std::ffi::c_void;
use std::mem;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};
use wowbridge_core::{HostCallError, ScriptError, ScriptValue, SpellInfo};

use crate::memory;
use crate::offsets::OffsetsTable;

// FrameScript is stock Lua 5.1 under the hood; tags and pcall constants match.
const LUA_TNIL: i32 = 0;
const LUA_TBOOLEAN: i32 = 1;
const LUA_TNUMBER: i32 = 3;
const LUA_TSTRING: i32 = 4;
const LUA_MULTRET: i32 = -1;

/// Chunk name the engine reports in error messages for bridge-loaded code.
const CHUNK_NAME: &[u8] = b"=wowbridge\0";

/// Bytes of the state struct probed before the pointer is handed to the
/// engine. A stale anchor (logout, reload) becomes a fault result instead of
/// an access violation on the render thread.
const STATE_PROBE_LEN: usize = mem::size_of::<usize>();

// ─── Host function signatures ────────────────────────────────────────────────

type ExecuteFn = unsafe extern "cdecl" fn(code: *const u8, source: *const u8, zero: i32);
type PcallFn = unsafe extern "cdecl" fn(state: *mut c_void, nargs: i32, nresults: i32, errfunc: i32) -> i32;
type LoadBufferFn =
    unsafe extern "cdecl" fn(state: *mut c_void, buf: *const u8, len: usize, name: *const u8) -> i32;
type GetTopFn = unsafe extern "cdecl" fn(state: *mut c_void) -> i32;
type SetTopFn = unsafe extern "cdecl" fn(state: *mut c_void, idx: i32);
type TypeFn = unsafe extern "cdecl" fn(state: *mut c_void, idx: i32) -> i32;
type IsNumberFn = unsafe extern "cdecl" fn(state: *mut c_void, idx: i32) -> i32;
type IsStringFn = unsafe extern "cdecl" fn(state: *mut c_void, idx: i32) -> i32;
type ToNumberFn = unsafe extern "cdecl" fn(state: *mut c_void, idx: i32) -> f64;
type ToIntegerFn = unsafe extern "cdecl" fn(state: *mut c_void, idx: i32) -> i32;
type ToBooleanFn = unsafe extern "cdecl" fn(state: *mut c_void, idx: i32) -> i32;
type ToLStringFn =
    unsafe extern "cdecl" fn(state: *mut c_void, idx: i32, len: *mut usize) -> *const u8;
type PushNilFn = unsafe extern "cdecl" fn(state: *mut c_void);
type PushIntegerFn = unsafe extern "cdecl" fn(state: *mut c_void, n: i32);
type PushStringFn = unsafe extern "cdecl" fn(state: *mut c_void, s: *const u8);
type GetFieldFn = unsafe extern "cdecl" fn(state: *mut c_void, idx: i32, key: *const u8);
/// A host C function following the engine's calling protocol: arguments on
/// the stack, returns the result count.
type NativeScriptFn = unsafe extern "cdecl" fn(state: *mut c_void) -> i32;

/// Opaque scripting-state handle. Copyable, never dereferenced outside this
/// module, never null.
#[derive(Debug, Clone, Copy)]
pub struct LuaStateHandle(*mut c_void);

/// Typed view of the embedded scripting C API.
pub struct ScriptingAdapter {
    state_anchor: usize,
    execute: ExecuteFn,
    pcall: PcallFn,
    loadbuffer: LoadBufferFn,
    gettop: GetTopFn,
    settop: SetTopFn,
    value_type: TypeFn,
    isnumber: IsNumberFn,
    isstring: IsStringFn,
    tonumber: ToNumberFn,
    tointeger: ToIntegerFn,
    toboolean: ToBooleanFn,
    tolstring: ToLStringFn,
    pushnil: PushNilFn,
    pushinteger: PushIntegerFn,
    pushstring: PushStringFn,
    getfield: GetFieldFn,
    native_spell_info: NativeScriptFn,
}

impl ScriptingAdapter {
    /// Bind the adapter to the offsets table. The addresses are the host's
    /// contract — there is nothing to check here beyond table readiness.
    pub fn new(offsets: &OffsetsTable) -> Self {
        assert!(offsets.initialized(), "offsets table consumed before init");
        unsafe {
            Self {
                state_anchor: offsets.state_ptr,
                execute: mem::transmute::<usize, ExecuteFn>(offsets.execute),
                pcall: mem::transmute::<usize, PcallFn>(offsets.pcall),
                loadbuffer: mem::transmute::<usize, LoadBufferFn>(offsets.loadbuffer),
                gettop: mem::transmute::<usize, GetTopFn>(offsets.gettop),
                settop: mem::transmute::<usize, SetTopFn>(offsets.settop),
                value_type: mem::transmute::<usize, TypeFn>(offsets.value_type),
                isnumber: mem::transmute::<usize, IsNumberFn>(offsets.isnumber),
                isstring: mem::transmute::<usize, IsStringFn>(offsets.isstring),
                tonumber: mem::transmute::<usize, ToNumberFn>(offsets.tonumber),
                tointeger: mem::transmute::<usize, ToIntegerFn>(offsets.tointeger),
                toboolean: mem::transmute::<usize, ToBooleanFn>(offsets.toboolean),
                tolstring: mem::transmute::<usize, ToLStringFn>(offsets.tolstring),
                pushnil: mem::transmute::<usize, PushNilFn>(offsets.pushnil),
                pushinteger: mem::transmute::<usize, PushIntegerFn>(offsets.pushinteger),
                pushstring: mem::transmute::<usize, PushStringFn>(offsets.pushstring),
                getfield: mem::transmute::<usize, GetFieldFn>(offsets.getfield),
                native_spell_info: mem::transmute::<usize, NativeScriptFn>(offsets.get_spell_info),
            }
        }
    }

    /// Re-read the state pointer from its anchor. Deliberately not cached:
    /// the client reallocates the state across login boundaries.
    pub fn state(&self) -> Option<LuaStateHandle> {
        let raw: usize = memory::read(self.state_anchor).ok()?;
        (raw != 0).then(|| LuaStateHandle(raw as *mut c_void))
    }

    /// Fire-and-forget execution through the client's own execute entry.
    /// No results are observable through this path.
    pub fn execute_simple(&self, code: &str, source: &str) {
        if self.state().is_none() {
            warn!("execute_simple skipped: scripting state is null");
            return;
        }
        let Some(code) = nul_terminated(code) else { return };
        let Some(source) = nul_terminated(source) else { return };
        unsafe { (self.execute)(code.as_ptr(), source.as_ptr(), 0) };
    }

    /// Load and pcall a chunk with zero arguments and all results.
    ///
    /// The stack depth is snapshotted on entry and restored on every exit
    /// path — success, engine error, or a panic caught at the boundary
    /// below, which surfaces as [`ScriptError::Fault`]. The returned values
    /// are coerced copies, independent of the engine stack.
    pub fn run_chunk(&self, code: &[u8]) -> Result<Vec<ScriptValue>, ScriptError> {
        let state = self.state().ok_or(ScriptError::StateNull)?;
        if !memory::is_readable(state.0 as usize, STATE_PROBE_LEN) {
            warn!(state = %format_args!("{:#x}", state.0 as usize), "scripting state unmapped");
            return Err(ScriptError::Fault);
        }
        let top_before = unsafe { (self.gettop)(state.0) };
        let result =
            panic::catch_unwind(AssertUnwindSafe(|| self.run_chunk_at(state, top_before, code)));
        unsafe { (self.settop)(state.0, top_before) };
        result.unwrap_or(Err(ScriptError::Fault))
    }

    fn run_chunk_at(
        &self,
        state: LuaStateHandle,
        top_before: i32,
        code: &[u8],
    ) -> Result<Vec<ScriptValue>, ScriptError> {
        let status = unsafe {
            (self.loadbuffer)(state.0, code.as_ptr(), code.len(), CHUNK_NAME.as_ptr())
        };
        if status != 0 {
            return Err(ScriptError::Load(self.error_text(state)));
        }

        let status = unsafe { (self.pcall)(state.0, 0, LUA_MULTRET, 0) };
        if status != 0 {
            return Err(ScriptError::Call(self.error_text(state)));
        }

        let top_after = unsafe { (self.gettop)(state.0) };
        let mut values = Vec::with_capacity((top_after - top_before).max(0) as usize);
        for idx in (top_before + 1)..=top_after {
            values.push(self.value_at(state, idx));
        }
        Ok(values)
    }

    /// Call the client's native spell-info function directly: one integer
    /// argument pushed, a variable result window read back relative to the
    /// entry snapshot. Missing or mistyped fields keep their sentinels.
    ///
    /// Same boundary discipline as [`run_chunk`](Self::run_chunk): state
    /// probe up front, snapshot restored around a caught panic, which
    /// surfaces as [`HostCallError::Crash`].
    pub fn spell_info(&self, spell_id: i32) -> Result<SpellInfo, HostCallError> {
        let state = self.state().ok_or(HostCallError::FunctionNull)?;
        if !memory::is_readable(state.0 as usize, STATE_PROBE_LEN) {
            warn!(state = %format_args!("{:#x}", state.0 as usize), "scripting state unmapped");
            return Err(HostCallError::Crash);
        }
        let top_before = unsafe { (self.gettop)(state.0) };
        let info = panic::catch_unwind(AssertUnwindSafe(|| {
            self.spell_info_at(state, top_before, spell_id)
        }));
        unsafe { (self.settop)(state.0, top_before) };
        info.map_err(|_| HostCallError::Crash)
    }

    fn spell_info_at(&self, state: LuaStateHandle, top_before: i32, spell_id: i32) -> SpellInfo {
        unsafe { (self.pushinteger)(state.0, spell_id) };
        let reported = unsafe { (self.native_spell_info)(state.0) };
        let top_after = unsafe { (self.gettop)(state.0) };
        debug!(spell_id, reported, pushed = top_after - top_before - 1, "native spell info");

        let mut info = SpellInfo::default();
        // Result window: the argument sits at +1, results start at +2.
        if let Some(name) = self.text_at(state, top_before, top_after, 2) {
            info.name = name;
        }
        if let Some(rank) = self.text_at(state, top_before, top_after, 3) {
            info.rank = rank;
        }
        if let Some(icon) = self.text_at(state, top_before, top_after, 4) {
            info.icon = icon;
        }
        if let Some(cost) = self.number_at(state, top_before, top_after, 5) {
            info.cost = cost;
        }
        if let Some(power) = self.integer_at(state, top_before, top_after, 7) {
            info.power_type = power;
        }
        if let Some(cast_ms) = self.number_at(state, top_before, top_after, 8) {
            info.cast_time_ms = cast_ms;
        }
        if let Some(min) = self.number_at(state, top_before, top_after, 9) {
            info.min_range = min;
        }
        if let Some(max) = self.number_at(state, top_before, top_after, 10) {
            info.max_range = max;
        }
        info
    }

    /// Force the stack back to empty. For use after a caught panic, when
    /// the per-call restore cannot be trusted to have run.
    pub fn reset_stack(&self) {
        if let Some(state) = self.state() {
            if memory::is_readable(state.0 as usize, STATE_PROBE_LEN) {
                unsafe { (self.settop)(state.0, 0) };
            }
        }
    }

    // ─── Typed push / pop ────────────────────────────────────────────────────

    pub fn push_integer(&self, state: LuaStateHandle, n: i32) {
        unsafe { (self.pushinteger)(state.0, n) };
    }

    pub fn push_string(&self, state: LuaStateHandle, s: &str) {
        if let Some(bytes) = nul_terminated(s) {
            unsafe { (self.pushstring)(state.0, bytes.as_ptr()) };
        }
    }

    pub fn push_nil(&self, state: LuaStateHandle) {
        unsafe { (self.pushnil)(state.0) };
    }

    pub fn to_integer(&self, state: LuaStateHandle, idx: i32) -> i32 {
        unsafe { (self.tointeger)(state.0, idx) }
    }

    pub fn to_number(&self, state: LuaStateHandle, idx: i32) -> f64 {
        unsafe { (self.tonumber)(state.0, idx) }
    }

    pub fn to_boolean(&self, state: LuaStateHandle, idx: i32) -> bool {
        unsafe { (self.toboolean)(state.0, idx) != 0 }
    }

    /// Owned copy of the slot coerced through the engine's string primitive;
    /// `None` for types it cannot coerce.
    pub fn to_text(&self, state: LuaStateHandle, idx: i32) -> Option<String> {
        self.string_at(state, idx)
    }

    pub fn type_of(&self, state: LuaStateHandle, idx: i32) -> i32 {
        unsafe { (self.value_type)(state.0, idx) }
    }

    pub fn get_field(&self, state: LuaStateHandle, idx: i32, key: &str) {
        if let Some(bytes) = nul_terminated(key) {
            unsafe { (self.getfield)(state.0, idx, bytes.as_ptr()) };
        }
    }

    pub fn stack_top(&self, state: LuaStateHandle) -> i32 {
        unsafe { (self.gettop)(state.0) }
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    /// Coerce one stack slot into an owned value, using the engine's own
    /// conversion primitives per type tag.
    fn value_at(&self, state: LuaStateHandle, idx: i32) -> ScriptValue {
        match unsafe { (self.value_type)(state.0, idx) } {
            LUA_TBOOLEAN => ScriptValue::Boolean(unsafe { (self.toboolean)(state.0, idx) != 0 }),
            LUA_TNUMBER => ScriptValue::Number(unsafe { (self.tonumber)(state.0, idx) }),
            LUA_TSTRING => ScriptValue::Text(self.string_at(state, idx).unwrap_or_default()),
            LUA_TNIL => ScriptValue::Nil,
            // Tables, functions, userdata: nothing the wire can carry.
            _ => ScriptValue::Nil,
        }
    }

    /// Owned copy of the string at `idx`, or `None` when the slot holds no
    /// string the engine can hand back.
    fn string_at(&self, state: LuaStateHandle, idx: i32) -> Option<String> {
        let mut len = 0usize;
        let ptr = unsafe { (self.tolstring)(state.0, idx, &mut len) };
        if ptr.is_null() {
            return None;
        }
        let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    fn error_text(&self, state: LuaStateHandle) -> String {
        self.string_at(state, -1).unwrap_or_else(|| "unknown error".to_owned())
    }

    // Window readers for the native-call result schema. `offset` is relative
    // to the pre-call snapshot; slots past the current top simply don't exist.

    fn text_at(
        &self,
        state: LuaStateHandle,
        base: i32,
        top: i32,
        offset: i32,
    ) -> Option<String> {
        let idx = base + offset;
        if idx > top || unsafe { (self.isstring)(state.0, idx) } == 0 {
            return None;
        }
        self.string_at(state, idx).filter(|s| !s.is_empty())
    }

    fn number_at(&self, state: LuaStateHandle, base: i32, top: i32, offset: i32) -> Option<f64> {
        let idx = base + offset;
        if idx > top || unsafe { (self.isnumber)(state.0, idx) } == 0 {
            return None;
        }
        Some(unsafe { (self.tonumber)(state.0, idx) })
    }

    fn integer_at(&self, state: LuaStateHandle, base: i32, top: i32, offset: i32) -> Option<i32> {
        let idx = base + offset;
        if idx > top || unsafe { (self.isnumber)(state.0, idx) } == 0 {
            return None;
        }
        Some(unsafe { (self.tointeger)(state.0, idx) })
    }
}

/// Copy `s` with a trailing NUL for the C side. Interior NULs cannot be
/// represented; the call is dropped rather than truncated silently.
fn nul_terminated(s: &str) -> Option<Vec<u8>> {
    if s.as_bytes().contains(&0) {
        warn!("dropping string with interior NUL");
        return None;
    }
    let mut bytes = Vec::with_capacity(s.len() + 1);
    bytes.extend_from_slice(s.as_bytes());
    bytes.push(0);
    Some(bytes)
}

#[cfg(test)]
mod tests {
    //! The adapter is exercised against a fake engine: a set of `cdecl`
    //! functions over a thread-local stack, with their addresses written
    //! into a test offsets table. libtest runs each test on its own thread,
    //! so the thread-local engine state starts clean every time.

    use std::cell::RefCell;
    use std::ffi::CString;

    use super::*;
    use crate::offsets::OffsetsTable;

    #[derive(Clone, Debug, PartialEq)]
    enum Slot {
        Nil,
        Bool(bool),
        Num(f64),
        Str(String),
        Chunk,
    }

    #[derive(Default)]
    struct Staged {
        load_error: Option<String>,
        call_error: Option<String>,
        results: Vec<Slot>,
    }

    thread_local! {
        static STACK: RefCell<Vec<Slot>> = RefCell::new(Vec::new());
        static STAGED: RefCell<Staged> = RefCell::new(Staged::default());
        // Keeps tolstring results alive for the duration of the test thread.
        static ARENA: RefCell<Vec<CString>> = RefCell::new(Vec::new());
    }

    static NULL_STATE: usize = 0;

    fn abs_index(len: usize, idx: i32) -> Option<usize> {
        if idx > 0 {
            let i = idx as usize - 1;
            (i < len).then_some(i)
        } else if idx < 0 {
            let i = len as i32 + idx;
            (i >= 0).then_some(i as usize)
        } else {
            None
        }
    }

    fn slot_at(idx: i32) -> Option<Slot> {
        STACK.with(|s| {
            let stack = s.borrow();
            abs_index(stack.len(), idx).map(|i| stack[i].clone())
        })
    }

    unsafe extern "cdecl" fn fk_gettop(_s: *mut c_void) -> i32 {
        STACK.with(|s| s.borrow().len() as i32)
    }

    unsafe extern "cdecl" fn fk_settop(_s: *mut c_void, idx: i32) {
        STACK.with(|s| {
            let mut stack = s.borrow_mut();
            let target = if idx >= 0 {
                idx as usize
            } else {
                (stack.len() as i32 + 1 + idx).max(0) as usize
            };
            stack.resize(target, Slot::Nil);
        });
    }

    unsafe extern "cdecl" fn fk_loadbuffer(
        _s: *mut c_void,
        _buf: *const u8,
        _len: usize,
        _name: *const u8,
    ) -> i32 {
        let err = STAGED.with(|g| g.borrow_mut().load_error.take());
        STACK.with(|s| {
            let mut stack = s.borrow_mut();
            match err {
                Some(msg) => {
                    stack.push(Slot::Str(msg));
                    1
                }
                None => {
                    stack.push(Slot::Chunk);
                    0
                }
            }
        })
    }

    unsafe extern "cdecl" fn fk_pcall(
        _s: *mut c_void,
        _nargs: i32,
        _nresults: i32,
        _errfunc: i32,
    ) -> i32 {
        let err = STAGED.with(|g| g.borrow_mut().call_error.take());
        STACK.with(|s| {
            let mut stack = s.borrow_mut();
            assert_eq!(stack.pop(), Some(Slot::Chunk), "pcall without a loaded chunk");
            match err {
                Some(msg) => {
                    stack.push(Slot::Str(msg));
                    2
                }
                None => {
                    let results = STAGED.with(|g| g.borrow().results.clone());
                    stack.extend(results);
                    0
                }
            }
        })
    }

    unsafe extern "cdecl" fn fk_type(_s: *mut c_void, idx: i32) -> i32 {
        match slot_at(idx) {
            Some(Slot::Nil) => LUA_TNIL,
            Some(Slot::Bool(_)) => LUA_TBOOLEAN,
            Some(Slot::Num(_)) => LUA_TNUMBER,
            Some(Slot::Str(_)) => LUA_TSTRING,
            Some(Slot::Chunk) => 6,
            None => -1,
        }
    }

    unsafe extern "cdecl" fn fk_isnumber(_s: *mut c_void, idx: i32) -> i32 {
        matches!(slot_at(idx), Some(Slot::Num(_))) as i32
    }

    unsafe extern "cdecl" fn fk_isstring(_s: *mut c_void, idx: i32) -> i32 {
        matches!(slot_at(idx), Some(Slot::Str(_)) | Some(Slot::Num(_))) as i32
    }

    unsafe extern "cdecl" fn fk_tonumber(_s: *mut c_void, idx: i32) -> f64 {
        match slot_at(idx) {
            Some(Slot::Num(n)) => n,
            Some(Slot::Str(t)) => t.parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    unsafe extern "cdecl" fn fk_tointeger(_s: *mut c_void, idx: i32) -> i32 {
        fk_tonumber(_s, idx) as i32
    }

    unsafe extern "cdecl" fn fk_toboolean(_s: *mut c_void, idx: i32) -> i32 {
        !matches!(slot_at(idx), Some(Slot::Nil) | Some(Slot::Bool(false)) | None) as i32
    }

    unsafe extern "cdecl" fn fk_tolstring(
        _s: *mut c_void,
        idx: i32,
        len: *mut usize,
    ) -> *const u8 {
        let text = match slot_at(idx) {
            Some(Slot::Str(t)) => t,
            Some(Slot::Num(n)) => wowbridge_core::value::format_number(n),
            _ => {
                if !len.is_null() {
                    *len = 0;
                }
                return std::ptr::null();
            }
        };
        if !len.is_null() {
            *len = text.len();
        }
        ARENA.with(|a| {
            let c = CString::new(text).unwrap();
            let ptr = c.as_ptr() as *const u8;
            a.borrow_mut().push(c);
            ptr
        })
    }

    unsafe extern "cdecl" fn fk_pushnil(_s: *mut c_void) {
        STACK.with(|s| s.borrow_mut().push(Slot::Nil));
    }

    unsafe extern "cdecl" fn fk_pushinteger(_s: *mut c_void, n: i32) {
        STACK.with(|s| s.borrow_mut().push(Slot::Num(n as f64)));
    }

    unsafe extern "cdecl" fn fk_pushstring(_s: *mut c_void, p: *const u8) {
        let mut bytes = Vec::new();
        let mut cur = p;
        while *cur != 0 {
            bytes.push(*cur);
            cur = cur.add(1);
        }
        STACK.with(|s| s.borrow_mut().push(Slot::Str(String::from_utf8(bytes).unwrap())));
    }

    unsafe extern "cdecl" fn fk_getfield(_s: *mut c_void, _idx: i32, _key: *const u8) {
        STACK.with(|s| s.borrow_mut().push(Slot::Nil));
    }

    unsafe extern "cdecl" fn fk_execute(_code: *const u8, _source: *const u8, _zero: i32) {}

    /// Fake native spell-info: consumes the id on the stack top, pushes the
    /// staged result slots above it.
    unsafe extern "cdecl" fn fk_native_spell_info(_s: *mut c_void) -> i32 {
        let results = STAGED.with(|g| g.borrow().results.clone());
        let count = results.len() as i32;
        STACK.with(|s| s.borrow_mut().extend(results));
        count
    }

    /// Adapter whose state anchor points at a live buffer, so the pre-call
    /// probe passes. Anchors are leaked per adapter; parallel test threads
    /// never share a mutable static.
    fn fake_adapter() -> ScriptingAdapter {
        let state_buf: &'static [u8; 64] = Box::leak(Box::new([0u8; 64]));
        let anchor: &'static usize = Box::leak(Box::new(state_buf.as_ptr() as usize));
        adapter_with_anchor(anchor as *const usize as usize)
    }

    /// Adapter whose state pointer is non-null but unmapped; the first 64 KiB
    /// of a Win32 process is never mapped.
    fn dead_state_adapter() -> ScriptingAdapter {
        let anchor: &'static usize = Box::leak(Box::new(0x10usize));
        adapter_with_anchor(anchor as *const usize as usize)
    }

    fn null_state_adapter() -> ScriptingAdapter {
        adapter_with_anchor(&NULL_STATE as *const usize as usize)
    }

    fn adapter_with_anchor(anchor: usize) -> ScriptingAdapter {
        let mut table = OffsetsTable::wow_12340();
        table.state_ptr = anchor;
        table.execute = fk_execute as usize;
        table.pcall = fk_pcall as usize;
        table.loadbuffer = fk_loadbuffer as usize;
        table.gettop = fk_gettop as usize;
        table.settop = fk_settop as usize;
        table.value_type = fk_type as usize;
        table.isnumber = fk_isnumber as usize;
        table.isstring = fk_isstring as usize;
        table.tonumber = fk_tonumber as usize;
        table.tointeger = fk_tointeger as usize;
        table.toboolean = fk_toboolean as usize;
        table.tolstring = fk_tolstring as usize;
        table.pushnil = fk_pushnil as usize;
        table.pushinteger = fk_pushinteger as usize;
        table.pushstring = fk_pushstring as usize;
        table.getfield = fk_getfield as usize;
        table.get_spell_info = fk_native_spell_info as usize;
        ScriptingAdapter::new(&table)
    }

    fn stack_depth() -> usize {
        STACK.with(|s| s.borrow().len())
    }

    fn stage_results(results: Vec<Slot>) {
        STAGED.with(|g| g.borrow_mut().results = results);
    }

    #[test]
    fn null_state_reported_not_called() {
        let adapter = null_state_adapter();
        assert!(adapter.state().is_none());
        assert_eq!(adapter.run_chunk(b"return 1"), Err(ScriptError::StateNull));
    }

    #[test]
    fn unmapped_state_is_a_fault_not_a_call() {
        // The probe fires before any engine entry point is touched.
        let adapter = dead_state_adapter();
        assert_eq!(adapter.run_chunk(b"return 1"), Err(ScriptError::Fault));
        assert_eq!(adapter.spell_info(1752), Err(HostCallError::Crash));
        assert_eq!(stack_depth(), 0);
    }

    #[test]
    fn run_chunk_returns_typed_results_and_restores_stack() {
        let adapter = fake_adapter();
        stage_results(vec![
            Slot::Num(1.0),
            Slot::Str("two".into()),
            Slot::Bool(true),
            Slot::Nil,
        ]);
        let values = adapter.run_chunk(b"return 1,\"two\",true,nil").unwrap();
        assert_eq!(
            values,
            vec![
                ScriptValue::Number(1.0),
                ScriptValue::Text("two".into()),
                ScriptValue::Boolean(true),
                ScriptValue::Nil,
            ]
        );
        assert_eq!(stack_depth(), 0);
    }

    #[test]
    fn run_chunk_is_stack_neutral_over_prior_depth() {
        let adapter = fake_adapter();
        STACK.with(|s| {
            s.borrow_mut().extend([Slot::Num(9.0), Slot::Str("keep".into())]);
        });
        stage_results(vec![Slot::Num(5.0)]);
        adapter.run_chunk(b"return 5").unwrap();
        assert_eq!(stack_depth(), 2);
        assert_eq!(slot_at(2), Some(Slot::Str("keep".into())));
    }

    #[test]
    fn load_failure_restores_stack() {
        let adapter = fake_adapter();
        STAGED.with(|g| g.borrow_mut().load_error = Some("unexpected symbol".into()));
        assert_eq!(
            adapter.run_chunk(b"return )"),
            Err(ScriptError::Load("unexpected symbol".into()))
        );
        assert_eq!(stack_depth(), 0);
    }

    #[test]
    fn pcall_failure_restores_stack() {
        let adapter = fake_adapter();
        STAGED.with(|g| g.borrow_mut().call_error = Some("attempt to call a nil value".into()));
        assert_eq!(
            adapter.run_chunk(b"nosuchfn()"),
            Err(ScriptError::Call("attempt to call a nil value".into()))
        );
        assert_eq!(stack_depth(), 0);
    }

    #[test]
    fn spell_info_reads_the_result_window() {
        let adapter = fake_adapter();
        // name, rank, icon, cost, funnel (skipped), power, castTime, min, max
        stage_results(vec![
            Slot::Str("Sinister Strike".into()),
            Slot::Str("Rank 12".into()),
            Slot::Str("Interface\\Icons\\Ability_RogueDualWield".into()),
            Slot::Num(45.0),
            Slot::Bool(false),
            Slot::Num(3.0),
            Slot::Num(0.0),
            Slot::Num(0.0),
            Slot::Num(5.0),
        ]);
        let info = adapter.spell_info(1752).unwrap();
        assert_eq!(info.name, "Sinister Strike");
        assert_eq!(info.rank, "Rank 12");
        assert_eq!(info.cost, 45.0);
        assert_eq!(info.power_type, 3);
        assert_eq!(info.cast_time_ms, 0.0);
        assert_eq!(info.min_range, 0.0);
        assert_eq!(info.max_range, 5.0);
        assert_eq!(stack_depth(), 0);
    }

    #[test]
    fn spell_info_short_window_keeps_sentinels() {
        let adapter = fake_adapter();
        // Host answered with nothing useful at all.
        stage_results(Vec::new());
        let info = adapter.spell_info(99999).unwrap();
        assert!(info.name_missing());
        assert_eq!(info.cost, -1.0);
        assert_eq!(info.power_type, -1);
        assert_eq!(info.max_range, -1.0);
        assert_eq!(stack_depth(), 0);
    }

    #[test]
    fn reset_stack_forces_empty() {
        let adapter = fake_adapter();
        STACK.with(|s| s.borrow_mut().extend([Slot::Num(1.0), Slot::Num(2.0)]));
        adapter.reset_stack();
        assert_eq!(stack_depth(), 0);
    }
}
